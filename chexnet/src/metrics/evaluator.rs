use super::report::{EvaluationReport, Thresholds};
use crate::{common::*, dataset::Batch, loss::MultiLabelLoss, model::ChexNet};
use ndarray::Array2;

/// Accumulates predictions and targets of a whole dataset split.
#[derive(Debug, Default)]
pub struct PredictionCollector {
    identifiers: Vec<String>,
    probs: Vec<f32>,
    targets: Vec<bool>,
    loss_sum: f64,
    num_loss_samples: usize,
}

impl PredictionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Add a batch of `[B, C]` probabilities and targets with its mean loss.
    pub fn push(
        &mut self,
        identifiers: &[String],
        probs: &Tensor,
        targets: &Tensor,
        loss: Option<f64>,
    ) {
        let batch_size = identifiers.len();
        debug_assert_eq!(probs.size(), [batch_size as i64, NUM_FINDINGS as i64]);
        debug_assert_eq!(probs.size(), targets.size());

        let probs = Vec::<f32>::from(
            &probs
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .contiguous()
                .view([-1]),
        );
        let targets = Vec::<bool>::from(&targets.to_device(Device::Cpu).ge(0.5).contiguous().view([-1]));

        self.identifiers.extend_from_slice(identifiers);
        self.probs.extend(probs);
        self.targets.extend(targets);
        if let Some(loss) = loss {
            self.loss_sum += loss * batch_size as f64;
            self.num_loss_samples += batch_size;
        }
    }

    /// The mean loss weighted by batch size.
    pub fn mean_loss(&self) -> Option<f64> {
        (self.num_loss_samples > 0).then(|| self.loss_sum / self.num_loss_samples as f64)
    }

    pub fn finish(self, thresholds: &Thresholds, target_finding: Option<Finding>) -> EvaluationReport {
        let mean_loss = self.mean_loss();
        let num_samples = self.len();
        let Self { probs, targets, .. } = self;

        // the shapes hold by construction
        let probs = Array2::from_shape_vec((num_samples, NUM_FINDINGS), probs)
            .unwrap_or_else(|_| unreachable!());
        let targets = Array2::from_shape_vec((num_samples, NUM_FINDINGS), targets)
            .unwrap_or_else(|_| unreachable!());

        EvaluationReport::from_arrays(&probs, &targets, thresholds, target_finding, mean_loss)
    }
}

/// Runs a model over Eval mode batches and computes the metrics.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    pub thresholds: Thresholds,
    /// The finding to search an F1-optimal threshold for.
    pub target_finding: Option<Finding>,
}

impl Evaluator {
    pub fn new(thresholds: Thresholds, target_finding: Option<Finding>) -> Self {
        Self {
            thresholds,
            target_finding,
        }
    }

    /// Evaluate the model on all batches.
    ///
    /// The model runs in Eval mode without gradients. The loss is computed
    /// when given. Non-finite outputs of a diverged model are a
    /// [ResourceError].
    pub fn run<I>(
        &self,
        model: &ChexNet,
        loss_fn: Option<&MultiLabelLoss>,
        batches: I,
    ) -> Result<EvaluationReport, ResourceError>
    where
        I: IntoIterator<Item = Result<Batch, ResourceError>>,
    {
        let mut collector = PredictionCollector::new();

        for batch in batches {
            let Batch {
                step,
                identifiers,
                images,
                targets,
                ..
            } = batch?;

            let (probs, loss) = ResourceError::catch_unwind(|| {
                tch::no_grad(|| {
                    let logits = model.forward_logits(&images, Mode::Eval);
                    let loss = loss_fn.map(|loss_fn| f64::from(&loss_fn.forward(&logits, &targets)));
                    (logits.sigmoid(), loss)
                })
            })?;

            let num_non_finite = probs
                .isfinite()
                .logical_not()
                .sum(Kind::Int64)
                .int64_value(&[]);
            if num_non_finite > 0 || loss.map_or(false, |loss| !loss.is_finite()) {
                return Err(ResourceError::new(format!(
                    "the model produces non-finite outputs in batch {}",
                    step
                )));
            }

            collector.push(&identifiers, &probs, &targets, loss);
        }

        let report = collector.finish(&self.thresholds, self.target_finding);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        loss::{LossKind, MultiLabelLossInit},
        model::{ChexNetInit, DenseNetInit},
    };

    fn tiny_model(vs: &nn::VarStore) -> ChexNet {
        ChexNetInit {
            backbone: DenseNetInit {
                input_channels: 3,
                init_features: 8,
                growth_rate: 4,
                bn_size: 2,
                block_config: vec![1, 1],
            },
            num_classes: NUM_FINDINGS,
        }
        .build(&vs.root())
        .unwrap()
    }

    fn make_batches() -> Vec<Batch> {
        (0..3)
            .map(|step| {
                let batch_size = if step == 2 { 1 } else { 2 };
                let identifiers = (0..batch_size)
                    .map(|index| format!("{:08}_000.png", step * 2 + index))
                    .collect();
                let targets = Tensor::rand(
                    &[batch_size as i64, NUM_FINDINGS as i64],
                    (Kind::Float, Device::Cpu),
                )
                .ge(0.5)
                .to_kind(Kind::Float);

                Batch {
                    epoch: 0,
                    step,
                    identifiers,
                    images: Tensor::randn(&[batch_size as i64, 3, 32, 32], (Kind::Float, Device::Cpu)),
                    targets,
                }
            })
            .collect()
    }

    #[test]
    fn deterministic_evaluation() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = tiny_model(&vs);
        let loss_fn = MultiLabelLossInit {
            kind: LossKind::default(),
            positive_counts: &[],
            num_records: 0,
            device: Device::Cpu,
        }
        .build()
        .unwrap();
        let batches = make_batches();
        let evaluator = Evaluator::default();

        let run = || {
            let batches = batches.iter().map(|batch| {
                Ok(Batch {
                    identifiers: batch.identifiers.clone(),
                    images: batch.images.shallow_clone(),
                    targets: batch.targets.shallow_clone(),
                    ..*batch
                })
            });
            evaluator.run(&model, Some(&loss_fn), batches).unwrap()
        };
        let first = run();
        let second = run();

        assert_eq!(first, second);
        assert_eq!(first.num_samples, 5);
        assert_eq!(first.classes.len(), NUM_FINDINGS);
        assert!(first.mean_loss.unwrap() > 0.0);
    }

    #[test]
    fn propagate_loader_failure() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = tiny_model(&vs);
        let batches = vec![Err(ResourceError::new("worker panicked"))];
        let err = Evaluator::default().run(&model, None, batches).unwrap_err();
        assert_eq!(err.message, "worker panicked");
    }

    #[test]
    fn reject_diverged_model() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = tiny_model(&vs);
        tch::no_grad(|| {
            vs.variables().values_mut().for_each(|var| {
                let _ = var.fill_(f64::NAN);
            });
        });

        let batches = make_batches().into_iter().map(Ok);
        let err = Evaluator::default().run(&model, None, batches).unwrap_err();
        assert!(err.message.contains("non-finite"));
    }

    #[test]
    fn count_batches_through_mutable_iterator() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = tiny_model(&vs);
        let mut batches = make_batches().into_iter().map(Ok);
        let report = Evaluator::default()
            .run(&model, None, &mut batches)
            .unwrap();
        assert_eq!(report.num_samples, 5);
        assert!(batches.next().is_none());
    }

    #[test]
    fn collector_weights_loss_by_batch_size() {
        let mut collector = PredictionCollector::new();
        let probs = Tensor::full(&[3, NUM_FINDINGS as i64], 0.8, (Kind::Float, Device::Cpu));
        let targets = Tensor::ones(&[3, NUM_FINDINGS as i64], (Kind::Float, Device::Cpu));
        let ids: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        collector.push(&ids, &probs, &targets, Some(1.0));
        collector.push(&ids[..1], &probs.narrow(0, 0, 1), &targets.narrow(0, 0, 1), Some(5.0));

        assert_eq!(collector.len(), 4);
        assert_eq!(collector.mean_loss(), Some(2.0));

        let report = collector.finish(&Thresholds::default(), None);
        assert_eq!(report.num_samples, 4);
        assert_eq!(report.macro_recall, 1.0);
        assert_eq!(report.macro_auroc, None);
    }
}
