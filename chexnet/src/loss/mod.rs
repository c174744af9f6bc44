//! Multi-label loss functions.

mod bce_with_logits_loss;
mod focal_loss;

pub use bce_with_logits_loss::*;
pub use focal_loss::*;

use crate::common::*;

/// The weights of positive targets in binary cross entropy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PositiveWeight {
    /// Positives and negatives weigh equally.
    None,
    /// The ratio of negatives to positives of each class in the training set.
    Balanced,
    /// Given per-class weights in canonical order.
    Manual { weights: Vec<R64> },
}

impl Default for PositiveWeight {
    fn default() -> Self {
        Self::None
    }
}

/// The choice of loss function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LossKind {
    Bce {
        #[serde(default)]
        pos_weight: PositiveWeight,
    },
    Focal(FocalLossInit),
}

impl Default for LossKind {
    fn default() -> Self {
        Self::Bce {
            pos_weight: PositiveWeight::None,
        }
    }
}

/// Options of [MultiLabelLoss].
#[derive(Debug, Clone)]
pub struct MultiLabelLossInit<'a> {
    pub kind: LossKind,
    /// The number of positive images per class in the training set.
    pub positive_counts: &'a [usize],
    /// The number of images in the training set.
    pub num_records: usize,
    pub device: Device,
}

impl MultiLabelLossInit<'_> {
    pub fn build(self) -> Result<MultiLabelLoss, ConfigError> {
        let Self {
            kind,
            positive_counts,
            num_records,
            device,
        } = self;

        let loss = match kind {
            LossKind::Bce { pos_weight } => {
                let pos_weight: Option<Vec<f32>> = match pos_weight {
                    PositiveWeight::None => None,
                    PositiveWeight::Balanced => Some(
                        positive_counts
                            .iter()
                            .map(|&num_pos| {
                                let num_neg = num_records.saturating_sub(num_pos);
                                num_neg as f32 / num_pos.max(1) as f32
                            })
                            .collect(),
                    ),
                    PositiveWeight::Manual { weights } => {
                        crate::ensure_config!(
                            weights.len() == NUM_FINDINGS,
                            "pos_weight",
                            "expect {} weights, but get {}",
                            NUM_FINDINGS,
                            weights.len()
                        );
                        crate::ensure_config!(
                            weights.iter().all(|&w| w > 0.0),
                            "pos_weight",
                            "weights must be positive"
                        );
                        Some(weights.iter().map(|w| w.raw() as f32).collect())
                    }
                };

                if let Some(pos_weight) = &pos_weight {
                    debug!("positive weights {:?}", pos_weight);
                }

                let init = BceWithLogitsLossInit {
                    pos_weight: pos_weight
                        .map(|weights| Tensor::of_slice(&weights).to_device(device)),
                    ..BceWithLogitsLossInit::default(Reduction::Mean)
                };
                MultiLabelLoss::Bce(init.build())
            }
            LossKind::Focal(init) => MultiLabelLoss::Focal(init.build()?),
        };

        Ok(loss)
    }
}

/// The loss over `[B, C]` logits and binary targets, averaged over classes
/// and samples.
#[derive(Debug)]
pub enum MultiLabelLoss {
    Bce(BceWithLogitsLoss),
    Focal(FocalLoss),
}

impl MultiLabelLoss {
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        match self {
            Self::Bce(loss) => loss.forward(logits, targets),
            Self::Focal(loss) => loss.forward(logits, targets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_weights() {
        let mut counts = [10; NUM_FINDINGS];
        counts[Finding::Hernia.index()] = 0;
        let loss = MultiLabelLossInit {
            kind: LossKind::Bce {
                pos_weight: PositiveWeight::Balanced,
            },
            positive_counts: &counts,
            num_records: 100,
            device: Device::Cpu,
        }
        .build()
        .unwrap();

        // zero logits: per class loss is ln2 * (pos_weight * t + (1 - t))
        let logits = Tensor::zeros(&[1, NUM_FINDINGS as i64], (Kind::Float, Device::Cpu));
        let mut target = [0f32; NUM_FINDINGS];
        target[0] = 1.0;
        let targets = Tensor::of_slice(&target).view([1, NUM_FINDINGS as i64]);
        let value = f64::from(&loss.forward(&logits, &targets));
        let expect = 2f64.ln() * (9.0 + 13.0) / NUM_FINDINGS as f64;
        assert!((value - expect).abs() < 1e-5);
    }

    #[test]
    fn reject_wrong_weight_count() {
        let err = MultiLabelLossInit {
            kind: LossKind::Bce {
                pos_weight: PositiveWeight::Manual {
                    weights: vec![r64(1.0); 3],
                },
            },
            positive_counts: &[],
            num_records: 0,
            device: Device::Cpu,
        }
        .build()
        .unwrap_err();
        assert_eq!(err.field, "pos_weight");
    }

    #[test]
    fn gradient_flows() {
        let vs = nn::VarStore::new(Device::Cpu);
        let logits = vs.root().zeros("logits", &[2, NUM_FINDINGS as i64]);
        let targets = Tensor::ones(&[2, NUM_FINDINGS as i64], (Kind::Float, Device::Cpu));

        for kind in [LossKind::default(), LossKind::Focal(Default::default())] {
            let loss = MultiLabelLossInit {
                kind,
                positive_counts: &[],
                num_records: 0,
                device: Device::Cpu,
            }
            .build()
            .unwrap();
            let value = loss.forward(&logits, &targets);
            let grad = Tensor::run_backward(&[&value], &[&logits], false, false);
            // raising the logits lowers the loss on positive targets
            assert!(f64::from(&grad[0].max()) < 0.0);
        }
    }
}
