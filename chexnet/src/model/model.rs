use super::{DenseNet, DenseNetInit};
use crate::common::*;

/// Options of [ChexNet].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChexNetInit {
    pub backbone: DenseNetInit,
    pub num_classes: usize,
}

impl Default for ChexNetInit {
    fn default() -> Self {
        Self {
            backbone: DenseNetInit::densenet121(),
            num_classes: NUM_FINDINGS,
        }
    }
}

impl ChexNetInit {
    /// Build the model. The backbone lives under "features" and the
    /// classification layer under "head".
    pub fn build<'p, P>(self, path: P) -> Result<ChexNet, ConfigError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            backbone,
            num_classes,
        } = self;
        crate::ensure_config!(num_classes > 0, "num_classes", "must be positive");

        let features = backbone.build(path / "features")?;
        let head = nn::linear(
            path / "head",
            features.num_features() as i64,
            num_classes as i64,
            Default::default(),
        );

        Ok(ChexNet {
            features,
            head,
            num_classes,
        })
    }
}

/// The multi-label classifier.
///
/// Each class gets an independent sigmoid probability.
#[derive(Debug)]
pub struct ChexNet {
    features: DenseNet,
    head: nn::Linear,
    num_classes: usize,
}

impl ChexNet {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Compute `[B, num_classes]` pre-sigmoid scores.
    pub fn forward_logits(&self, input: &Tensor, mode: Mode) -> Tensor {
        self.features
            .forward_t(input, mode.is_train())
            .adaptive_avg_pool2d(&[1, 1])
            .flat_view()
            .apply(&self.head)
    }

    /// Compute `[B, num_classes]` probabilities.
    pub fn forward(&self, input: &Tensor, mode: Mode) -> Tensor {
        self.forward_logits(input, mode).sigmoid()
    }
}

/// Load pretrained weights from a file into the variable store.
///
/// Variables absent in the file, such as the head, are left untouched and
/// their names are returned.
pub fn load_pretrained(
    vs: &mut nn::VarStore,
    file: impl AsRef<Path>,
) -> Result<Vec<String>, tch::TchError> {
    let file = file.as_ref();
    let mut missing = vs.load_partial(file)?;
    missing.sort();
    info!(
        "loaded pretrained weights from '{}', {} variables are not initialized by it",
        file.display(),
        missing.len()
    );
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_init() -> ChexNetInit {
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
    }

    #[test]
    fn independent_sigmoid_outputs() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = tiny_init().build(&vs.root()).unwrap();
        let input = Tensor::randn(&[4, 3, 64, 64], (Kind::Float, Device::Cpu));

        for mode in [Mode::Train, Mode::Eval] {
            let probs = model.forward(&input, mode);
            assert_eq!(probs.size(), [4, NUM_FINDINGS as i64]);
            assert!(bool::from(&probs.ge(0.0).all()));
            assert!(bool::from(&probs.le(1.0).all()));
        }

        // probabilities are the sigmoid of logits, not a softmax
        let logits = model.forward_logits(&input, Mode::Eval);
        let probs = model.forward(&input, Mode::Eval);
        let diff = f64::from(&(logits.sigmoid() - &probs).abs().max());
        assert!(diff < 1e-6);
        let row_sum = probs.sum_dim_intlist(&[1], false, Kind::Float);
        assert!(f64::from(&(row_sum - 1.0).abs().max()) > 0.1);
    }

    #[test]
    fn pretrained_weights_skip_head() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("densenet.ot");

        // an ImageNet-like store with a 1000-class classifier
        let pretrained_vs = nn::VarStore::new(Device::Cpu);
        let backbone = tiny_init().backbone;
        let num_features = backbone.num_features() as i64;
        let _features = backbone.build(&pretrained_vs.root() / "features").unwrap();
        let _classifier = nn::linear(
            &pretrained_vs.root() / "classifier",
            num_features,
            1000,
            Default::default(),
        );
        pretrained_vs.save(&file).unwrap();

        let mut vs = nn::VarStore::new(Device::Cpu);
        let _model = tiny_init().build(&vs.root()).unwrap();
        let missing = load_pretrained(&mut vs, &file).unwrap();
        assert_eq!(missing, ["head.bias", "head.weight"]);

        let expect = pretrained_vs.variables();
        let actual = vs.variables();
        assert!(actual["features.conv0.weight"].equal(&expect["features.conv0.weight"]));
    }
}
