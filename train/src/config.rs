//! Training program configuration format.

use crate::common::*;
use chexnet::{
    dataset::{SplitInit, DEFAULT_IMAGE_PATTERN},
    ensure_config,
    loss::LossKind,
    metrics::ThresholdsInit,
    model::DenseNetInit,
    processor::{ImageTransformInit, IMAGENET_MEAN, IMAGENET_STD},
};

pub use dataset::*;
pub use model::*;
pub use preprocessor::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub preprocessor: PreprocessorConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse and validate a json5 configuration file.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check hyperparameters before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dataset.split_init().validate()?;
        self.preprocessor.transform_init().build()?;
        self.training.validate()?;
        self.evaluation.thresholds.clone().build()?;
        ensure_config!(
            self.preprocessor.prefetch > 0,
            "prefetch",
            "must be positive"
        );
        ensure_config!(
            self.logging.log_steps > 0,
            "log_steps",
            "must be positive"
        );
        Ok(())
    }
}

mod dataset {
    use super::*;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The image metadata table, e.g. Data_Entry_2017.csv.
        pub metadata_file: PathBuf,
        /// The bounding box table, e.g. BBox_List_2017.csv.
        pub bbox_file: Option<PathBuf>,
        /// The root directory searched recursively for images.
        pub image_dir: PathBuf,
        #[serde(default = "default_image_pattern")]
        pub image_pattern: String,
        pub val_ratio: R64,
        pub test_ratio: R64,
        /// Keep the images of a patient in one split.
        #[serde(default)]
        pub group_by_patient: bool,
        pub seed: u64,
        /// If set, positives of this finding are oversampled in the training split.
        pub oversample: Option<Finding>,
    }

    impl DatasetConfig {
        pub fn split_init(&self) -> SplitInit {
            SplitInit {
                val_ratio: self.val_ratio,
                test_ratio: self.test_ratio,
                group_by_patient: self.group_by_patient,
                seed: self.seed,
            }
        }
    }

    fn default_image_pattern() -> String {
        DEFAULT_IMAGE_PATTERN.into()
    }
}

mod preprocessor {
    use super::*;

    /// Data preprocessing options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PreprocessorConfig {
        /// The input image height and width.
        pub image_size: NonZeroUsize,
        /// The shorter side length before center cropping in evaluation.
        pub resize_size: NonZeroUsize,
        /// The area range of random resized crops.
        #[serde(default = "default_crop_scale")]
        pub crop_scale: (R64, R64),
        /// The aspect ratio range of random resized crops.
        #[serde(default = "default_crop_ratio")]
        pub crop_ratio: (R64, R64),
        /// The probability to apply horizontal flip.
        pub horizontal_flip_prob: R64,
        /// The maximum degrees of random rotation.
        pub rotate_degrees: Option<R64>,
        /// The number of decoding workers. It defaults to the number of CPUs.
        pub num_workers: Option<NonZeroUsize>,
        /// The number of batches buffered ahead of the training loop.
        #[serde(default = "default_prefetch")]
        pub prefetch: usize,
        /// The seed of shuffling and augmentation.
        pub seed: Option<u64>,
    }

    impl PreprocessorConfig {
        pub fn transform_init(&self) -> ImageTransformInit {
            ImageTransformInit {
                image_size: self.image_size.get(),
                resize_size: self.resize_size.get(),
                crop_scale: self.crop_scale,
                crop_ratio: self.crop_ratio,
                horizontal_flip_prob: self.horizontal_flip_prob,
                rotate_degrees: self.rotate_degrees,
                mean: IMAGENET_MEAN.map(|value| r64(value as f64)),
                std: IMAGENET_STD.map(|value| r64(value as f64)),
            }
        }
    }

    fn default_crop_scale() -> (R64, R64) {
        (r64(0.08), r64(1.0))
    }

    fn default_crop_ratio() -> (R64, R64) {
        (r64(3.0 / 4.0), r64(4.0 / 3.0))
    }

    fn default_prefetch() -> usize {
        2
    }
}

mod model {
    use super::*;

    /// The model configuration.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        #[serde(default = "DenseNetInit::densenet121")]
        pub backbone: DenseNetInit,
        /// ImageNet weights in the torchvision layout, loaded into the backbone.
        pub pretrained_weights: Option<PathBuf>,
    }

    impl ModelConfig {
        pub fn model_init(&self) -> ChexNetInit {
            ChexNetInit {
                backbone: self.backbone.clone(),
                num_classes: NUM_FINDINGS,
            }
        }
    }
}

/// Evaluation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub thresholds: ThresholdsInit,
    /// Report the F1-optimal threshold of this finding.
    pub target_finding: Option<Finding>,
    /// It defaults to the training batch size.
    pub batch_size: Option<NonZeroUsize>,
}

/// Data logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Each run creates a timestamped directory here.
    pub dir: PathBuf,
    /// Send training losses to the event log per this steps.
    #[serde(default = "default_log_steps")]
    pub log_steps: usize,
}

fn default_log_steps() -> usize {
    10
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        /// The batch size.
        pub batch_size: NonZeroUsize,
        /// The number of epochs to train.
        pub max_epochs: NonZeroUsize,
        /// Discard the trailing partial batch of an epoch.
        #[serde(default)]
        pub drop_last: bool,
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        /// The Adam optimizer options.
        #[serde(default)]
        pub optimizer: OptimizerConfig,
        /// The loss function options.
        #[serde(default)]
        pub loss: LossKind,
        /// If set, validate per this steps, otherwise at the end of every epoch.
        pub validation_interval: Option<NonZeroUsize>,
        /// Stop after this many validations without improvement.
        pub early_stopping_patience: Option<NonZeroUsize>,
        /// The best model is saved to this file.
        pub checkpoint_file: PathBuf,
        /// Checkpoint file loading method.
        pub load_checkpoint: LoadCheckpoint,
        /// The training device.
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
    }

    impl TrainingConfig {
        pub fn validate(&self) -> Result<(), ConfigError> {
            self.lr_schedule.validate()?;
            self.optimizer.validate()?;

            // only the option values are checked here
            MultiLabelLossInit {
                kind: self.loss.clone(),
                positive_counts: &[0; NUM_FINDINGS],
                num_records: 0,
                device: Device::Cpu,
            }
            .build()?;

            Ok(())
        }
    }

    /// The Adam optimizer options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OptimizerConfig {
        pub beta1: R64,
        pub beta2: R64,
        pub weight_decay: R64,
    }

    impl Default for OptimizerConfig {
        fn default() -> Self {
            Self {
                beta1: r64(0.9),
                beta2: r64(0.999),
                weight_decay: r64(0.0),
            }
        }
    }

    impl OptimizerConfig {
        pub fn validate(&self) -> Result<(), ConfigError> {
            let Self {
                beta1,
                beta2,
                weight_decay,
            } = *self;
            let unit = r64(0.0)..r64(1.0);
            ensure_config!(
                unit.contains(&beta1),
                "beta1",
                "must be in range [0, 1), but get {}",
                beta1
            );
            ensure_config!(
                unit.contains(&beta2),
                "beta2",
                "must be in range [0, 1), but get {}",
                beta2
            );
            ensure_config!(
                weight_decay >= 0.0,
                "weight_decay",
                "must be non-negative, but get {}",
                weight_decay
            );
            Ok(())
        }
    }

    /// The learning rate scheduling strategy.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Use specific learning rate from specified epochs.
        StepWise { epochs: Vec<(usize, R64)> },
        /// Multiply the learning rate by `factor` once the validation loss
        /// has not improved for `patience` validations.
        ReduceOnPlateau {
            lr: R64,
            factor: R64,
            patience: usize,
            #[serde(default = "default_min_lr")]
            min_lr: R64,
        },
    }

    fn default_min_lr() -> R64 {
        r64(0.0)
    }

    impl LearningRateSchedule {
        pub fn validate(&self) -> Result<(), ConfigError> {
            match *self {
                Self::Constant { lr } => {
                    ensure_config!(lr > 0.0, "lr", "must be positive, but get {}", lr);
                }
                Self::StepWise { ref epochs } => {
                    ensure_config!(
                        epochs.first().map_or(false, |(epoch, _)| *epoch == 0),
                        "lr_schedule",
                        "the epochs must start from zero"
                    );
                    ensure_config!(
                        epochs.windows(2).all(|pair| pair[0].0 < pair[1].0),
                        "lr_schedule",
                        "the epochs must be strictly increasing"
                    );
                    ensure_config!(
                        epochs.iter().all(|(_, lr)| *lr > 0.0),
                        "lr",
                        "must be positive"
                    );
                }
                Self::ReduceOnPlateau {
                    lr,
                    factor,
                    min_lr,
                    ..
                } => {
                    ensure_config!(lr > 0.0, "lr", "must be positive, but get {}", lr);
                    ensure_config!(
                        factor > 0.0 && factor < 1.0,
                        "factor",
                        "must be in range (0, 1), but get {}",
                        factor
                    );
                    ensure_config!(
                        min_lr >= 0.0 && min_lr <= lr,
                        "min_lr",
                        "must be in range [0, lr], but get {}",
                        min_lr
                    );
                }
            }
            Ok(())
        }
    }

    /// Checkpoint file loading method.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LoadCheckpoint {
        /// Disable checkpoint file loading.
        Disabled,
        /// Load the configured checkpoint file if it exists.
        FromBest,
        /// Load the checkpoint file at specified path.
        FromFile { file: PathBuf },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        dataset: {
            metadata_file: "data/Data_Entry_2017.csv",
            bbox_file: "data/BBox_List_2017.csv",
            image_dir: "data/images",
            val_ratio: 0.1,
            test_ratio: 0.2,
            group_by_patient: true,
            seed: 42,
            oversample: "Pneumonia",
        },
        preprocessor: {
            image_size: 224,
            resize_size: 256,
            horizontal_flip_prob: 0.5,
            rotate_degrees: 10.0,
        },
        model: {
            pretrained_weights: "densenet121.ot",
        },
        training: {
            batch_size: 16,
            max_epochs: 10,
            lr_schedule: {
                type: "ReduceOnPlateau",
                lr: 0.001,
                factor: 0.1,
                patience: 1,
            },
            loss: {
                type: "Bce",
                pos_weight: { type: "Balanced" },
            },
            early_stopping_patience: 3,
            checkpoint_file: "checkpoints/best.ckpt",
            load_checkpoint: { type: "FromBest" },
            device: "cpu",
        },
        evaluation: {
            thresholds: {
                overrides: { "Pneumonia": 0.3 },
            },
            target_finding: "Pneumonia",
        },
        logging: {
            dir: "logs",
        },
    }"#;

    #[test]
    fn parse_sample() {
        let config: Config = json5::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.dataset.image_pattern, DEFAULT_IMAGE_PATTERN);
        assert_eq!(config.dataset.oversample, Some(Finding::Pneumonia));
        assert_eq!(config.preprocessor.prefetch, 2);
        assert_eq!(config.model.backbone, DenseNetInit::densenet121());
        assert_eq!(config.training.device, Device::Cpu);
        assert_eq!(config.logging.log_steps, 10);

        let thresholds = config.evaluation.thresholds.clone().build().unwrap();
        assert_eq!(thresholds.get(Finding::Pneumonia), 0.3);
        assert_eq!(thresholds.get(Finding::Mass), 0.5);
    }

    #[test]
    fn reject_invalid_values() {
        let mut config: Config = json5::from_str(SAMPLE).unwrap();
        config.training.lr_schedule = LearningRateSchedule::Constant { lr: r64(0.0) };
        assert_eq!(config.validate().unwrap_err().field, "lr");

        let mut config: Config = json5::from_str(SAMPLE).unwrap();
        config.dataset.val_ratio = r64(0.6);
        config.dataset.test_ratio = r64(0.5);
        assert_eq!(config.validate().unwrap_err().field, "val_ratio");

        let mut config: Config = json5::from_str(SAMPLE).unwrap();
        config.preprocessor.resize_size = NonZeroUsize::new(128).unwrap();
        assert!(config.validate().is_err());

        let mut config: Config = json5::from_str(SAMPLE).unwrap();
        config.training.lr_schedule = LearningRateSchedule::StepWise {
            epochs: vec![(0, r64(0.1)), (5, r64(0.01)), (3, r64(0.001))],
        };
        assert_eq!(config.validate().unwrap_err().field, "lr_schedule");

        let mut config: Config = json5::from_str(SAMPLE).unwrap();
        config.evaluation.thresholds.default = r64(1.5);
        assert_eq!(config.validate().unwrap_err().field, "thresholds");

        let mut config: Config = json5::from_str(SAMPLE).unwrap();
        config.training.optimizer.beta1 = r64(1.0);
        assert_eq!(config.validate().unwrap_err().field, "beta1");
    }
}
