//! Dataset and batch loader construction from the configuration.

use crate::{common::*, config::Config};
use chexnet::{
    dataset::{self, DataSplit, ImageRecord},
    processor::ImageTransform,
};
use rand::{rngs::StdRng, SeedableRng};
use tokio::runtime::Handle;

/// Load the metadata tables and split the records.
///
/// Positives of the configured finding are oversampled in the train split.
pub fn load_split(config: &Config) -> Result<DataSplit> {
    let dataset_config = &config.dataset;
    let record_set = dataset::load_records(
        &dataset_config.metadata_file,
        dataset_config.bbox_file.as_deref(),
        &dataset_config.image_dir,
        &dataset_config.image_pattern,
    )?;
    if record_set.num_missing > 0 {
        warn!(
            "{} metadata rows have no image file and are dropped",
            record_set.num_missing
        );
    }

    let mut split = dataset_config.split_init().split(&record_set.records)?;

    if let Some(finding) = dataset_config.oversample {
        let mut rng = StdRng::seed_from_u64(dataset_config.seed);
        split.train = dataset::oversample_positives(&split.train, finding, &mut rng);
    }

    Ok(split)
}

/// Build a loader over the records, or `None` if there are no records.
pub fn build_loader(
    config: &Config,
    records: Vec<Arc<ImageRecord>>,
    transform: Arc<ImageTransform>,
    mode: Mode,
    handle: Handle,
) -> Result<Option<BatchLoader<ChestXrayDataset>>> {
    if records.is_empty() {
        return Ok(None);
    }

    let batch_size = match mode {
        Mode::Train => config.training.batch_size,
        Mode::Eval => config
            .evaluation
            .batch_size
            .unwrap_or(config.training.batch_size),
    };
    let dataset = Arc::new(ChestXrayDataset::new(records, transform));
    let loader = BatchLoaderInit {
        seed: config.preprocessor.seed,
        num_workers: config.preprocessor.num_workers.map(|num| num.get()),
        prefetch: config.preprocessor.prefetch,
        drop_last: config.training.drop_last,
        device: config.training.device,
        ..BatchLoaderInit::new(batch_size.get(), mode)
    }
    .build(dataset, handle)?;

    Ok(Some(loader))
}

/// The batch loaders of a training run.
#[derive(Debug)]
pub struct TrainingData {
    pub train: BatchLoader<ChestXrayDataset>,
    pub val: Option<BatchLoader<ChestXrayDataset>>,
    pub test: Option<BatchLoader<ChestXrayDataset>>,
    /// The number of positive images per finding in the train split.
    pub positive_counts: [usize; NUM_FINDINGS],
    pub num_train_records: usize,
}

impl TrainingData {
    /// Load and split the dataset, then build the loaders.
    ///
    /// It reads the metadata tables and scans the image directory, so it
    /// blocks.
    pub fn new(config: &Config, handle: Handle) -> Result<Self> {
        let DataSplit { train, val, test } = load_split(config)?;
        let transform = Arc::new(config.preprocessor.transform_init().build()?);

        let train = build_loader(config, train, transform.clone(), Mode::Train, handle.clone())?
            .ok_or_else(|| format_err!("the train split is empty"))?;
        let val = build_loader(config, val, transform.clone(), Mode::Eval, handle.clone())?;
        let test = build_loader(config, test, transform, Mode::Eval, handle)?;

        if val.is_none() {
            warn!("the validation split is empty, no checkpoint will be saved");
        }

        let positive_counts = train.dataset().positive_counts();
        let num_train_records = train.num_records();

        Ok(Self {
            train,
            val,
            test,
            positive_counts,
            num_train_records,
        })
    }
}
