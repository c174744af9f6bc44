use super::*;
use crate::{common::*, processor::ImageTransform};

/// One preprocessed image with its target.
#[derive(Debug)]
pub struct Sample {
    pub identifier: String,
    /// The `[3, S, S]` image.
    pub image: Tensor,
    pub label: LabelVector,
}

/// The generic dataset trait.
pub trait GenericDataset
where
    Self: Debug + Send + Sync,
{
    /// The image height and width of samples.
    fn image_size(&self) -> usize;
}

/// The dataset that can be random accessed.
pub trait RandomAccessDataset
where
    Self: GenericDataset,
{
    /// Get number of records in the dataset.
    fn num_records(&self) -> usize;

    /// Load the nth sample in the dataset.
    ///
    /// The random generator drives the augmentation in [Mode::Train].
    fn nth(&self, index: usize, mode: Mode, rng: &mut StdRng) -> Result<Sample, ImageLoadError>;
}

/// The dataset adapter from image records to model inputs and targets.
#[derive(Debug, Clone)]
pub struct ChestXrayDataset {
    records: Vec<Arc<ImageRecord>>,
    transform: Arc<ImageTransform>,
}

impl ChestXrayDataset {
    pub fn new(records: Vec<Arc<ImageRecord>>, transform: Arc<ImageTransform>) -> Self {
        Self { records, transform }
    }

    pub fn records(&self) -> &[Arc<ImageRecord>] {
        &self.records
    }

    /// Count positive images per finding.
    pub fn positive_counts(&self) -> [usize; NUM_FINDINGS] {
        let mut counts = [0; NUM_FINDINGS];
        self.records.iter().for_each(|record| {
            record
                .labels()
                .iter()
                .for_each(|finding| counts[finding.index()] += 1);
        });
        counts
    }
}

impl GenericDataset for ChestXrayDataset {
    fn image_size(&self) -> usize {
        self.transform.image_size()
    }
}

impl RandomAccessDataset for ChestXrayDataset {
    fn num_records(&self) -> usize {
        self.records.len()
    }

    fn nth(&self, index: usize, mode: Mode, rng: &mut StdRng) -> Result<Sample, ImageLoadError> {
        let record = self.records.get(index).ok_or_else(|| {
            ImageLoadError::new(
                "",
                format!(
                    "record index {} is out of range of {} records",
                    index,
                    self.records.len()
                ),
            )
        })?;
        let image = self.transform.load(&record.path, mode, rng)?;

        Ok(Sample {
            identifier: record.identifier().to_owned(),
            image,
            label: record.label_vector(),
        })
    }
}
