//! Dataset loading, splitting and batching.

mod batch_loader;
mod dataset_;
mod image_index;
mod metadata;
mod record;
mod split;

pub use batch_loader::*;
pub use dataset_::*;
pub use image_index::*;
pub use metadata::*;
pub use record::*;
pub use split::*;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::*;

    /// A record pointing to a nonexistent file under `/nonexistent`.
    pub fn make_record(identifier: &str, labels: &str, patient_id: u32) -> Arc<ImageRecord> {
        Arc::new(ImageRecord {
            path: Path::new("/nonexistent").join(identifier),
            entry: MetadataEntry {
                identifier: identifier.to_owned(),
                labels: LabelSet::parse(labels).unwrap(),
                follow_up: 0,
                patient_id,
                patient_age: 50,
                patient_gender: "M".into(),
                view_position: "PA".into(),
                original_size: (1024, 1024),
                pixel_spacing: (r64(0.143), r64(0.143)),
            },
            bboxes: vec![],
        })
    }
}
