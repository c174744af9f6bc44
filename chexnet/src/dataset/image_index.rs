use super::*;
use crate::common::*;

/// The default pattern of image files under the image directory.
pub const DEFAULT_IMAGE_PATTERN: &str = "**/*.png";

/// Maps image file names to their locations under the image directory.
#[derive(Debug, Clone)]
pub struct ImageIndex {
    dir: PathBuf,
    paths: IndexMap<String, PathBuf>,
}

impl ImageIndex {
    /// Scan the directory for files matching the pattern relative to it.
    ///
    /// A file name found at two locations is an error, since the identifier
    /// would not resolve to exactly one file.
    pub fn scan(dir: impl AsRef<Path>, pattern: &str) -> Result<Self, LoadError> {
        let dir = dir.as_ref();
        let full_pattern = format!("{}/{}", dir.display(), pattern);

        let entries = glob::glob(&full_pattern).map_err(|source| LoadError::Pattern {
            pattern: full_pattern.clone(),
            source,
        })?;

        let mut paths = IndexMap::new();
        for entry in entries {
            let path = entry.map_err(|err| LoadError::Io {
                path: err.path().to_owned(),
                source: err.into_error(),
            })?;
            if !path.is_file() {
                continue;
            }
            let identifier = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name.to_owned(),
                None => {
                    warn!("ignore non UTF-8 file name '{}'", path.display());
                    continue;
                }
            };

            if let Some(first) = paths.get(&identifier) {
                return Err(LoadError::DuplicateImage {
                    identifier,
                    first: PathBuf::clone(first),
                    second: path,
                });
            }
            paths.insert(identifier, path);
        }

        debug!("found {} image files in '{}'", paths.len(), dir.display());

        Ok(Self {
            dir: dir.to_owned(),
            paths,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, identifier: &str) -> Option<&Path> {
        self.paths.get(identifier).map(|path| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Join metadata rows and boxes with image files.
    ///
    /// Rows without an image file are dropped with a warning. The records
    /// keep the order of the metadata table.
    pub fn build_records(
        &self,
        entries: Vec<MetadataEntry>,
        bboxes: Vec<BoundingBox>,
    ) -> Result<RecordSet, LoadError> {
        let mut bbox_map: HashMap<String, Vec<BoundingBox>> = HashMap::new();
        bboxes.into_iter().for_each(|bbox| {
            bbox_map
                .entry(bbox.identifier.clone())
                .or_default()
                .push(bbox);
        });

        let mut num_missing = 0;
        let records: Vec<_> = entries
            .into_iter()
            .filter_map(|entry| match self.get(&entry.identifier) {
                Some(path) => {
                    let bboxes = bbox_map.remove(&entry.identifier).unwrap_or_default();
                    Some(Arc::new(ImageRecord {
                        path: path.to_owned(),
                        entry,
                        bboxes,
                    }))
                }
                None => {
                    warn!("image file of '{}' is not found", entry.identifier);
                    num_missing += 1;
                    None
                }
            })
            .collect();

        if num_missing > 0 {
            warn!(
                "{} metadata rows are dropped due to missing image files",
                num_missing
            );
        }
        if records.is_empty() {
            return Err(LoadError::NoRecords {
                dir: self.dir.clone(),
            });
        }

        Ok(RecordSet {
            records,
            num_missing,
        })
    }
}

/// The image records joined from the metadata tables and the image directory.
#[derive(Debug, Clone)]
pub struct RecordSet {
    pub records: Vec<Arc<ImageRecord>>,
    /// The number of metadata rows without an image file.
    pub num_missing: usize,
}

/// Load both tables and join them with the image files under `image_dir`.
pub fn load_records(
    metadata_file: impl AsRef<Path>,
    bbox_file: Option<&Path>,
    image_dir: impl AsRef<Path>,
    image_pattern: &str,
) -> Result<RecordSet, LoadError> {
    let entries = load_metadata_table(metadata_file)?;
    let bboxes = match bbox_file {
        Some(file) => load_bbox_table(file)?,
        None => vec![],
    };
    let index = ImageIndex::scan(image_dir, image_pattern)?;
    info!(
        "loaded {} metadata rows, {} boxes and {} image files",
        entries.len(),
        bboxes.len(),
        index.len()
    );
    index.build_records(entries, bboxes)
}
