//! Loaders for the image metadata and bounding box tables.

use super::*;
use crate::common::*;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::{fs::File, str::FromStr};

/// The number of leading columns used from the image metadata table.
///
/// Image Index, Finding Labels, Follow-up #, Patient ID, Patient Age, Patient
/// Gender, View Position, OriginalImage width and height, pixel spacing x and y.
pub const METADATA_COLUMNS: usize = 11;

/// The number of leading columns used from the bounding box table.
///
/// Image Index, Finding Label, x, y, w, h.
pub const BBOX_COLUMNS: usize = 6;

/// Load the image metadata table.
pub fn load_metadata_table(path: impl AsRef<Path>) -> Result<Vec<MetadataEntry>, LoadError> {
    let path = path.as_ref();

    read_rows(path, METADATA_COLUMNS, |row| {
        let labels = LabelSet::parse(row.get(1)).map_err(|source| LoadError::InvalidLabel {
            path: path.to_owned(),
            line: row.line,
            source,
        })?;

        Ok(MetadataEntry {
            identifier: row.get(0).to_owned(),
            labels,
            follow_up: row.parse(2, "follow-up number")?,
            patient_id: row.parse(3, "patient id")?,
            patient_age: row.parse_age(4)?,
            patient_gender: row.get(5).to_owned(),
            view_position: row.get(6).to_owned(),
            original_size: (row.parse(7, "image width")?, row.parse(8, "image height")?),
            pixel_spacing: (
                row.parse_r64(9, "pixel spacing x")?,
                row.parse_r64(10, "pixel spacing y")?,
            ),
        })
    })
}

/// Load the bounding box table.
pub fn load_bbox_table(path: impl AsRef<Path>) -> Result<Vec<BoundingBox>, LoadError> {
    let path = path.as_ref();

    read_rows(path, BBOX_COLUMNS, |row| {
        let finding =
            Finding::parse_name(row.get(1)).map_err(|source| LoadError::InvalidLabel {
                path: path.to_owned(),
                line: row.line,
                source,
            })?;

        Ok(BoundingBox {
            identifier: row.get(0).to_owned(),
            finding,
            x: row.parse_r64(2, "box x")?,
            y: row.parse_r64(3, "box y")?,
            w: row.parse_r64(4, "box width")?,
            h: row.parse_r64(5, "box height")?,
        })
    })
}

fn read_rows<T, F>(path: &Path, min_columns: usize, mut f: F) -> Result<Vec<T>, LoadError>
where
    F: FnMut(&Row<'_>) -> Result<T, LoadError>,
{
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })?;

    // rows must have as many columns as the header
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(Trim::All)
        .from_reader(file);

    let header_len = reader
        .headers()
        .map_err(|source| LoadError::Csv {
            path: path.to_owned(),
            source,
        })?
        .len();
    if header_len < min_columns {
        return Err(LoadError::ColumnCount {
            path: path.to_owned(),
            line: 1,
            expect: min_columns,
            found: header_len,
        });
    }

    reader
        .records()
        .map(|result| {
            let record = result.map_err(|source| LoadError::Csv {
                path: path.to_owned(),
                source,
            })?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            let row = Row {
                path,
                line,
                record: &record,
            };
            f(&row)
        })
        .collect()
}

struct Row<'a> {
    path: &'a Path,
    line: u64,
    record: &'a StringRecord,
}

impl Row<'_> {
    fn get(&self, index: usize) -> &str {
        self.record.get(index).unwrap_or("")
    }

    fn invalid(&self, index: usize, column: &'static str) -> LoadError {
        LoadError::InvalidField {
            path: self.path.to_owned(),
            line: self.line,
            column,
            value: self.get(index).to_owned(),
        }
    }

    fn parse<T>(&self, index: usize, column: &'static str) -> Result<T, LoadError>
    where
        T: FromStr,
    {
        self.get(index)
            .parse()
            .map_err(|_| self.invalid(index, column))
    }

    fn parse_r64(&self, index: usize, column: &'static str) -> Result<R64, LoadError> {
        let value: f64 = self.parse(index, column)?;
        R64::try_new(value).ok_or_else(|| self.invalid(index, column))
    }

    /// Ages are plain integers, or suffixed with 'Y' in early releases of the table.
    fn parse_age(&self, index: usize) -> Result<u32, LoadError> {
        self.get(index)
            .trim_end_matches(|c| c == 'Y' || c == 'y')
            .parse()
            .map_err(|_| self.invalid(index, "patient age"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    pub const METADATA_HEADER: &str = "Image Index,Finding Labels,Follow-up #,Patient ID,Patient Age,Patient Gender,View Position,OriginalImage[Width,Height],OriginalImagePixelSpacing[x,y],";
    pub const BBOX_HEADER: &str = "Image Index,Finding Label,Bbox [x,y,w,h],,,";

    fn write_file(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        lines
            .iter()
            .for_each(|line| writeln!(file, "{}", line).unwrap());
        path
    }

    #[test]
    fn load_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "Data_Entry_2017.csv",
            &[
                METADATA_HEADER,
                "00000001_000.png,Cardiomegaly,0,1,58,M,PA,2682,2749,0.143,0.143,",
                "00000001_001.png,Cardiomegaly|Emphysema,1,1,058Y,M,PA,2894,2729,0.143,0.143,",
                "00000002_000.png,No Finding,0,2,81,M,PA,2500,2048,0.168,0.168,",
            ],
        );

        let entries = load_metadata_table(&path).unwrap();
        assert_eq!(entries.len(), 3);

        let first = &entries[0];
        assert_eq!(first.identifier, "00000001_000.png");
        assert_eq!(
            first.labels,
            [Finding::Cardiomegaly].into_iter().collect::<LabelSet>()
        );
        assert_eq!(first.patient_id, 1);
        assert_eq!(first.patient_age, 58);
        assert_eq!(first.original_size, (2682, 2749));
        assert_eq!(first.pixel_spacing, (r64(0.143), r64(0.143)));

        assert_eq!(entries[1].patient_age, 58);
        assert_eq!(entries[1].labels.len(), 2);
        assert!(entries[2].labels.is_empty());
    }

    #[test]
    fn load_bboxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "BBox_List_2017.csv",
            &[
                BBOX_HEADER,
                "00013118_008.png,Atelectasis,225.08,547.01,86.77,79.18,,,",
                "00014716_007.png,Infiltrate,686.10,273.06,92.44,132.85,,,",
            ],
        );

        let bboxes = load_bbox_table(&path).unwrap();
        assert_eq!(bboxes.len(), 2);
        assert_eq!(bboxes[0].finding, Finding::Atelectasis);
        assert_eq!(bboxes[0].x, r64(225.08));
        assert_eq!(bboxes[1].finding, Finding::Infiltration);
        assert_eq!(bboxes[1].h, r64(132.85));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_metadata_table(dir.path().join("missing.csv"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn wrong_column_count() {
        let dir = tempfile::tempdir().unwrap();

        // a row shorter than the header
        let path = write_file(
            dir.path(),
            "short_row.csv",
            &[
                METADATA_HEADER,
                "00000001_000.png,Cardiomegaly,0,1,58,M,PA,2682,2749,0.143,0.143,",
                "00000001_001.png,Cardiomegaly,1,1,58,M",
            ],
        );
        assert!(matches!(
            load_metadata_table(&path),
            Err(LoadError::Csv { .. })
        ));

        // a table with too few columns
        let path = write_file(
            dir.path(),
            "narrow.csv",
            &["Image Index,Finding Labels", "00000001_000.png,Mass"],
        );
        assert!(matches!(
            load_metadata_table(&path),
            Err(LoadError::ColumnCount {
                expect: METADATA_COLUMNS,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn invalid_fields() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_file(
            dir.path(),
            "bad_label.csv",
            &[
                METADATA_HEADER,
                "00000001_000.png,Flu,0,1,58,M,PA,2682,2749,0.143,0.143,",
            ],
        );
        assert!(matches!(
            load_metadata_table(&path),
            Err(LoadError::InvalidLabel { line: 2, .. })
        ));

        let path = write_file(
            dir.path(),
            "bad_number.csv",
            &[BBOX_HEADER, "00013118_008.png,Mass,abc,547.01,86.77,79.18,,,"],
        );
        assert!(matches!(
            load_bbox_table(&path),
            Err(LoadError::InvalidField {
                column: "box x",
                ..
            })
        ));
    }
}
