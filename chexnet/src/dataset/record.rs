use crate::common::*;

/// One row of the image metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// The image file name, e.g. "00000001_000.png".
    pub identifier: String,
    pub labels: LabelSet,
    pub follow_up: u32,
    pub patient_id: u32,
    pub patient_age: u32,
    pub patient_gender: String,
    pub view_position: String,
    /// Original image size in (width, height) pixels.
    pub original_size: (u32, u32),
    /// Original pixel spacing in (x, y).
    pub pixel_spacing: (R64, R64),
}

/// One row of the bounding box table, in original image pixel units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub identifier: String,
    pub finding: Finding,
    pub x: R64,
    pub y: R64,
    pub w: R64,
    pub h: R64,
}

impl BoundingBox {
    /// The box as (top, left, bottom, right).
    pub fn tlbr(&self) -> [R64; 4] {
        [self.y, self.x, self.y + self.h, self.x + self.w]
    }

    /// Scale the box from the original image size to another size.
    pub fn rescale(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        let sx = r64(to.0 as f64 / from.0 as f64);
        let sy = r64(to.1 as f64 / from.1 as f64);
        Self {
            x: self.x * sx,
            y: self.y * sy,
            w: self.w * sx,
            h: self.h * sy,
            ..self.clone()
        }
    }
}

/// An image resolved to a file, with its labels and boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub entry: MetadataEntry,
    pub bboxes: Vec<BoundingBox>,
}

impl ImageRecord {
    pub fn identifier(&self) -> &str {
        &self.entry.identifier
    }

    pub fn labels(&self) -> LabelSet {
        self.entry.labels
    }

    pub fn label_vector(&self) -> LabelVector {
        self.entry.labels.to_vector()
    }

    pub fn patient_id(&self) -> u32 {
        self.entry.patient_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_geometry() {
        let bbox = BoundingBox {
            identifier: "00000001_000.png".into(),
            finding: Finding::Mass,
            x: r64(100.0),
            y: r64(50.0),
            w: r64(20.0),
            h: r64(10.0),
        };
        assert_eq!(bbox.tlbr(), [r64(50.0), r64(100.0), r64(60.0), r64(120.0)]);

        let scaled = bbox.rescale((1024, 1024), (256, 512));
        assert_eq!(scaled.x, r64(25.0));
        assert_eq!(scaled.y, r64(25.0));
        assert_eq!(scaled.w, r64(5.0));
        assert_eq!(scaled.h, r64(5.0));
        assert_eq!(scaled.finding, Finding::Mass);
    }
}
