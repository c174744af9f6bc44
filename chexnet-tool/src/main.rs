use anyhow::{ensure, format_err, Context, Result};
use chexnet::{
    dataset::{self, BoundingBox, ImageIndex, MetadataEntry},
    processor::{self, DrawExt as _},
};
use clap::Parser;
use image::imageops::FilterType;
use label::{Finding, NUM_FINDINGS};
use log::info;
use prettytable::{cell, row, Table};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tch::Kind;

#[derive(Debug, Clone, Parser)]
/// Explore the chest X-ray dataset.
enum Opts {
    /// Print per-finding image and box counts.
    Summary {
        /// image metadata table
        metadata_file: PathBuf,
        #[clap(long)]
        /// bounding box table
        bbox_file: Option<PathBuf>,
    },
    /// Draw the bounding boxes of an image into a PNG file.
    DrawBboxes {
        /// bounding box table
        bbox_file: PathBuf,
        /// root directory of image files
        image_dir: PathBuf,
        /// image file name, e.g. 00000001_000.png
        identifier: String,
        /// output PNG file
        output_file: PathBuf,
        #[clap(long, default_value = "**/*.png")]
        /// glob pattern of image files under the image directory
        image_pattern: String,
        #[clap(long)]
        /// resize the output to this side length
        size: Option<u32>,
        #[clap(long, default_value = "3")]
        /// border width in pixels
        stroke: i64,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Summary {
            metadata_file,
            bbox_file,
        } => summary(&metadata_file, bbox_file.as_deref())?,
        Opts::DrawBboxes {
            bbox_file,
            image_dir,
            identifier,
            output_file,
            image_pattern,
            size,
            stroke,
        } => draw_bboxes(
            &bbox_file,
            &image_dir,
            &image_pattern,
            &identifier,
            &output_file,
            size,
            stroke,
        )?,
    }

    Ok(())
}

fn summary(metadata_file: &Path, bbox_file: Option<&Path>) -> Result<()> {
    let entries = dataset::load_metadata_table(metadata_file)
        .with_context(|| format!("failed to load '{}'", metadata_file.display()))?;
    let bboxes = match bbox_file {
        Some(file) => dataset::load_bbox_table(file)
            .with_context(|| format!("failed to load '{}'", file.display()))?,
        None => vec![],
    };
    let summary = Summary::new(&entries, &bboxes);

    {
        let mut table = Table::new();
        table.add_row(row!["images", "patients", "no finding", "boxed images"]);
        table.add_row(row![
            summary.num_images,
            summary.num_patients,
            summary.num_no_finding,
            summary.num_boxed_images
        ]);
        table.printstd();
    }

    {
        let mut table = Table::new();
        table.add_row(row!["finding", "images", "ratio", "boxes"]);
        Finding::all().for_each(|finding| {
            let counts = &summary.findings[finding.index()];
            table.add_row(row![
                finding.name(),
                counts.images,
                format!("{:.4}", counts.images as f64 / summary.num_images.max(1) as f64),
                counts.boxes
            ]);
        });
        table.printstd();
    }

    Ok(())
}

fn draw_bboxes(
    bbox_file: &Path,
    image_dir: &Path,
    image_pattern: &str,
    identifier: &str,
    output_file: &Path,
    size: Option<u32>,
    stroke: i64,
) -> Result<()> {
    ensure!(stroke > 0, "stroke must be positive");

    let bboxes: Vec<_> = dataset::load_bbox_table(bbox_file)
        .with_context(|| format!("failed to load '{}'", bbox_file.display()))?
        .into_iter()
        .filter(|bbox| bbox.identifier == identifier)
        .collect();
    if bboxes.is_empty() {
        info!("'{}' has no bounding box", identifier);
    }

    let index = ImageIndex::scan(image_dir, image_pattern)?;
    let path = index
        .get(identifier)
        .ok_or_else(|| format_err!("'{}' is not found in '{}'", identifier, image_dir.display()))?;
    let image = processor::load_rgb(path)?;
    let original_size = image.dimensions();

    let (image, target_size) = match size {
        Some(size) => (
            image::imageops::resize(&image, size, size, FilterType::Triangle),
            (size, size),
        ),
        None => (image, original_size),
    };

    let mut canvas = processor::rgb_to_tensor(&image).to_kind(Kind::Float) / 255.0;
    for bbox in &bboxes {
        let [t, l, b, r] = bbox.rescale(original_size, target_size).tlbr();
        canvas.draw_rect_(
            t.raw().round() as i64,
            l.raw().round() as i64,
            b.raw().round() as i64,
            r.raw().round() as i64,
            stroke,
            &finding_color(bbox.finding),
        );
        info!(
            "{}: [t={:.1}, l={:.1}, b={:.1}, r={:.1}]",
            bbox.finding.name(),
            t,
            l,
            b,
            r
        );
    }

    let output = processor::tensor_to_rgb(&canvas)
        .ok_or_else(|| format_err!("unable to convert the canvas to an image"))?;
    output
        .save(output_file)
        .with_context(|| format!("failed to write '{}'", output_file.display()))?;
    info!("saved to '{}'", output_file.display());

    Ok(())
}

/// A fixed color per finding.
fn finding_color(finding: Finding) -> [f32; 3] {
    const PALETTE: [[f32; 3]; 7] = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.4, 1.0],
        [1.0, 1.0, 0.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, 0.5, 0.0],
    ];
    PALETTE[finding.index() % PALETTE.len()]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FindingCounts {
    images: usize,
    boxes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Summary {
    num_images: usize,
    num_patients: usize,
    num_no_finding: usize,
    num_boxed_images: usize,
    findings: [FindingCounts; NUM_FINDINGS],
}

impl Summary {
    fn new(entries: &[MetadataEntry], bboxes: &[BoundingBox]) -> Self {
        let mut findings = [FindingCounts::default(); NUM_FINDINGS];

        entries.iter().for_each(|entry| {
            entry
                .labels
                .iter()
                .for_each(|finding| findings[finding.index()].images += 1);
        });
        bboxes
            .iter()
            .for_each(|bbox| findings[bbox.finding.index()].boxes += 1);

        let num_patients = entries
            .iter()
            .map(|entry| entry.patient_id)
            .collect::<HashSet<_>>()
            .len();
        let num_boxed_images = bboxes
            .iter()
            .map(|bbox| bbox.identifier.as_str())
            .collect::<HashSet<_>>()
            .len();
        let num_no_finding = entries
            .iter()
            .filter(|entry| entry.labels.is_empty())
            .count();

        Self {
            num_images: entries.len(),
            num_patients,
            num_no_finding,
            num_boxed_images,
            findings,
        }
    }
}
