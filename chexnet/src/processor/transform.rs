//! The per-sample image pipeline: decoding, cropping, augmentation and normalization.

use super::{rgb_to_tensor, RandomRotation, RandomRotationInit};
use crate::common::*;
use image::{imageops, imageops::FilterType, io::Reader as ImageReader, RgbImage};

/// Channel means of the ImageNet training set.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Channel standard deviations of the ImageNet training set.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const CROP_ATTEMPTS: usize = 10;

/// Options of [ImageTransform].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTransformInit {
    /// The output image height and width.
    pub image_size: usize,
    /// The shorter side is resized to this length before center cropping in
    /// evaluation mode.
    pub resize_size: usize,
    /// The area range of random crops relative to the source image.
    pub crop_scale: (R64, R64),
    /// The aspect ratio range of random crops.
    pub crop_ratio: (R64, R64),
    /// The probability of a horizontal flip.
    pub horizontal_flip_prob: R64,
    /// The maximum random rotation in degrees.
    pub rotate_degrees: Option<R64>,
    pub mean: [R64; 3],
    pub std: [R64; 3],
}

impl Default for ImageTransformInit {
    fn default() -> Self {
        Self {
            image_size: 224,
            resize_size: 256,
            crop_scale: (r64(0.08), r64(1.0)),
            crop_ratio: (r64(3.0 / 4.0), r64(4.0 / 3.0)),
            horizontal_flip_prob: r64(0.5),
            rotate_degrees: None,
            mean: IMAGENET_MEAN.map(|v| r64(v as f64)),
            std: IMAGENET_STD.map(|v| r64(v as f64)),
        }
    }
}

impl ImageTransformInit {
    pub fn build(self) -> Result<ImageTransform, ConfigError> {
        let Self {
            image_size,
            resize_size,
            crop_scale: (scale_min, scale_max),
            crop_ratio: (ratio_min, ratio_max),
            horizontal_flip_prob,
            rotate_degrees,
            mean,
            std,
        } = self;

        crate::ensure_config!(image_size > 0, "image_size", "must be positive");
        crate::ensure_config!(
            resize_size >= image_size,
            "resize_size",
            "must not be less than image_size {}, but get {}",
            image_size,
            resize_size
        );
        crate::ensure_config!(
            scale_min > 0.0 && scale_min <= scale_max && scale_max <= 1.0,
            "crop_scale",
            "expect 0 < min <= max <= 1, but get ({}, {})",
            scale_min,
            scale_max
        );
        crate::ensure_config!(
            ratio_min > 0.0 && ratio_min <= ratio_max,
            "crop_ratio",
            "expect 0 < min <= max, but get ({}, {})",
            ratio_min,
            ratio_max
        );
        crate::ensure_config!(
            (0.0..=1.0).contains(&horizontal_flip_prob.raw()),
            "horizontal_flip_prob",
            "must be in range [0, 1], but get {}",
            horizontal_flip_prob
        );
        crate::ensure_config!(
            std.iter().all(|&std| std > 0.0),
            "std",
            "must be positive"
        );

        let rotation = rotate_degrees
            .map(|max_degrees| RandomRotationInit { max_degrees }.build())
            .transpose()?;

        Ok(ImageTransform {
            image_size: image_size as u32,
            resize_size: resize_size as u32,
            crop_scale: (scale_min.raw(), scale_max.raw()),
            crop_log_ratio: (ratio_min.raw().ln(), ratio_max.raw().ln()),
            horizontal_flip_prob: horizontal_flip_prob.raw(),
            rotation,
            mean: Tensor::of_slice(&mean.map(|v| v.raw() as f32)).view([3, 1, 1]),
            std: Tensor::of_slice(&std.map(|v| v.raw() as f32)).view([3, 1, 1]),
        })
    }
}

/// Turns image files into normalized `[3, S, S]` float tensors.
#[derive(Debug)]
pub struct ImageTransform {
    image_size: u32,
    resize_size: u32,
    crop_scale: (f64, f64),
    crop_log_ratio: (f64, f64),
    horizontal_flip_prob: f64,
    rotation: Option<RandomRotation>,
    mean: Tensor,
    std: Tensor,
}

impl ImageTransform {
    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    /// Load an image file and transform it.
    ///
    /// Random augmentation is applied only in [Mode::Train].
    pub fn load<R>(&self, path: &Path, mode: Mode, rng: &mut R) -> Result<Tensor, ImageLoadError>
    where
        R: Rng + ?Sized,
    {
        let image = load_rgb(path)?;
        Ok(self.forward(&image, mode, rng))
    }

    /// Transform a decoded image.
    pub fn forward<R>(&self, image: &RgbImage, mode: Mode, rng: &mut R) -> Tensor
    where
        R: Rng + ?Sized,
    {
        let image = match mode {
            Mode::Train => self.train_geometry(image, rng),
            Mode::Eval => self.eval_geometry(image),
        };

        tch::no_grad(|| {
            let tensor = rgb_to_tensor(&image).to_kind(Kind::Float) / 255.0;
            let tensor = match (&self.rotation, mode) {
                (Some(rotation), Mode::Train) => rotation.forward(&tensor, rng),
                _ => tensor,
            };
            (tensor - &self.mean) / &self.std
        })
    }

    /// Random resized crop followed by a random horizontal flip.
    fn train_geometry<R>(&self, image: &RgbImage, rng: &mut R) -> RgbImage
    where
        R: Rng + ?Sized,
    {
        let size = self.image_size;
        let (x, y, w, h) = self.sample_crop(image.dimensions(), rng);
        let cropped = imageops::crop_imm(image, x, y, w, h).to_image();
        let resized = imageops::resize(&cropped, size, size, FilterType::Triangle);

        if rng.gen_bool(self.horizontal_flip_prob) {
            imageops::flip_horizontal(&resized)
        } else {
            resized
        }
    }

    /// Resize the shorter side then crop the center.
    fn eval_geometry(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let short = width.min(height).max(1) as f64;
        let scale = self.resize_size as f64 / short;
        let new_w = ((width as f64 * scale).round() as u32).max(self.image_size);
        let new_h = ((height as f64 * scale).round() as u32).max(self.image_size);

        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        let x = (new_w - self.image_size) / 2;
        let y = (new_h - self.image_size) / 2;
        imageops::crop_imm(&resized, x, y, self.image_size, self.image_size).to_image()
    }

    /// Sample a crop window as (x, y, width, height).
    fn sample_crop<R>(&self, (width, height): (u32, u32), rng: &mut R) -> (u32, u32, u32, u32)
    where
        R: Rng + ?Sized,
    {
        let area = (width * height) as f64;
        let (scale_min, scale_max) = self.crop_scale;
        let (log_ratio_min, log_ratio_max) = self.crop_log_ratio;

        for _ in 0..CROP_ATTEMPTS {
            let target_area = area * rng.gen_range(scale_min..=scale_max);
            let ratio = rng.gen_range(log_ratio_min..=log_ratio_max).exp();
            let w = (target_area * ratio).sqrt().round() as u32;
            let h = (target_area / ratio).sqrt().round() as u32;

            if (1..=width).contains(&w) && (1..=height).contains(&h) {
                let x = rng.gen_range(0..=(width - w));
                let y = rng.gen_range(0..=(height - h));
                return (x, y, w, h);
            }
        }

        // fall back to the largest centered square
        let side = width.min(height);
        ((width - side) / 2, (height - side) / 2, side, side)
    }
}

/// Decode an image file into RGB pixels.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageLoadError> {
    let image = ImageReader::open(path)
        .map_err(|err| ImageLoadError::new(path, err))?
        .with_guessed_format()
        .map_err(|err| ImageLoadError::new(path, err))?
        .decode()
        .map_err(|err| ImageLoadError::new(path, err))?;
    Ok(image.to_rgb8())
}
