//! Conversions between images and tensors and simple drawing on tensors.

use crate::common::*;
use image::RgbImage;

/// Convert an RGB image to a `[3, H, W]` tensor of bytes.
pub fn rgb_to_tensor(image: &RgbImage) -> Tensor {
    let (width, height) = image.dimensions();
    Tensor::of_slice(image.as_raw())
        .view([height as i64, width as i64, 3])
        .permute(&[2, 0, 1])
        .contiguous()
}

/// Convert a `[3, H, W]` tensor with values in [0, 1] to an RGB image.
pub fn tensor_to_rgb(tensor: &Tensor) -> Option<RgbImage> {
    let size = tensor.size();
    let (height, width) = match *size.as_slice() {
        [3, h, w] => (h, w),
        _ => return None,
    };

    let bytes = tch::no_grad(|| {
        let scaled = tensor
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .clamp(0.0, 1.0)
            * 255.0;
        scaled
            .round()
            .to_kind(Kind::Uint8)
            .permute(&[1, 2, 0])
            .contiguous()
            .view([-1])
    });
    let bytes = Vec::<u8>::from(&bytes);
    RgbImage::from_raw(width as u32, height as u32, bytes)
}

/// Drawing operations on `[C, H, W]` image tensors.
pub trait DrawExt {
    /// Fill the rectangle with the color, clipped to the image.
    fn fill_rect_(&mut self, top: i64, left: i64, bottom: i64, right: i64, color: &[f32]);

    /// Draw the border of the rectangle with the color, clipped to the image.
    fn draw_rect_(
        &mut self,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
        stroke: i64,
        color: &[f32],
    );
}

impl DrawExt for Tensor {
    fn fill_rect_(&mut self, top: i64, left: i64, bottom: i64, right: i64, color: &[f32]) {
        let size = self.size();
        let (height, width) = (size[1], size[2]);
        let top = top.clamp(0, height);
        let bottom = bottom.clamp(0, height);
        let left = left.clamp(0, width);
        let right = right.clamp(0, width);
        if top >= bottom || left >= right {
            return;
        }

        tch::no_grad(|| {
            color.iter().enumerate().for_each(|(channel, &value)| {
                let _ = self
                    .i((channel as i64, top..bottom, left..right))
                    .fill_(value as f64);
            });
        });
    }

    fn draw_rect_(
        &mut self,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
        stroke: i64,
        color: &[f32],
    ) {
        let half = stroke / 2;
        let (outer_t, outer_l, outer_b, outer_r) =
            (top - half, left - half, bottom + half, right + half);
        let (inner_t, inner_l, inner_b, inner_r) = (
            outer_t + stroke,
            outer_l + stroke,
            outer_b - stroke,
            outer_r - stroke,
        );

        // t, l, b, r edges
        self.fill_rect_(outer_t, outer_l, inner_t, outer_r, color);
        self.fill_rect_(outer_t, outer_l, outer_b, inner_l, color);
        self.fill_rect_(inner_b, outer_l, outer_b, outer_r, color);
        self.fill_rect_(outer_t, inner_r, outer_b, outer_r, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tensor_conversion() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(3, 1, image::Rgb([255, 0, 128]));

        let tensor = rgb_to_tensor(&image);
        assert_eq!(tensor.size(), [3, 2, 4]);
        assert_eq!(tensor.int64_value(&[0, 1, 3]), 255);
        assert_eq!(tensor.int64_value(&[2, 1, 3]), 128);

        let back = tensor_to_rgb(&(tensor.to_kind(Kind::Float) / 255.0)).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn draw_border() {
        let mut canvas = Tensor::zeros(&[3, 10, 10], (Kind::Float, Device::Cpu));
        canvas.draw_rect_(2, 2, 8, 8, 2, &[1.0, 0.5, 0.0]);

        // on the border
        assert_eq!(canvas.double_value(&[0, 2, 5]), 1.0);
        assert_eq!(canvas.double_value(&[1, 5, 2]), 0.5);
        // inside
        assert_eq!(canvas.double_value(&[0, 5, 5]), 0.0);

        // clipped at image bounds
        canvas.draw_rect_(-5, -5, 20, 20, 2, &[1.0, 1.0, 1.0]);
        assert_eq!(canvas.size(), [3, 10, 10]);
    }
}
