use crate::common::*;

/// Options of [RandomRotation].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomRotationInit {
    /// The rotation angle is sampled uniformly from -degrees to +degrees.
    pub max_degrees: R64,
}

impl RandomRotationInit {
    pub fn build(self) -> Result<RandomRotation, ConfigError> {
        let Self { max_degrees } = self;
        crate::ensure_config!(
            (0.0..=180.0).contains(&max_degrees.raw()),
            "rotate_degrees",
            "must be in range [0, 180], but get {}",
            max_degrees
        );

        Ok(RandomRotation {
            max_radians: max_degrees.raw().to_radians(),
        })
    }
}

/// Rotates an image tensor by a random angle around its center.
///
/// Pixels outside of the source image are filled with zeros.
#[derive(Debug, Clone)]
pub struct RandomRotation {
    max_radians: f64,
}

impl RandomRotation {
    pub fn max_radians(&self) -> f64 {
        self.max_radians
    }

    /// Rotate a `[C, H, W]` float tensor.
    pub fn forward<R>(&self, image: &Tensor, rng: &mut R) -> Tensor
    where
        R: Rng + ?Sized,
    {
        if self.max_radians == 0.0 {
            return image.shallow_clone();
        }
        let angle = rng.gen_range(-self.max_radians..=self.max_radians);
        rotate(image, angle)
    }
}

/// Rotate a `[C, H, W]` float tensor by `angle` radians around its center.
pub fn rotate(image: &Tensor, angle: f64) -> Tensor {
    tch::no_grad(|| {
        let size = image.size();
        let (channels, height, width) = (size[0], size[1], size[2]);
        let device = image.device();

        let cos = angle.cos() as f32;
        let sin = angle.sin() as f32;
        #[rustfmt::skip]
        let theta = Tensor::of_slice(&[
            cos, -sin, 0.0, // row 1
            sin, cos, 0.0,  // row 2
        ])
        .view([1, 2, 3])
        .to_device(device);

        let grid = Tensor::affine_grid_generator(&theta, &[1, channels, height, width], false);
        image
            .view([1, channels, height, width])
            // bilinear interpolation, zero padding
            .grid_sampler(&grid, 0, 0, false)
            .view([channels, height, width])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_angle_is_identity() {
        let image = Tensor::rand(&[3, 8, 8], (Kind::Float, Device::Cpu));
        let rotated = rotate(&image, 0.0);
        assert_eq!(rotated.size(), [3, 8, 8]);
        let diff = f64::from(&(rotated - &image).abs().max());
        assert!(diff < 1e-5);
    }

    #[test]
    fn keep_shape() {
        let rotation = RandomRotationInit {
            max_degrees: r64(10.0),
        }
        .build()
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let image = Tensor::ones(&[3, 16, 12], (Kind::Float, Device::Cpu));
        let rotated = rotation.forward(&image, &mut rng);
        assert_eq!(rotated.size(), [3, 16, 12]);

        assert!(RandomRotationInit {
            max_degrees: r64(-1.0)
        }
        .build()
        .is_err());
    }
}
