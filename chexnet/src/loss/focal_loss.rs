use crate::common::*;

/// Options of [FocalLoss].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FocalLossInit {
    /// The weight of positive targets in [0, 1]. Negatives get `1 - alpha`.
    pub alpha: Option<R64>,
    /// The focusing exponent. The loss reduces to binary cross entropy at 0.
    pub gamma: R64,
}

impl Default for FocalLossInit {
    fn default() -> Self {
        Self {
            alpha: Some(r64(0.25)),
            gamma: r64(2.0),
        }
    }
}

impl FocalLossInit {
    pub fn build(self) -> Result<FocalLoss, ConfigError> {
        let Self { alpha, gamma } = self;

        if let Some(alpha) = alpha {
            crate::ensure_config!(
                (0.0..=1.0).contains(&alpha.raw()),
                "alpha",
                "must be in range [0, 1], but get {}",
                alpha
            );
        }
        crate::ensure_config!(gamma >= 0.0, "gamma", "must be non-negative");

        Ok(FocalLoss {
            alpha: alpha.map(|alpha| alpha.raw()),
            gamma: gamma.raw(),
        })
    }
}

/// The sigmoid focal loss on logits, averaged over elements.
#[derive(Debug)]
pub struct FocalLoss {
    alpha: Option<f64>,
    gamma: f64,
}

impl FocalLoss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );

        let Self { alpha, gamma } = *self;

        let ce_loss = input.binary_cross_entropy_with_logits::<&Tensor>(
            target,
            None,
            None,
            Reduction::None,
        );
        let prob = input.sigmoid();
        let neg_target = -target + 1.0;
        let p_t = &prob * target + (-&prob + 1.0) * &neg_target;
        let loss = ce_loss * (-p_t + 1.0).pow(&Tensor::from(gamma));
        let loss = match alpha {
            Some(alpha) => loss * (target * alpha + neg_target * (1.0 - alpha)),
            None => loss,
        };

        loss.mean(Kind::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::BceWithLogitsLossInit;

    #[test]
    fn reduce_to_bce() {
        let input = Tensor::randn(&[8, NUM_FINDINGS as i64], (Kind::Float, Device::Cpu));
        let target = Tensor::rand(&[8, NUM_FINDINGS as i64], (Kind::Float, Device::Cpu)).round();

        let focal = FocalLossInit {
            alpha: None,
            gamma: r64(0.0),
        }
        .build()
        .unwrap();
        let bce = BceWithLogitsLossInit::default(Reduction::Mean).build();

        let lhs = f64::from(&focal.forward(&input, &target));
        let rhs = f64::from(&bce.forward(&input, &target));
        assert!((lhs - rhs).abs() < 1e-5);
    }

    #[test]
    fn down_weight_easy_examples() {
        let focal = FocalLossInit {
            alpha: None,
            ..Default::default()
        }
        .build()
        .unwrap();
        let bce = BceWithLogitsLossInit::default(Reduction::Mean).build();

        // confident and correct
        let input = Tensor::of_slice(&[4f32, -4.0]).view([1, 2]);
        let target = Tensor::of_slice(&[1f32, 0.0]).view([1, 2]);
        let focal_loss = f64::from(&focal.forward(&input, &target));
        let bce_loss = f64::from(&bce.forward(&input, &target));
        assert!(focal_loss < bce_loss * 0.01);
    }

    #[test]
    fn reject_invalid_options() {
        let err = FocalLossInit {
            alpha: Some(r64(1.5)),
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert_eq!(err.field, "alpha");

        let err = FocalLossInit {
            gamma: r64(-1.0),
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert_eq!(err.field, "gamma");
    }
}
