use crate::common::*;

#[derive(Debug)]
pub struct BceWithLogitsLossInit {
    /// Per-class weights of positive targets, in `[num_classes]` shape.
    pub pos_weight: Option<Tensor>,
    pub reduction: Reduction,
}

impl BceWithLogitsLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            pos_weight: None,
            reduction,
        }
    }

    pub fn build(self) -> BceWithLogitsLoss {
        let Self {
            pos_weight,
            reduction,
        } = self;

        BceWithLogitsLoss {
            pos_weight,
            reduction,
        }
    }
}

/// Binary cross entropy on logits, computed per class.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    pos_weight: Option<Tensor>,
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        // assume [batch_size, n_classes] shape
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );
        debug_assert!(
            bool::from(&target.ge(0.0).logical_and(&target.le(1.0)).all()),
            "target values must be in range of [0.0, 1.0]"
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.numel() == 0 && self.reduction == Reduction::Mean {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        input.binary_cross_entropy_with_logits(
            target,
            None::<&Tensor>,
            self.pos_weight.as_ref(),
            self.reduction,
        )
    }
}
