use serde::{Deserialize, Serialize};

/// Selects the behavior of components that act differently while training.
///
/// It is passed explicitly to the dataset adapter, the batch loader and the
/// model instead of being toggled on shared objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Random augmentation, shuffled batches, dropout and batch statistics.
    Train,
    /// Deterministic preprocessing, fixed order and running statistics.
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Self::Train
    }
}
