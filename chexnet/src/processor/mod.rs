//! Data preprocessing building blocks.

pub mod draw;
pub mod random_affine;
pub mod transform;

pub use draw::*;
pub use random_affine::*;
pub use transform::*;
