//! Domain-mixed normalization and regional contrastive semi-supervised
//! segmentation on Burn.
//!
//! This crate gathers the workspace members behind one dependency and adds
//! backend selection and a synthetic end-to-end run used by the CLI.

pub mod backend;
pub mod demo;

#[doc(inline)]
pub use semiseg_loss as loss;
#[doc(inline)]
pub use semiseg_model as model;
#[doc(inline)]
pub use semiseg_norm as norm;
#[doc(inline)]
pub use semiseg_ops as ops;
