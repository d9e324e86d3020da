//! Tensor helpers for mixed-domain and semi-supervised segmentation training.
//!
//! Burn covers the dense tensor algebra; this crate adds the pieces the
//! training components need on top of it:
//!
//! - **[`DomainSplit`]**: partition a mixed batch by domain and merge it back
//!   in the original row order
//! - **[`label_onehot`]**: integer label maps to one-hot class maps
//! - **[`cosine_similarity`]**: cosine similarity along an axis
//! - **[`resize`]**: nearest/bilinear resizing with an `align_corners` switch
//! - **[`Categorical`]** and **[`negative_index_sampler`]**: inverse-CDF
//!   sampling of negative classes and of indices within class pools

mod domain;
mod error;
mod one_hot;
mod resize;
mod sampling;
mod similarity;

pub use domain::{index_tensor, Domain, DomainSplit};
pub use error::{OpsError, OpsResult};
pub use one_hot::label_onehot;
pub use resize::{resize, resize_labels, ResizeMode};
pub use sampling::{negative_index_sampler, Categorical};
pub use similarity::{cosine_similarity, COSINE_EPS};
