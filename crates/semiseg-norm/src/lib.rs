//! Domain-mixed batch normalization for Burn.
//!
//! [`MixBatchNorm`] keeps one set of running statistics per domain and, at
//! training time, normalizes the source part of a mixed batch with statistics
//! blended towards the target part. See the [module documentation](mix_batch_norm)
//! for the exact update rules.

mod error;
pub mod mix_batch_norm;

pub use error::{NormError, NormResult};
pub use mix_batch_norm::{MixBatchNorm, MixBatchNormConfig, MixMode, Statistics};
pub use semiseg_ops::{Domain, DomainSplit};
