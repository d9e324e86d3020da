//! Loss functions for semi-supervised semantic segmentation.
//!
//! ## Losses
//!
//! - **[`SegmentationCrossEntropyLoss`]**: supervised cross-entropy with an
//!   ignore index, logits resized to the label resolution
//! - **[`PseudoLabelLoss`]**: cross-entropy on teacher pseudo-labels,
//!   weighted per sample by the share of confidently labelled pixels
//! - **[`RegionalContrastLoss`]**: contrast hard pixel queries against their
//!   class prototype and negatives sampled by prototype similarity
//!
//! ## Usage Example
//!
//! ```rust
//! use semiseg_loss::{PseudoLabelLossConfig, RegionalContrastLossConfig};
//!
//! let unsupervised = PseudoLabelLossConfig::new().with_strong_threshold(0.9).init();
//! let contrast = RegionalContrastLossConfig::new()
//!     .with_num_queries(128)
//!     .with_seed(Some(0))
//!     .init();
//! # let _ = (unsupervised, contrast);
//! ```

mod cross_entropy;
mod pseudo_label;
mod regional_contrast;

pub use cross_entropy::{
    pixel_cross_entropy, SegmentationCrossEntropyLoss, SegmentationCrossEntropyLossConfig,
};
pub use pseudo_label::{PseudoLabelLoss, PseudoLabelLossConfig};
pub use regional_contrast::{RegionalContrastLoss, RegionalContrastLossConfig};
