//! Mean-teacher semi-supervised segmentation with regional contrast (ReCo).
//!
//! - **[`SegmentationModel`]**: the network contract, logits plus dense
//!   representations
//! - **[`EmaTeacher`]**: exponential-moving-average copy of a student module
//! - **[`ReCo`]**: one semi-supervised training step over a labeled and an
//!   unlabeled batch
//! - **[`ReCoConfig`]**: thresholds, sampling sizes and loss weights
//! - **[`LinearProbeSegmenter`]**: a small reference network

mod config;
mod ema;
mod error;
mod model;
mod probe;
mod reco;

pub use config::{load_config, ReCoConfig};
pub use ema::EmaTeacher;
pub use error::{SemiSegError, SemiSegResult};
pub use model::{LabeledBatch, SegmentationModel, SegmentationOutput, UnlabeledBatch};
pub use probe::{LinearProbeSegmenter, LinearProbeSegmenterConfig};
pub use reco::{PseudoLabels, ReCo, ReCoOutput};
