use semiseg_ops::OpsError;
use thiserror::Error;

/// Error type for mixed batch normalization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormError {
    /// The source/target mixing ratio must lie in `[0, 1]`.
    #[error("Mixing ratio must be in [0, 1], got {ratio}")]
    RatioOutOfRange {
        /// The rejected ratio.
        ratio: f64,
    },

    /// Only the replace mixing mode (`0`) exists.
    #[error("Unsupported mixing mode {mode}: only mode 0 (replace) is implemented")]
    UnsupportedMixMode {
        /// The rejected mode index.
        mode: u8,
    },

    /// Momentum must lie in `[0, 1]`.
    #[error("Momentum must be in [0, 1], got {momentum}")]
    MomentumOutOfRange {
        /// The rejected momentum.
        momentum: f64,
    },

    /// Splitting or merging the mixed batch failed.
    #[error(transparent)]
    Domain(#[from] OpsError),
}

/// A specialized `Result` type for normalization operations.
pub type NormResult<T> = Result<T, NormError>;
