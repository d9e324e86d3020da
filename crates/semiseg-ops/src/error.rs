//! Error types for the tensor helpers.

use thiserror::Error;

/// Error type for domain bookkeeping and sampling helpers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpsError {
    /// A domain label was neither `0` (source) nor `1` (target).
    #[error("Invalid domain label {label}: expected 0 (source) or 1 (target)")]
    InvalidDomainLabel {
        /// The offending label.
        label: i64,
    },

    /// The domain vector does not cover the batch dimension exactly.
    #[error("Domain labels cover {expected} samples but the batch has {actual}")]
    DomainLengthMismatch {
        /// Number of domain labels.
        expected: usize,
        /// Batch dimension of the tensor.
        actual: usize,
    },

    /// A batch without any sample cannot be split.
    #[error("Cannot build a domain split for an empty batch")]
    EmptyBatch,

    /// A subset passed to `merge` does not match the split it came from.
    #[error("Merge mismatch for {domain} subset: expected {expected} rows, got {actual}")]
    MergeMismatch {
        /// Which side of the split.
        domain: &'static str,
        /// Rows recorded by the split.
        expected: usize,
        /// Rows provided to merge.
        actual: usize,
    },

    /// A categorical distribution needs at least one finite, positive weight.
    #[error("Categorical distribution has no positive mass ({len} weights)")]
    EmptyDistribution {
        /// Number of weights provided.
        len: usize,
    },
}

/// A specialized `Result` type for tensor helper operations.
pub type OpsResult<T> = Result<T, OpsError>;
