//! Error types for the semi-supervised training components.

use std::path::PathBuf;

use semiseg_norm::NormError;
use semiseg_ops::OpsError;
use thiserror::Error;

/// Error type for ReCo training.
#[derive(Error, Debug)]
pub enum SemiSegError {
    /// A configuration value is out of range or inconsistent with another one.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// Error raised while building or running a mixed batch normalization layer.
    #[error(transparent)]
    Norm(#[from] NormError),

    /// Error raised by a tensor helper.
    #[error(transparent)]
    Ops(#[from] OpsError),

    /// A configuration file could not be read or parsed.
    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigLoad {
        /// The configuration file.
        path: PathBuf,
        /// The underlying reader or parser message.
        reason: String,
    },
}

/// A specialized `Result` type for ReCo training.
pub type SemiSegResult<T> = Result<T, SemiSegError>;
