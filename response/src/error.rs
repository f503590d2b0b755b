use skymap::{FitsError, SkyMapError};
use thiserror::Error;

/// Errors raised while building, reading or evaluating response cubes.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} {index} is outside the valid range [0, {size})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        size: usize,
    },

    /// Wrong runtime object, e.g. an observation without event list or a
    /// response lacking the instrument capability.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Size mismatch: {0}")]
    SizeMismatch(String),

    #[error("Sky map error: {0}")]
    SkyMap(#[from] SkyMapError),

    #[error("FITS error: {0}")]
    Fits(#[from] FitsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}
