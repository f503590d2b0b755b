//! Error type shared by projections, sky maps and their persistence.

use thiserror::Error;

use crate::io::FitsError;

/// Errors raised by sky map operations.
///
/// Directions that fall outside a map footprint are not errors; sampling
/// such a direction yields zero. Everything listed here is reported to the
/// caller immediately.
#[derive(Debug, Error)]
pub enum SkyMapError {
    /// Malformed constructor parameters or mismatched pixel dimensionality.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index or pixel outside the valid bounds.
    #[error("{what} {index} is outside the valid range [0, {size})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        size: usize,
    },

    /// Semantically wrong runtime value (unknown code, division by zero, ...).
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Persisted data inconsistent with the declared geometry.
    #[error("Size mismatch: {0}")]
    SizeMismatch(String),

    /// Direction or pixel that a projection cannot represent.
    #[error("Projection singularity: {0}")]
    Singularity(String),

    #[error("FITS error: {0}")]
    Fits(#[from] FitsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl SkyMapError {
    pub(crate) fn out_of_range(what: &'static str, index: usize, size: usize) -> Self {
        Self::OutOfRange { what, index, size }
    }
}
