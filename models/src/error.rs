use skymap::SkyMapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The model cannot serve the request, e.g. sampling a map without flux.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Sky map error: {0}")]
    SkyMap(#[from] SkyMapError),
}
