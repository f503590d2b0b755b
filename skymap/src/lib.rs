//! Multi-layer sky maps for gamma-ray analysis
//!
//! This crate provides sky directions, HEALPix and planar WCS projections,
//! the [`SkyMap`] pixel grid with bilinear sampling and map arithmetic, and
//! FITS persistence through an in-memory HDU container.

pub mod config;
pub mod error;
pub mod interpolation;
pub mod io;
pub mod map;
pub mod pixel;
pub mod projection;
pub mod sky_dir;

// Re-exports for easier access
pub use config::{HealpixGeometry, MapDefinition, WcsGeometry};
pub use error::SkyMapError;
pub use interpolation::{CacheStats, Interpolator};
pub use io::{FitsContainer, FitsError};
pub use map::SkyMap;
pub use pixel::SkyPixel;
pub use projection::{Cartographic, Healpix, HealpixOrdering, Projection, ProjectionRegistry, Wcs};
pub use sky_dir::{CoordSystem, SkyDir};
