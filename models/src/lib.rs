//! Monte Carlo sampling of sky maps
//!
//! A cumulative flux cache that draws map pixels in proportion to their flux,
//! and the diffuse map spatial model built on it.

pub mod diffuse_map;
pub mod error;
pub mod mc_cache;

// Re-exports for easier access
pub use diffuse_map::{DiffuseMapModel, MAX_REJECTION_DRAWS};
pub use error::ModelError;
pub use mc_cache::{McCache, CACHE_END};
