//! Serializable map geometry definitions.
//!
//! Geometries are plain data so they can live in JSON configuration files
//! next to analysis scripts and be turned into empty maps on demand.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SkyMapError;
use crate::map::SkyMap;
use crate::projection::HealpixOrdering;
use crate::sky_dir::CoordSystem;

/// Geometry of a planar (WCS) sky map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WcsGeometry {
    /// Three letter projection code, e.g. "CAR" or "TAN"
    pub projection: String,

    /// Coordinate system of the map axes
    pub coords: CoordSystem,

    /// Longitude and latitude of the map centre in degrees
    pub center: [f64; 2],

    /// Pixel scale along x and y in degrees (x is usually negative for sky maps)
    pub binsize: [f64; 2],

    /// Number of pixels along x
    pub nx: usize,

    /// Number of pixels along y
    pub ny: usize,
}

impl WcsGeometry {
    pub fn new(
        projection: &str,
        coords: CoordSystem,
        center: [f64; 2],
        binsize: [f64; 2],
        nx: usize,
        ny: usize,
    ) -> Self {
        Self {
            projection: projection.to_string(),
            coords,
            center,
            binsize,
            nx,
            ny,
        }
    }
}

/// Geometry of a HEALPix sky map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealpixGeometry {
    pub coords: CoordSystem,
    pub nside: usize,
    pub ordering: HealpixOrdering,
}

/// Either kind of map geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MapDefinition {
    Healpix(HealpixGeometry),
    Wcs(WcsGeometry),
}

impl MapDefinition {
    /// Create a zero-filled map with `num_layers` layers.
    pub fn build(&self, num_layers: usize) -> Result<SkyMap, SkyMapError> {
        match self {
            MapDefinition::Healpix(g) => {
                SkyMap::new_healpix(g.coords, g.nside, g.ordering, num_layers)
            }
            MapDefinition::Wcs(g) => SkyMap::new_wcs(g, num_layers),
        }
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SkyMapError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, SkyMapError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
