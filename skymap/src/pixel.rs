//! Pixel addresses for one- and two-dimensional sky maps.

use std::fmt;

/// A pixel of a sky map.
///
/// HEALPix maps address pixels through a single linear index while planar
/// maps use (x, y) coordinates. Planar coordinates are continuous so that
/// positions inside a pixel can be expressed; integer values are pixel
/// centres and the pixel extends half a pixel in each direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkyPixel {
    Index(f64),
    Xy { x: f64, y: f64 },
}

impl SkyPixel {
    pub fn index(index: usize) -> Self {
        SkyPixel::Index(index as f64)
    }

    pub fn xy(x: f64, y: f64) -> Self {
        SkyPixel::Xy { x, y }
    }

    /// Dimensionality of the pixel address (1 or 2).
    pub fn dimension(&self) -> usize {
        match self {
            SkyPixel::Index(_) => 1,
            SkyPixel::Xy { .. } => 2,
        }
    }

    pub fn is_1d(&self) -> bool {
        self.dimension() == 1
    }

    pub fn is_2d(&self) -> bool {
        self.dimension() == 2
    }
}

impl fmt::Display for SkyPixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkyPixel::Index(index) => write!(f, "{index}"),
            SkyPixel::Xy { x, y } => write!(f, "({x},{y})"),
        }
    }
}
