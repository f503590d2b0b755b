//! Sky projections: HEALPix pixelisation and planar WCS grids.
//!
//! [`Projection`] is the closed set of pixelisations a [`crate::SkyMap`] can
//! sit on. Planar projections resolve their cartographic transform through
//! the [`ProjectionRegistry`].

pub mod cartographic;
pub mod healpix;
pub mod registry;
pub mod wcs;

use std::fmt;

pub use cartographic::Cartographic;
pub use healpix::{Healpix, HealpixOrdering};
pub use registry::ProjectionRegistry;
pub use wcs::Wcs;

use crate::error::SkyMapError;
use crate::io::Header;
use crate::pixel::SkyPixel;
use crate::sky_dir::{CoordSystem, SkyDir};

/// Pixelisation underlying a sky map.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Healpix(Healpix),
    Wcs(Wcs),
}

impl Projection {
    /// Projection code: `"HPX"` or the planar WCS code.
    pub fn code(&self) -> &'static str {
        match self {
            Projection::Healpix(_) => "HPX",
            Projection::Wcs(wcs) => wcs.code(),
        }
    }

    /// Native pixel dimensionality: 1 for HEALPix, 2 for planar grids.
    pub fn dimension(&self) -> usize {
        match self {
            Projection::Healpix(_) => 1,
            Projection::Wcs(_) => 2,
        }
    }

    pub fn coords(&self) -> CoordSystem {
        match self {
            Projection::Healpix(hpx) => hpx.coords(),
            Projection::Wcs(wcs) => wcs.coords(),
        }
    }

    fn dimension_mismatch(&self, pixel: &SkyPixel) -> SkyMapError {
        SkyMapError::InvalidArgument(format!(
            "{}D pixel {pixel} cannot be used with the {}D {} projection",
            pixel.dimension(),
            self.dimension(),
            self.code()
        ))
    }

    fn healpix_index(hpx: &Healpix, pixel: &SkyPixel, index: f64) -> Result<usize, SkyMapError> {
        if index < -0.5 || !index.is_finite() {
            return Err(SkyMapError::InvalidArgument(format!(
                "HEALPix pixel {pixel} is not a valid index"
            )));
        }
        let index = index.round() as usize;
        if index >= hpx.npix() {
            return Err(SkyMapError::out_of_range("HEALPix pixel", index, hpx.npix()));
        }
        Ok(index)
    }

    /// Direction of a pixel in its native dimensionality.
    ///
    /// Planar pixels go to the continuous position, HEALPix pixels to the
    /// pixel centre.
    pub fn pix2dir(&self, pixel: &SkyPixel) -> Result<SkyDir, SkyMapError> {
        match (self, pixel) {
            (Projection::Healpix(hpx), SkyPixel::Index(index)) => {
                hpx.pix2dir(Self::healpix_index(hpx, pixel, *index)?)
            }
            (Projection::Wcs(wcs), SkyPixel::Xy { x, y }) => wcs.pix2dir(*x, *y),
            _ => Err(self.dimension_mismatch(pixel)),
        }
    }

    /// Pixel containing (HEALPix) or located at (planar) a direction.
    ///
    /// # Returns
    /// * `Err(SkyMapError::Singularity)` if a planar projection cannot represent `dir`
    pub fn dir2pix(&self, dir: &SkyDir) -> Result<SkyPixel, SkyMapError> {
        match self {
            Projection::Healpix(hpx) => Ok(SkyPixel::index(hpx.dir2pix(dir))),
            Projection::Wcs(wcs) => {
                let (x, y) = wcs.dir2pix(dir)?;
                Ok(SkyPixel::xy(x, y))
            }
        }
    }

    /// Solid angle of a pixel in steradians.
    pub fn solid_angle(&self, pixel: &SkyPixel) -> Result<f64, SkyMapError> {
        match (self, pixel) {
            (Projection::Healpix(hpx), SkyPixel::Index(index)) => {
                Self::healpix_index(hpx, pixel, *index)?;
                Ok(hpx.solid_angle())
            }
            (Projection::Wcs(wcs), SkyPixel::Xy { x, y }) => wcs.solid_angle(*x, *y),
            _ => Err(self.dimension_mismatch(pixel)),
        }
    }

    pub fn write_header(&self, header: &mut Header) {
        match self {
            Projection::Healpix(hpx) => hpx.write_header(header),
            Projection::Wcs(wcs) => wcs.write_header(header),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Healpix(hpx) => hpx.fmt(f),
            Projection::Wcs(wcs) => wcs.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healpix() -> Projection {
        Projection::Healpix(
            Healpix::new(2, HealpixOrdering::Ring, CoordSystem::Celestial).unwrap(),
        )
    }

    fn planar() -> Projection {
        let kind = ProjectionRegistry::global().create("CAR").unwrap();
        Projection::Wcs(
            Wcs::centred(kind, CoordSystem::Celestial, [0.0, 0.0], [-1.0, 1.0], 10, 10).unwrap(),
        )
    }

    #[test]
    fn test_codes_and_dimensions() {
        assert_eq!(healpix().code(), "HPX");
        assert_eq!(healpix().dimension(), 1);
        assert_eq!(planar().code(), "CAR");
        assert_eq!(planar().dimension(), 2);
    }

    #[test]
    fn test_2d_pixel_on_healpix_fails() {
        assert!(matches!(
            healpix().pix2dir(&SkyPixel::xy(1.0, 2.0)),
            Err(SkyMapError::InvalidArgument(_))
        ));
        assert!(matches!(
            healpix().solid_angle(&SkyPixel::xy(1.0, 2.0)),
            Err(SkyMapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_1d_pixel_on_planar_projection_fails_without_grid() {
        // Index decomposition needs the grid width, which only the map knows
        assert!(matches!(
            planar().pix2dir(&SkyPixel::index(3)),
            Err(SkyMapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_healpix_index_bounds() {
        assert!(matches!(
            healpix().pix2dir(&SkyPixel::index(48)),
            Err(SkyMapError::OutOfRange { .. })
        ));
        assert!(healpix().pix2dir(&SkyPixel::Index(-0.2)).is_ok());
        assert!(healpix().pix2dir(&SkyPixel::Index(-1.0)).is_err());
    }

    #[test]
    fn test_dir2pix_dimension_follows_projection() {
        let dir = SkyDir::from_radec_deg(1.0, 1.0);
        assert!(healpix().dir2pix(&dir).unwrap().is_1d());
        assert!(planar().dir2pix(&dir).unwrap().is_2d());
    }
}
