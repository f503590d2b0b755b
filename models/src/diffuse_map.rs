//! Spatial model whose intensity follows a sky map.

use std::f64::consts::TAU;
use std::fmt;
use std::path::Path;

use log::{info, warn};
use rand::Rng;
use skymap::io::FitsContainer;
use skymap::{Projection, SkyDir, SkyMap, SkyPixel};

use crate::error::ModelError;
use crate::mc_cache::McCache;

/// Rejection draws inside a HEALPix pixel before falling back to its centre.
pub const MAX_REJECTION_DRAWS: usize = 1000;

/// Diffuse emission model built on the first layer of a sky map.
///
/// The map is cleaned of negative and non-finite pixels on construction and,
/// when `normalize` is set, scaled so that its flux integrates to one. The
/// model intensity is `prefactor * map(dir)`.
#[derive(Debug, Clone)]
pub struct DiffuseMapModel {
    map: SkyMap,
    prefactor: f64,
    normalize: bool,
    cache: McCache,
    centre: SkyDir,
    radius_deg: f64,
}

impl DiffuseMapModel {
    pub fn new(map: SkyMap, prefactor: f64, normalize: bool) -> Result<Self, ModelError> {
        if map.is_empty() || map.projection().is_none() {
            return Err(ModelError::InvalidArgument(
                "Diffuse map model needs a sky map with a projection and pixels".to_string(),
            ));
        }
        if !prefactor.is_finite() {
            return Err(ModelError::InvalidArgument(format!(
                "Prefactor must be finite, got {prefactor}"
            )));
        }
        let mut model = Self {
            map,
            prefactor,
            normalize,
            cache: McCache::new(),
            centre: SkyDir::from_radec(0.0, 0.0),
            radius_deg: 0.0,
        };
        model.prepare()?;
        Ok(model)
    }

    /// Model from the first map stored in `container`.
    pub fn read(container: &FitsContainer, prefactor: f64, normalize: bool) -> Result<Self, ModelError> {
        Self::new(SkyMap::read(container)?, prefactor, normalize)
    }

    /// Model from a map file on disk.
    pub fn load<P: AsRef<Path>>(path: P, prefactor: f64, normalize: bool) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let map = SkyMap::load(path)?;
        info!("Loaded diffuse map model from {}", path.display());
        Self::new(map, prefactor, normalize)
    }

    fn prepare(&mut self) -> Result<(), ModelError> {
        self.cache.prepare(&mut self.map, self.normalize)?;
        match self.map.projection() {
            Some(Projection::Healpix(_)) | None => {
                self.centre = SkyDir::from_radec(0.0, 0.0);
                self.radius_deg = 180.0;
            }
            Some(Projection::Wcs(_)) => {
                let mid = SkyPixel::xy(
                    (self.map.nx() as f64 - 1.0) / 2.0,
                    (self.map.ny() as f64 - 1.0) / 2.0,
                );
                self.centre = self.map.pixel_to_dir(&mid)?;
                self.radius_deg = (0..self.map.npix())
                    .filter_map(|i| self.map.index_to_dir(i).ok())
                    .map(|dir| dir.dist_deg(&self.centre))
                    .fold(0.0, f64::max);
            }
        }
        Ok(())
    }

    pub fn map(&self) -> &SkyMap {
        &self.map
    }

    pub fn prefactor(&self) -> f64 {
        self.prefactor
    }

    pub fn set_prefactor(&mut self, prefactor: f64) {
        self.prefactor = prefactor;
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    pub fn cache(&self) -> &McCache {
        &self.cache
    }

    /// Centre of the bounding circle.
    pub fn centre(&self) -> &SkyDir {
        &self.centre
    }

    /// Radius of the bounding circle in degrees.
    pub fn radius_deg(&self) -> f64 {
        self.radius_deg
    }

    /// Intensity at `dir`; zero outside the map.
    pub fn eval(&self, dir: &SkyDir) -> Result<f64, ModelError> {
        Ok(self.prefactor * self.map.value_at(dir, 0)?)
    }

    /// Whether `dir` lies within `margin_deg` of the map's bounding circle.
    pub fn contains(&self, dir: &SkyDir, margin_deg: f64) -> bool {
        self.radius_deg > 0.0 && self.centre.dist_deg(dir) < self.radius_deg + margin_deg
    }

    /// Draw a direction distributed like the map intensity.
    ///
    /// The pixel comes from the cumulative flux cache. Planar pixels are
    /// then shifted uniformly by up to half a pixel along x and y. HEALPix
    /// pixels are randomised by drawing inside a cap around the pixel centre
    /// until the draw falls back into the same pixel; after
    /// [`MAX_REJECTION_DRAWS`] misses the pixel centre is returned.
    pub fn mc<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SkyDir, ModelError> {
        let index = self.cache.sample_index(rng).ok_or_else(|| {
            ModelError::InvalidValue("Sky map holds no positive flux to sample from".to_string())
        })?;

        match self.map.index_to_pixel(index) {
            SkyPixel::Xy { x, y } => {
                let jittered = SkyPixel::xy(
                    x + rng.gen::<f64>() - 0.5,
                    y + rng.gen::<f64>() - 0.5,
                );
                Ok(self.map.pixel_to_dir(&jittered)?)
            }
            SkyPixel::Index(_) => self.randomise_in_pixel(index, rng),
        }
    }

    fn randomise_in_pixel<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<SkyDir, ModelError> {
        let centre = self.map.index_to_dir(index)?;
        let omega = self.map.solid_angle(index)?;
        // Twice the half angle of a cap with the pixel's solid angle
        let radius = 2.0 * (1.0 - omega / TAU).acos();
        let cos_radius = radius.cos();

        for _ in 0..MAX_REJECTION_DRAWS {
            let theta = (1.0 - rng.gen::<f64>() * (1.0 - cos_radius)).acos().to_degrees();
            let phi = 360.0 * rng.gen::<f64>();
            let mut dir = centre;
            dir.rotate_deg(phi, theta);
            if self.map.dir_to_index(&dir).ok() == Some(index) {
                return Ok(dir);
            }
        }
        warn!(
            "No draw fell inside HEALPix pixel {index} after {MAX_REJECTION_DRAWS} attempts, using its centre"
        );
        Ok(centre)
    }
}

impl fmt::Display for DiffuseMapModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== DiffuseMapModel ===")?;
        write!(f, " Prefactor .................: {:e}", self.prefactor)?;
        if self.normalize {
            write!(f, " [normalized]")?;
        }
        writeln!(f)?;
        writeln!(f, " Total flux ................: {:e}", self.cache.total_flux())?;
        writeln!(
            f,
            " Map centre ................: ({:.4}, {:.4}) deg",
            self.centre.ra_deg(),
            self.centre.dec_deg()
        )?;
        write!(f, " Map radius ................: {:.4} deg", self.radius_deg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use skymap::{CoordSystem, HealpixOrdering, WcsGeometry};
    use test_helpers::seeded_rng;

    fn patch() -> SkyMap {
        let geometry =
            WcsGeometry::new("CAR", CoordSystem::Celestial, [0.0, 0.0], [1.0, 1.0], 5, 5);
        SkyMap::new_wcs(&geometry, 1).unwrap()
    }

    #[test]
    fn test_normalized_map_integrates_to_one() {
        let mut map = patch();
        map.fill(2.0);
        let model = DiffuseMapModel::new(map, 3.0, true).unwrap();
        assert_relative_eq!(model.map().flux(0).unwrap(), 1.0, max_relative = 1e-12);

        let centre = SkyDir::from_radec_deg(0.0, 0.0);
        let expected = 3.0 * model.map().value(12, 0).unwrap();
        assert_relative_eq!(model.eval(&centre).unwrap(), expected, max_relative = 1e-9);
        assert_eq!(model.eval(&SkyDir::from_radec_deg(40.0, 0.0)).unwrap(), 0.0);
    }

    #[test]
    fn test_unnormalized_map_keeps_values() {
        let mut map = patch();
        map.fill(2.0);
        let model = DiffuseMapModel::new(map, 1.0, false).unwrap();
        assert!(model.map().pixels().iter().all(|&v| v == 2.0));
        assert!(model.cache().total_flux() > 0.0);
    }

    #[test]
    fn test_planar_samples_stay_in_pixel() {
        let mut map = patch();
        map[(12, 0)] = 1.0;
        let model = DiffuseMapModel::new(map, 1.0, true).unwrap();
        let centre = SkyDir::from_radec_deg(0.0, 0.0);
        let mut rng = seeded_rng(7);
        for _ in 0..500 {
            let dir = model.mc(&mut rng).unwrap();
            assert!(dir.dist_deg(&centre) <= 0.72, "{}", dir.dist_deg(&centre));
        }
    }

    #[test]
    fn test_healpix_samples_stay_in_pixel() {
        let mut map =
            SkyMap::new_healpix(CoordSystem::Celestial, 4, HealpixOrdering::Ring, 1).unwrap();
        *map.value_mut(100, 0).unwrap() = 5.0;
        let model = DiffuseMapModel::new(map, 1.0, true).unwrap();
        assert_eq!(model.radius_deg(), 180.0);

        let mut rng = seeded_rng(11);
        for _ in 0..200 {
            let dir = model.mc(&mut rng).unwrap();
            assert_eq!(model.map().dir_to_index(&dir).unwrap(), 100);
        }
    }

    /// Generator stuck at the top of its range.
    struct Saturated {
        draws: usize,
    }

    impl rand::RngCore for Saturated {
        fn next_u32(&mut self) -> u32 {
            self.draws += 1;
            u32::MAX
        }

        fn next_u64(&mut self) -> u64 {
            self.draws += 1;
            u64::MAX
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.draws += 1;
            dest.fill(u8::MAX);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn test_healpix_sampling_falls_back_to_pixel_centre() {
        let mut map =
            SkyMap::new_healpix(CoordSystem::Celestial, 4, HealpixOrdering::Ring, 1).unwrap();
        *map.value_mut(100, 0).unwrap() = 5.0;
        let model = DiffuseMapModel::new(map, 1.0, true).unwrap();

        // Every offset lands on the rim of the search cap, twice the
        // equal-area radius from the centre and outside the pixel
        let mut rng = Saturated { draws: 0 };
        let dir = model.mc(&mut rng).unwrap();
        let centre = model.map().index_to_dir(100).unwrap();
        assert!(dir.dist_deg(&centre) < 1e-12, "{}", dir.dist_deg(&centre));
        assert!(rng.draws > MAX_REJECTION_DRAWS);
    }

    #[test]
    fn test_bounding_circle() {
        let model = DiffuseMapModel::new(
            {
                let mut map = patch();
                map.fill(1.0);
                map
            },
            1.0,
            true,
        )
        .unwrap();
        assert!(model.centre().dist_deg(&SkyDir::from_radec_deg(0.0, 0.0)) < 1e-9);
        // Corner pixel centres are about 2.83 deg from the middle
        assert!(model.radius_deg() > 2.8 && model.radius_deg() < 2.9);

        let near = SkyDir::from_radec_deg(2.0, 0.0);
        let far = SkyDir::from_radec_deg(4.0, 0.0);
        assert!(model.contains(&near, 0.0));
        assert!(!model.contains(&far, 0.0));
        assert!(model.contains(&far, 1.5));
    }

    #[test]
    fn test_empty_or_fluxless_maps() {
        assert!(matches!(
            DiffuseMapModel::new(SkyMap::empty(), 1.0, true),
            Err(ModelError::InvalidArgument(_))
        ));

        let model = DiffuseMapModel::new(patch(), 1.0, true).unwrap();
        assert!(matches!(
            model.mc(&mut seeded_rng(3)),
            Err(ModelError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_read_rebuilds_cache() {
        let mut map = patch();
        map[(16, 0)] = -4.0;
        map[(12, 0)] = 2.0;
        let mut container = FitsContainer::new();
        map.write(&mut container).unwrap();

        let model = DiffuseMapModel::read(&container, 1.0, false).unwrap();
        assert_eq!(model.map()[(16, 0)], 0.0);
        assert_eq!(model.cache().len(), 25);
        assert_eq!(model.cache().cumulative()[0], 0.0);
    }
}
