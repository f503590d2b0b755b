//! Cumulative flux cache for drawing map pixels at random.

use log::{debug, warn};
use rand::Rng;
use skymap::SkyMap;

use crate::error::ModelError;

/// Value stored after the last pixel so that every uniform draw in [0, 1)
/// falls inside the table.
pub const CACHE_END: f64 = 1.0001;

/// Cumulative distribution of the flux in the first layer of a sky map.
///
/// Entry `i` is the fraction of the total flux held by pixels `0..i`, so the
/// table has `npix + 1` entries starting at 0.0. Pixel `i` is drawn when a
/// uniform number falls in `[cumulative[i], cumulative[i + 1])`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McCache {
    cumulative: Vec<f64>,
    total_flux: f64,
}

impl McCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the cache from the first layer of `map`.
    ///
    /// Pixels whose flux (value times solid angle) is negative, NaN or
    /// infinite are set to zero in the map. Pixels without a solid angle,
    /// such as the corners of an all-sky Aitoff grid, carry no flux. With
    /// `normalize` the layer is divided by the total flux so that it
    /// integrates to one.
    ///
    /// Returns the total flux found before any normalisation.
    pub fn prepare(&mut self, map: &mut SkyMap, normalize: bool) -> Result<f64, ModelError> {
        self.cumulative.clear();
        self.total_flux = 0.0;
        let npix = map.npix();
        if npix == 0 {
            return Ok(0.0);
        }

        let omegas: Vec<f64> = (0..npix)
            .map(|i| map.solid_angle(i).unwrap_or(0.0))
            .collect();
        let layer = map.layer_mut(0)?;

        self.cumulative.reserve(npix + 1);
        self.cumulative.push(0.0);
        let mut sum = 0.0;
        let mut clamped = 0;
        for (value, omega) in layer.iter_mut().zip(&omegas) {
            let mut flux = *value * omega;
            if !flux.is_finite() || flux < 0.0 {
                *value = 0.0;
                flux = 0.0;
                clamped += 1;
            }
            sum += flux;
            self.cumulative.push(sum);
        }
        if clamped > 0 {
            warn!("Set {clamped} negative or non-finite map pixels to zero");
        }

        if sum > 0.0 {
            self.cumulative.iter_mut().for_each(|c| *c /= sum);
            if normalize {
                layer.iter_mut().for_each(|v| *v /= sum);
            }
        }
        self.cumulative[npix] = CACHE_END;
        self.total_flux = sum;
        debug!("Prepared Monte Carlo cache over {npix} pixels, total flux {sum:e}");
        Ok(sum)
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    /// Flux of the map before normalisation.
    pub fn total_flux(&self) -> f64 {
        self.total_flux
    }

    /// Number of pixels covered by the cache.
    pub fn len(&self) -> usize {
        self.cumulative.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any pixel can be drawn.
    pub fn can_sample(&self) -> bool {
        !self.is_empty() && self.total_flux > 0.0
    }

    /// Pixel whose cumulative interval contains `u`, found by bisection.
    ///
    /// Pixels with zero flux have an empty interval and are never returned.
    /// `None` when the cache holds no flux or `u` lies outside `[0, 1)`.
    pub fn locate(&self, u: f64) -> Option<usize> {
        if !self.can_sample() || !(0.0..1.0).contains(&u) {
            return None;
        }
        let upper = self.cumulative.partition_point(|&c| c <= u);
        Some((upper - 1).min(self.len() - 1))
    }

    /// Draw a pixel index with probability proportional to its flux.
    pub fn sample_index<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        self.locate(rng.gen::<f64>())
    }
}
