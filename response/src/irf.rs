//! Instrument response functions.
//!
//! Observations hand out a [`Response`]; cube builders need the richer
//! [`InstrumentResponse`] capability and ask for it through
//! [`Response::as_instrument_response`]. Responses without it cannot feed a
//! response cube.

use std::f64::consts::TAU;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::ResponseError;

/// Response attached to an observation.
pub trait Response: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// The instrument response capability, if this response provides one.
    fn as_instrument_response(&self) -> Option<&dyn InstrumentResponse> {
        None
    }
}

/// Effective area, point spread function and background rate as functions
/// of the off-axis angle and energy.
///
/// Angles are in radians, `log_energy` is log10 of the energy in TeV.
pub trait InstrumentResponse: Send + Sync {
    /// Effective area in cm^2.
    fn aeff(&self, theta: f64, log_energy: f64) -> f64;

    /// Point spread function in 1/sr at separation `delta` from the true direction.
    fn psf(&self, delta: f64, theta: f64, log_energy: f64) -> f64;

    /// Background rate in counts/s/MeV/sr.
    fn background(&self, theta: f64, log_energy: f64) -> f64;
}

/// The instrument capability of `response`, or InvalidValue naming what was expected.
pub fn instrument_response(response: &dyn Response) -> Result<&dyn InstrumentResponse, ResponseError> {
    response.as_instrument_response().ok_or_else(|| {
        ResponseError::InvalidValue(format!(
            "Response \"{}\" is not an instrument response; an InstrumentResponse \
             providing aeff, psf and background is required",
            response.name()
        ))
    })
}

/// Analytic response with Gaussian PSF and off-axis acceptance.
///
/// The PSF width scales as `psf_sigma_deg * E^-psf_index` (E in TeV), the
/// effective area falls off as a Gaussian of width `offaxis_sigma_deg` and
/// the background follows a power law in energy with the same off-axis
/// profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianIrf {
    pub name: String,

    /// On-axis effective area in cm^2
    pub aeff_max: f64,

    /// Width of the off-axis acceptance in degrees
    pub offaxis_sigma_deg: f64,

    /// PSF width at 1 TeV in degrees
    pub psf_sigma_deg: f64,

    /// Energy scaling index of the PSF width
    pub psf_index: f64,

    /// Background rate at 1 TeV on axis in counts/s/MeV/sr
    pub bgd_norm: f64,

    /// Spectral index of the background
    pub bgd_index: f64,
}

impl Default for GaussianIrf {
    fn default() -> Self {
        Self {
            name: "gaussian".to_string(),
            aeff_max: 3.0e9,
            offaxis_sigma_deg: 2.5,
            psf_sigma_deg: 0.1,
            psf_index: 0.2,
            bgd_norm: 1.0e-11,
            bgd_index: 2.5,
        }
    }
}

impl GaussianIrf {
    fn acceptance(&self, theta: f64) -> f64 {
        let sigma = self.offaxis_sigma_deg.to_radians();
        (-0.5 * theta * theta / (sigma * sigma)).exp()
    }

    /// PSF width in radians at `log_energy`.
    pub fn psf_sigma(&self, log_energy: f64) -> f64 {
        self.psf_sigma_deg.to_radians() * 10f64.powf(-self.psf_index * log_energy)
    }
}

impl Response for GaussianIrf {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_instrument_response(&self) -> Option<&dyn InstrumentResponse> {
        Some(self)
    }
}

impl InstrumentResponse for GaussianIrf {
    fn aeff(&self, theta: f64, _log_energy: f64) -> f64 {
        self.aeff_max * self.acceptance(theta)
    }

    fn psf(&self, delta: f64, _theta: f64, log_energy: f64) -> f64 {
        let sigma = self.psf_sigma(log_energy);
        let s2 = sigma * sigma;
        (-0.5 * delta * delta / s2).exp() / (TAU * s2)
    }

    fn background(&self, theta: f64, log_energy: f64) -> f64 {
        self.bgd_norm * 10f64.powf(-self.bgd_index * log_energy) * self.acceptance(theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[derive(Debug)]
    struct CountsOnly;

    impl Response for CountsOnly {
        fn name(&self) -> &str {
            "counts-only"
        }
    }

    #[test]
    fn test_capability_query() {
        let irf = GaussianIrf::default();
        assert!(instrument_response(&irf).is_ok());
        match instrument_response(&CountsOnly) {
            Err(ResponseError::InvalidValue(msg)) => {
                assert!(msg.contains("counts-only"));
                assert!(msg.contains("InstrumentResponse"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("counts-only response must not expose instrument functions"),
        }
    }

    #[test]
    fn test_psf_is_normalised() {
        // Integrate 2*pi*delta*psf(delta) over the small-angle plane
        let irf = GaussianIrf::default();
        let sigma = irf.psf_sigma(0.0);
        let step = sigma / 1000.0;
        let total: f64 = (0..20000)
            .map(|i| {
                let delta = (i as f64 + 0.5) * step;
                TAU * delta * irf.psf(delta, 0.0, 0.0) * step
            })
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_psf_narrows_with_energy() {
        let irf = GaussianIrf::default();
        assert!(irf.psf_sigma(1.0) < irf.psf_sigma(0.0));
        assert!(irf.aeff(0.05, 0.0) < irf.aeff(0.0, 0.0));
        assert!(irf.background(0.0, 1.0) < irf.background(0.0, 0.0));
    }
}
