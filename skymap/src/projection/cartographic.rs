//! Cartographic transforms between native spherical and projection-plane coordinates.
//!
//! Angles are in degrees. Native longitude `phi` and latitude `theta` are
//! measured in the projection's native frame, whose pole the WCS rotation
//! places on the sky. Plane coordinates `(x, y)` carry the scale factor
//! `R0 = 180/pi` so that they are in degrees near the reference point.

use std::fmt;

use crate::error::SkyMapError;

/// Radius of the generating sphere, in degrees per radian.
pub const R0: f64 = 180.0 / std::f64::consts::PI;

/// A planar cartographic projection.
pub trait Cartographic: Send + Sync + fmt::Debug {
    /// Three letter FITS code, e.g. `"TAN"`.
    fn code(&self) -> &'static str;

    /// Descriptive name.
    fn name(&self) -> &'static str;

    /// Native latitude of the fiducial point in degrees.
    fn theta0(&self) -> f64 {
        90.0
    }

    /// Native spherical (phi, theta) to plane (x, y).
    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError>;

    /// Plane (x, y) to native spherical (phi, theta).
    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError>;
}

fn singular(code: &str, what: String) -> SkyMapError {
    SkyMapError::Singularity(format!("{code}: {what}"))
}

/// Azimuth and radius of a zenithal plane position.
fn zenithal_polar(x: f64, y: f64) -> (f64, f64) {
    let r = x.hypot(y);
    let phi = if r == 0.0 { 0.0 } else { x.atan2(-y).to_degrees() };
    (phi, r)
}

fn zenithal_plane(phi: f64, r: f64) -> (f64, f64) {
    let (sin_phi, cos_phi) = phi.to_radians().sin_cos();
    (r * sin_phi, -r * cos_phi)
}

/// Plate carree.
#[derive(Debug, Clone, Copy, Default)]
pub struct Car;

impl Cartographic for Car {
    fn code(&self) -> &'static str {
        "CAR"
    }

    fn name(&self) -> &'static str {
        "Plate carree"
    }

    fn theta0(&self) -> f64 {
        0.0
    }

    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
        Ok((phi, theta))
    }

    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
        if y.abs() > 90.0 {
            return Err(singular("CAR", format!("y={y} lies beyond the poles")));
        }
        Ok((x, y))
    }
}

/// Gnomonic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tan;

impl Cartographic for Tan {
    fn code(&self) -> &'static str {
        "TAN"
    }

    fn name(&self) -> &'static str {
        "Gnomonic"
    }

    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
        let (sin_theta, cos_theta) = theta.to_radians().sin_cos();
        if sin_theta <= 0.0 {
            return Err(singular(
                "TAN",
                format!("native latitude {theta} is not above the horizon"),
            ));
        }
        Ok(zenithal_plane(phi, R0 * cos_theta / sin_theta))
    }

    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
        let (phi, r) = zenithal_polar(x, y);
        Ok((phi, R0.atan2(r).to_degrees()))
    }
}

/// Stereographic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stg;

impl Cartographic for Stg {
    fn code(&self) -> &'static str {
        "STG"
    }

    fn name(&self) -> &'static str {
        "Stereographic"
    }

    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
        let (sin_theta, cos_theta) = theta.to_radians().sin_cos();
        let s = 1.0 + sin_theta;
        if s == 0.0 {
            return Err(singular("STG", format!("native latitude {theta} is the antipode")));
        }
        Ok(zenithal_plane(phi, 2.0 * R0 * cos_theta / s))
    }

    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
        let (phi, r) = zenithal_polar(x, y);
        Ok((phi, 90.0 - 2.0 * (r / (2.0 * R0)).atan().to_degrees()))
    }
}

/// Zenithal equidistant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arc;

impl Cartographic for Arc {
    fn code(&self) -> &'static str {
        "ARC"
    }

    fn name(&self) -> &'static str {
        "Zenithal equidistant"
    }

    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
        Ok(zenithal_plane(phi, 90.0 - theta))
    }

    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
        let (phi, r) = zenithal_polar(x, y);
        if r > 180.0 {
            return Err(singular("ARC", format!("radius {r} exceeds 180 degrees")));
        }
        Ok((phi, 90.0 - r))
    }
}

/// Orthographic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sin;

impl Cartographic for Sin {
    fn code(&self) -> &'static str {
        "SIN"
    }

    fn name(&self) -> &'static str {
        "Orthographic"
    }

    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
        if theta < 0.0 {
            return Err(singular(
                "SIN",
                format!("native latitude {theta} is on the far hemisphere"),
            ));
        }
        Ok(zenithal_plane(phi, R0 * theta.to_radians().cos()))
    }

    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
        let (phi, r) = zenithal_polar(x, y);
        let rho = r / R0;
        if rho > 1.0 {
            return Err(singular("SIN", format!("radius {r} lies outside the disk")));
        }
        Ok((phi, rho.acos().to_degrees()))
    }
}

/// Hammer-Aitoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ait;

impl Cartographic for Ait {
    fn code(&self) -> &'static str {
        "AIT"
    }

    fn name(&self) -> &'static str {
        "Hammer-Aitoff"
    }

    fn theta0(&self) -> f64 {
        0.0
    }

    fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
        let (sin_half, cos_half) = (0.5 * phi.to_radians()).sin_cos();
        let (sin_theta, cos_theta) = theta.to_radians().sin_cos();
        let w = (2.0 / (1.0 + cos_theta * cos_half)).sqrt();
        Ok((2.0 * R0 * w * cos_theta * sin_half, R0 * w * sin_theta))
    }

    fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
        let u = x / R0;
        let v = y / R0;
        let s = 1.0 - (u / 4.0).powi(2) - (v / 2.0).powi(2);
        if s < 0.5 {
            return Err(singular("AIT", format!("({x},{y}) lies outside the ellipse")));
        }
        let z = s.sqrt();
        let phi = 2.0 * (z * u).atan2(2.0 * (2.0 * z * z - 1.0));
        let theta = (z * v).clamp(-1.0, 1.0).asin();
        Ok((phi.to_degrees(), theta.to_degrees()))
    }
}
