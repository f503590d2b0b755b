//! Sky directions in equatorial and Galactic coordinates.
//!
//! A [`SkyDir`] always stores J2000 equatorial coordinates. Galactic
//! coordinates are derived through a fixed rotation matrix, so a direction
//! built from (l, b) and read back as (l, b) agrees to machine precision.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::SkyMapError;

/// Rotation from J2000 equatorial to Galactic unit vectors.
static EQU_TO_GAL: Lazy<Matrix3<f64>> = Lazy::new(|| {
    Matrix3::new(
        -0.054_875_560_416_215_4,
        -0.873_437_090_234_885_0,
        -0.483_835_015_548_713_2,
        0.494_109_427_875_583_7,
        -0.444_829_629_960_011_2,
        0.746_982_244_497_218_9,
        -0.867_666_149_019_004_7,
        -0.198_076_373_431_201_5,
        0.455_983_776_175_066_9,
    )
});

/// Coordinate system of a projection or of a map axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordSystem {
    #[serde(rename = "CEL")]
    Celestial,
    #[serde(rename = "GAL")]
    Galactic,
}

impl CoordSystem {
    /// Short code used in configuration files and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordSystem::Celestial => "CEL",
            CoordSystem::Galactic => "GAL",
        }
    }

    /// HEALPix `COORDSYS` keyword value.
    pub fn healpix_code(&self) -> &'static str {
        match self {
            CoordSystem::Celestial => "C",
            CoordSystem::Galactic => "G",
        }
    }
}

impl FromStr for CoordSystem {
    type Err = SkyMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CEL" | "EQU" | "C" | "ICRS" | "FK5" => Ok(CoordSystem::Celestial),
            "GAL" | "G" => Ok(CoordSystem::Galactic),
            other => Err(SkyMapError::InvalidValue(format!(
                "Unknown coordinate system \"{other}\", expected one of CEL, EQU, GAL"
            ))),
        }
    }
}

impl fmt::Display for CoordSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A direction on the celestial sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyDir {
    /// Right ascension in radians, in [0, 2pi)
    ra: f64,
    /// Declination in radians, in [-pi/2, pi/2]
    dec: f64,
}

impl Default for SkyDir {
    fn default() -> Self {
        Self { ra: 0.0, dec: 0.0 }
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = lon.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

fn angles_from_vector(v: &Vector3<f64>) -> (f64, f64) {
    let lon = v.y.atan2(v.x);
    let lat = v.z.atan2((v.x * v.x + v.y * v.y).sqrt());
    (wrap_longitude(lon), lat)
}

fn vector_from_angles(lon: f64, lat: f64) -> Vector3<f64> {
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
}

impl SkyDir {
    /// Build a direction from right ascension and declination in radians.
    pub fn from_radec(ra: f64, dec: f64) -> Self {
        Self {
            ra: wrap_longitude(ra),
            dec: dec.clamp(-FRAC_PI_2, FRAC_PI_2),
        }
    }

    /// Build a direction from right ascension and declination in degrees.
    pub fn from_radec_deg(ra: f64, dec: f64) -> Self {
        Self::from_radec(ra.to_radians(), dec.to_radians())
    }

    /// Build a direction from Galactic longitude and latitude in radians.
    pub fn from_lb(l: f64, b: f64) -> Self {
        let gal = vector_from_angles(l, b);
        Self::from_vector(&(EQU_TO_GAL.transpose() * gal))
    }

    /// Build a direction from Galactic longitude and latitude in degrees.
    pub fn from_lb_deg(l: f64, b: f64) -> Self {
        Self::from_lb(l.to_radians(), b.to_radians())
    }

    /// Build a direction from an equatorial Cartesian vector (need not be unit length).
    pub fn from_vector(v: &Vector3<f64>) -> Self {
        let (ra, dec) = angles_from_vector(v);
        Self { ra, dec }
    }

    /// Build a direction from longitude/latitude in radians in the given system.
    pub fn from_lon_lat(coords: CoordSystem, lon: f64, lat: f64) -> Self {
        match coords {
            CoordSystem::Celestial => Self::from_radec(lon, lat),
            CoordSystem::Galactic => Self::from_lb(lon, lat),
        }
    }

    pub fn ra(&self) -> f64 {
        self.ra
    }

    pub fn dec(&self) -> f64 {
        self.dec
    }

    pub fn ra_deg(&self) -> f64 {
        self.ra.to_degrees()
    }

    pub fn dec_deg(&self) -> f64 {
        self.dec.to_degrees()
    }

    /// Galactic longitude and latitude in radians.
    pub fn lb(&self) -> (f64, f64) {
        angles_from_vector(&(*EQU_TO_GAL * self.to_vector()))
    }

    /// Galactic longitude and latitude in degrees.
    pub fn lb_deg(&self) -> (f64, f64) {
        let (l, b) = self.lb();
        (l.to_degrees(), b.to_degrees())
    }

    /// Longitude/latitude in radians in the given system.
    pub fn lon_lat(&self, coords: CoordSystem) -> (f64, f64) {
        match coords {
            CoordSystem::Celestial => (self.ra, self.dec),
            CoordSystem::Galactic => self.lb(),
        }
    }

    /// Equatorial unit vector.
    pub fn to_vector(&self) -> Vector3<f64> {
        vector_from_angles(self.ra, self.dec)
    }

    /// Angular distance to another direction in radians.
    ///
    /// Uses the atan2 form so that both very small and nearly antipodal
    /// separations keep full precision.
    pub fn dist(&self, other: &SkyDir) -> f64 {
        let a = self.to_vector();
        let b = other.to_vector();
        a.cross(&b).norm().atan2(a.dot(&b))
    }

    /// Angular distance to another direction in degrees.
    pub fn dist_deg(&self, other: &SkyDir) -> f64 {
        self.dist(other).to_degrees()
    }

    /// Position angle of `other` as seen from this direction, in radians,
    /// measured from north through east.
    pub fn posang(&self, other: &SkyDir) -> f64 {
        let dra = other.ra - self.ra;
        let y = dra.sin() * other.dec.cos();
        let x = self.dec.cos() * other.dec.sin() - self.dec.sin() * other.dec.cos() * dra.cos();
        y.atan2(x)
    }

    /// Position angle of `other` in degrees.
    pub fn posang_deg(&self, other: &SkyDir) -> f64 {
        self.posang(other).to_degrees()
    }

    /// Move this direction by `theta` degrees along position angle `phi` degrees.
    ///
    /// # Arguments
    /// * `phi` - Position angle of the displacement, east of north (degrees)
    /// * `theta` - Angular length of the displacement (degrees)
    pub fn rotate_deg(&mut self, phi: f64, theta: f64) {
        let (sin_phi, cos_phi) = phi.to_radians().sin_cos();
        let (sin_theta, cos_theta) = theta.to_radians().sin_cos();
        let (sin_dec, cos_dec) = self.dec.sin_cos();

        // Local frame at the current direction: radial, north and east unit vectors
        let radial = self.to_vector();
        let north = Vector3::new(
            -sin_dec * self.ra.cos(),
            -sin_dec * self.ra.sin(),
            cos_dec,
        );
        let east = Vector3::new(-self.ra.sin(), self.ra.cos(), 0.0);

        let moved = radial * cos_theta + (north * cos_phi + east * sin_phi) * sin_theta;
        *self = Self::from_vector(&moved);
    }

    /// Whether the direction sits at a celestial pole to within `tolerance` radians.
    pub fn is_pole(&self, tolerance: f64) -> bool {
        (FRAC_PI_2 - self.dec.abs()) < tolerance
    }
}

impl fmt::Display for SkyDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(RA,Dec)=({:.6},{:.6})", self.ra_deg(), self.dec_deg())
    }
}

/// Normalise an angle in radians to (-pi, pi].
pub(crate) fn wrap_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}
