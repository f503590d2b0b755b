//! World coordinate system for planar sky maps.
//!
//! A [`Wcs`] combines a linear pixel-to-plane transformation (reference
//! pixel and pixel scale), a [`Cartographic`] projection, and the spherical
//! rotation between native and celestial coordinates described by the
//! reference value and the native pole.

use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use log::debug;
use nalgebra::Vector3;

use super::cartographic::Cartographic;
use super::registry::ProjectionRegistry;
use crate::error::SkyMapError;
use crate::io::Header;
use crate::sky_dir::{wrap_pi, CoordSystem, SkyDir};

/// Planar projection of the sky.
#[derive(Debug, Clone)]
pub struct Wcs {
    kind: Arc<dyn Cartographic>,
    coords: CoordSystem,
    /// Reference value (lon, lat) in degrees
    crval: [f64; 2],
    /// Reference pixel, FITS 1-based
    crpix: [f64; 2],
    /// Pixel scale in degrees
    cdelt: [f64; 2],
    lonpole: f64,
    latpole: f64,
    /// Celestial longitude and latitude of the native pole, radians
    pole_lon: f64,
    pole_lat: f64,
    /// Native longitude of the celestial pole, radians
    phi_p: f64,
}

fn sincosd(angle: f64) -> (f64, f64) {
    angle.to_radians().sin_cos()
}

/// Celestial coordinates of the native pole, following the FITS WCS
/// paper II prescription.
fn native_pole(
    crval: [f64; 2],
    phi0: f64,
    theta0: f64,
    lonpole: f64,
    latpole: f64,
) -> Result<(f64, f64), SkyMapError> {
    let [lng0, lat0] = crval;
    if theta0 == 90.0 {
        return Ok((lng0, lat0));
    }

    let (slat0, clat0) = sincosd(lat0);
    let (sthe0, cthe0) = sincosd(theta0);
    let (sphip, cphip) = if lonpole == phi0 {
        (0.0, 1.0)
    } else {
        sincosd(lonpole - phi0)
    };

    let x = cthe0 * cphip;
    let y = sthe0;
    let z = x.hypot(y);
    let latp = if z == 0.0 {
        if slat0 != 0.0 {
            return Err(SkyMapError::InvalidValue(format!(
                "Reference latitude {lat0} is inconsistent with LONPOLE {lonpole}"
            )));
        }
        latpole
    } else {
        if (slat0 / z).abs() > 1.0 {
            return Err(SkyMapError::InvalidValue(format!(
                "No native pole satisfies reference latitude {lat0} with LONPOLE {lonpole}"
            )));
        }
        let u = y.atan2(x).to_degrees();
        let v = (slat0 / z).acos().to_degrees();
        let normalise = |a: f64| {
            if a > 180.0 {
                a - 360.0
            } else if a < -180.0 {
                a + 360.0
            } else {
                a
            }
        };
        let latp1 = normalise(u + v);
        let latp2 = normalise(u - v);
        let tol = 1.0e-10;
        let latp = if latp1.abs() < 90.0 + tol && latp2.abs() < 90.0 + tol {
            if (latpole - latp1).abs() < (latpole - latp2).abs() {
                latp1
            } else {
                latp2
            }
        } else if latp1.abs() < 90.0 + tol {
            latp1
        } else {
            latp2
        };
        latp.clamp(-90.0, 90.0)
    };

    let z = latp.to_radians().cos() * clat0;
    let lngp = if z.abs() < 1.0e-10 {
        if clat0.abs() < 1.0e-10 {
            lng0
        } else if latp > 0.0 {
            lng0 + lonpole - phi0 - 180.0
        } else {
            lng0 - lonpole + phi0
        }
    } else {
        let x = (sthe0 - latp.to_radians().sin() * slat0) / z;
        let y = sphip * cthe0 / clat0;
        if x == 0.0 && y == 0.0 {
            return Err(SkyMapError::InvalidValue(
                "Native pole longitude is undefined".to_string(),
            ));
        }
        lng0 - y.atan2(x).to_degrees()
    };

    Ok((lngp, latp))
}

impl Wcs {
    /// Create a projection from explicit FITS WCS parameters.
    ///
    /// # Arguments
    /// * `kind` - Cartographic transform
    /// * `coords` - Coordinate system of the axes
    /// * `crval` - Reference value (degrees)
    /// * `crpix` - Reference pixel (FITS convention, first pixel centre is 1)
    /// * `cdelt` - Pixel scale (degrees per pixel)
    /// * `lonpole` - Native longitude of the celestial pole; `None` for the default
    /// * `latpole` - Native latitude hint of the celestial pole (degrees)
    pub fn new(
        kind: Arc<dyn Cartographic>,
        coords: CoordSystem,
        crval: [f64; 2],
        crpix: [f64; 2],
        cdelt: [f64; 2],
        lonpole: Option<f64>,
        latpole: f64,
    ) -> Result<Self, SkyMapError> {
        if cdelt[0] == 0.0 || cdelt[1] == 0.0 || !cdelt.iter().all(|v| v.is_finite()) {
            return Err(SkyMapError::InvalidArgument(format!(
                "Pixel scale must be finite and non-zero, got {cdelt:?}"
            )));
        }
        let theta0 = kind.theta0();
        let lonpole = lonpole.unwrap_or(if crval[1] >= theta0 { 0.0 } else { 180.0 });
        let (pole_lon, pole_lat) = native_pole(crval, 0.0, theta0, lonpole, latpole)?;
        debug!(
            "{} projection: native pole at ({pole_lon:.6}, {pole_lat:.6}), LONPOLE={lonpole}",
            kind.code()
        );

        Ok(Self {
            kind,
            coords,
            crval,
            crpix,
            cdelt,
            lonpole,
            latpole,
            pole_lon: pole_lon.to_radians(),
            pole_lat: pole_lat.to_radians(),
            phi_p: lonpole.to_radians(),
        })
    }

    /// Projection centred on `center` for an `nx` by `ny` grid.
    ///
    /// The reference pixel sits at the geometric centre of the grid.
    pub fn centred(
        kind: Arc<dyn Cartographic>,
        coords: CoordSystem,
        center: [f64; 2],
        binsize: [f64; 2],
        nx: usize,
        ny: usize,
    ) -> Result<Self, SkyMapError> {
        let crpix = [(nx as f64 + 1.0) / 2.0, (ny as f64 + 1.0) / 2.0];
        Self::new(kind, coords, center, crpix, binsize, None, 90.0)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn kind(&self) -> &dyn Cartographic {
        self.kind.as_ref()
    }

    pub fn coords(&self) -> CoordSystem {
        self.coords
    }

    pub fn crval(&self) -> [f64; 2] {
        self.crval
    }

    pub fn crpix(&self) -> [f64; 2] {
        self.crpix
    }

    pub fn cdelt(&self) -> [f64; 2] {
        self.cdelt
    }

    /// Rotate native (phi, theta) in radians to celestial (lon, lat).
    fn native_to_celestial(&self, phi: f64, theta: f64) -> (f64, f64) {
        let (sin_dp, cos_dp) = self.pole_lat.sin_cos();
        let (sin_t, cos_t) = theta.sin_cos();
        let dphi = phi - self.phi_p;
        let (sin_dphi, cos_dphi) = dphi.sin_cos();

        let a = sin_t * cos_dp - cos_t * sin_dp * cos_dphi;
        let b = -cos_t * sin_dphi;
        let c = sin_t * sin_dp + cos_t * cos_dp * cos_dphi;
        let lon = (self.pole_lon + b.atan2(a)).rem_euclid(TAU);
        (lon, c.atan2(a.hypot(b)))
    }

    /// Rotate celestial (lon, lat) in radians to native (phi, theta).
    fn celestial_to_native(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (sin_dp, cos_dp) = self.pole_lat.sin_cos();
        let (sin_d, cos_d) = lat.sin_cos();
        let dlon = lon - self.pole_lon;
        let (sin_dlon, cos_dlon) = dlon.sin_cos();

        let a = sin_d * cos_dp - cos_d * sin_dp * cos_dlon;
        let b = -cos_d * sin_dlon;
        let c = sin_d * sin_dp + cos_d * cos_dp * cos_dlon;
        let phi = wrap_pi(self.phi_p + b.atan2(a));
        (phi, c.atan2(a.hypot(b)))
    }

    /// Sky direction of a (0-based, continuous) pixel position.
    pub fn pix2dir(&self, x: f64, y: f64) -> Result<SkyDir, SkyMapError> {
        let xi = self.cdelt[0] * (x + 1.0 - self.crpix[0]);
        let eta = self.cdelt[1] * (y + 1.0 - self.crpix[1]);
        let (phi, theta) = self.kind.deproject(xi, eta)?;
        let (lon, lat) = self.native_to_celestial(phi.to_radians(), theta.to_radians());
        Ok(SkyDir::from_lon_lat(self.coords, lon, lat))
    }

    /// Continuous 0-based pixel position of a sky direction.
    pub fn dir2pix(&self, dir: &SkyDir) -> Result<(f64, f64), SkyMapError> {
        let (lon, lat) = dir.lon_lat(self.coords);
        let (phi, theta) = self.celestial_to_native(lon, lat);
        let (xi, eta) = self.kind.project(phi.to_degrees(), theta.to_degrees())?;
        Ok((
            xi / self.cdelt[0] + self.crpix[0] - 1.0,
            eta / self.cdelt[1] + self.crpix[1] - 1.0,
        ))
    }

    /// Solid angle of the pixel centred at (x, y) in steradians.
    ///
    /// Computed from the cross product of the unit vectors spanning the
    /// pixel edges, which equals the local Jacobian of the projection.
    pub fn solid_angle(&self, x: f64, y: f64) -> Result<f64, SkyMapError> {
        let corner = |dx: f64, dy: f64| -> Result<Vector3<f64>, SkyMapError> {
            Ok(self.pix2dir(x + dx, y + dy)?.to_vector())
        };
        let along_x = corner(0.5, 0.0)? - corner(-0.5, 0.0)?;
        let along_y = corner(0.0, 0.5)? - corner(0.0, -0.5)?;
        Ok(along_x.cross(&along_y).norm())
    }

    /// Write the world coordinate keywords.
    pub fn write_header(&self, header: &mut Header) {
        let (lon_axis, lat_axis) = match self.coords {
            CoordSystem::Celestial => ("RA--", "DEC-"),
            CoordSystem::Galactic => ("GLON", "GLAT"),
        };
        let code = self.code();
        header.set("CTYPE1", format!("{lon_axis}-{code}"), "Projection of axis 1");
        header.set("CTYPE2", format!("{lat_axis}-{code}"), "Projection of axis 2");
        header.set("CRVAL1", self.crval[0], "[deg] Reference value of axis 1");
        header.set("CRVAL2", self.crval[1], "[deg] Reference value of axis 2");
        header.set("CRPIX1", self.crpix[0], "Reference pixel of axis 1");
        header.set("CRPIX2", self.crpix[1], "Reference pixel of axis 2");
        header.set("CDELT1", self.cdelt[0], "[deg/pixel] Increment of axis 1");
        header.set("CDELT2", self.cdelt[1], "[deg/pixel] Increment of axis 2");
        header.set("CUNIT1", "deg", "Unit of axis 1");
        header.set("CUNIT2", "deg", "Unit of axis 2");
        header.set("LONPOLE", self.lonpole, "[deg] Native longitude of celestial pole");
        header.set("LATPOLE", self.latpole, "[deg] Native latitude hint of celestial pole");
        header.set("EQUINOX", 2000.0, "Epoch of coordinate system");
        if self.coords == CoordSystem::Celestial {
            header.set("RADESYS", "ICRS", "Reference frame");
        }
    }

    /// Build a projection from world coordinate keywords.
    ///
    /// Axis types must name the same projection code on both axes; the
    /// code is resolved through `registry`.
    pub fn from_header(header: &Header, registry: &ProjectionRegistry) -> Result<Self, SkyMapError> {
        let ctype1 = header.string("CTYPE1")?;
        let ctype2 = header.string("CTYPE2")?;
        if ctype1.len() < 8 || ctype2.len() < 8 || !ctype1.is_ascii() || !ctype2.is_ascii() {
            return Err(SkyMapError::InvalidValue(format!(
                "Axis types \"{ctype1}\" and \"{ctype2}\" do not name a projection"
            )));
        }
        let code1 = &ctype1[5..8];
        let code2 = &ctype2[5..8];
        if code1 != code2 {
            return Err(SkyMapError::InvalidValue(format!(
                "Axis projections differ: \"{code1}\" on axis 1 and \"{code2}\" on axis 2"
            )));
        }
        let coords = match (&ctype1[0..4], &ctype2[0..4]) {
            ("RA--", "DEC-") => CoordSystem::Celestial,
            ("GLON", "GLAT") => CoordSystem::Galactic,
            (a, b) => {
                return Err(SkyMapError::InvalidValue(format!(
                    "Unsupported axis pair \"{a}\"/\"{b}\", expected RA/DEC or GLON/GLAT"
                )))
            }
        };

        let kind = registry.create(code1)?;
        let crval = [header.real("CRVAL1")?, header.real("CRVAL2")?];
        let crpix = [header.real("CRPIX1")?, header.real("CRPIX2")?];
        let cdelt = [header.real("CDELT1")?, header.real("CDELT2")?];
        let lonpole = header.real("LONPOLE").ok();
        let latpole = header.real("LATPOLE").unwrap_or(90.0);
        Self::new(kind, coords, crval, crpix, cdelt, lonpole, latpole)
    }
}

impl PartialEq for Wcs {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
            && self.coords == other.coords
            && self.crval == other.crval
            && self.crpix == other.crpix
            && self.cdelt == other.cdelt
            && self.lonpole == other.lonpole
            && self.latpole == other.latpole
    }
}

impl fmt::Display for Wcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WCS {} ({}) {}: reference ({}, {}) at pixel ({}, {}), scale ({}, {}) deg",
            self.code(),
            self.kind.name(),
            self.coords,
            self.crval[0],
            self.crval[1],
            self.crpix[0],
            self.crpix[1],
            self.cdelt[0],
            self.cdelt[1]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn wcs(code: &str, center: [f64; 2], binsize: f64, n: usize) -> Wcs {
        let kind = ProjectionRegistry::global().create(code).unwrap();
        Wcs::centred(
            kind,
            CoordSystem::Celestial,
            center,
            [-binsize, binsize],
            n,
            n,
        )
        .unwrap()
    }

    #[test]
    fn test_reference_pixel_maps_to_reference_value() {
        for code in ["CAR", "TAN", "STG", "ARC", "SIN", "AIT"] {
            let proj = wcs(code, [83.63, 22.01], 0.05, 101);
            let dir = proj.pix2dir(50.0, 50.0).unwrap();
            assert_relative_eq!(dir.ra_deg(), 83.63, epsilon = 1e-9);
            assert_relative_eq!(dir.dec_deg(), 22.01, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_car_native_pole() {
        // CAR centred at (10, 20) puts the native pole at (190, 70)
        let (lngp, latp) = native_pole([10.0, 20.0], 0.0, 0.0, 0.0, 90.0).unwrap();
        assert_relative_eq!(lngp.rem_euclid(360.0), 190.0, epsilon = 1e-9);
        assert_relative_eq!(latp, 70.0, epsilon = 1e-9);
    }

    #[test]
    fn test_direction_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        for code in ["CAR", "TAN", "STG", "ARC", "SIN", "AIT"] {
            let proj = wcs(code, [266.4, -28.9], 0.1, 200);
            for _ in 0..200 {
                let x = rng.gen_range(-0.5..199.5);
                let y = rng.gen_range(-0.5..199.5);
                let dir = proj.pix2dir(x, y).unwrap();
                let (x2, y2) = proj.dir2pix(&dir).unwrap();
                let back = proj.pix2dir(x2, y2).unwrap();
                assert!(
                    dir.dist_deg(&back) < 1e-9,
                    "{code}: ({x}, {y}) -> ({x2}, {y2})"
                );
                assert_relative_eq!(x2, x, epsilon = 1e-6);
                assert_relative_eq!(y2, y, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_ra_increases_to_the_left() {
        let proj = wcs("TAN", [0.0, 0.0], 0.1, 11);
        let left = proj.pix2dir(4.0, 5.0).unwrap();
        let right = proj.pix2dir(6.0, 5.0).unwrap();
        assert!(wrap_pi(left.ra() - right.ra()) > 0.0);
    }

    #[test]
    fn test_galactic_axes() {
        let kind = ProjectionRegistry::global().create("CAR").unwrap();
        let proj = Wcs::centred(kind, CoordSystem::Galactic, [0.0, 0.0], [-0.5, 0.5], 9, 9)
            .unwrap();
        let dir = proj.pix2dir(4.0, 4.0).unwrap();
        let gc = SkyDir::from_lb_deg(0.0, 0.0);
        assert!(dir.dist_deg(&gc) < 1e-10);
    }

    #[test]
    fn test_solid_angle_matches_flat_approximation() {
        let proj = wcs("TAN", [120.0, -45.0], 0.01, 21);
        let omega = proj.solid_angle(10.0, 10.0).unwrap();
        let expected = (0.01f64.to_radians()).powi(2);
        assert_relative_eq!(omega, expected, max_relative = 1e-6);
    }

    #[test]
    fn test_car_solid_angle_shrinks_with_latitude() {
        let kind = ProjectionRegistry::global().create("CAR").unwrap();
        let proj =
            Wcs::centred(kind, CoordSystem::Celestial, [0.0, 0.0], [1.0, 1.0], 181, 179).unwrap();
        let equator = proj.solid_angle(90.0, 89.0).unwrap();
        let high = proj.solid_angle(90.0, 89.0 + 60.0).unwrap();
        assert_relative_eq!(high / equator, 60f64.to_radians().cos(), max_relative = 1e-4);
    }

    #[test]
    fn test_header_round_trip() {
        let proj = wcs("STG", [10.0, -30.0], 0.2, 50);
        let mut header = Header::new();
        proj.write_header(&mut header);
        assert_eq!(header.string("CTYPE1").unwrap(), "RA---STG");
        assert_eq!(header.string("CTYPE2").unwrap(), "DEC--STG");

        let back = Wcs::from_header(&header, ProjectionRegistry::global()).unwrap();
        assert_eq!(back, proj);
    }

    #[test]
    fn test_header_with_mismatched_codes_fails() {
        let mut header = Header::new();
        wcs("TAN", [0.0, 0.0], 0.1, 10).write_header(&mut header);
        header.set("CTYPE2", "DEC--CAR", "");
        assert!(matches!(
            Wcs::from_header(&header, ProjectionRegistry::global()),
            Err(SkyMapError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_scale_rejected() {
        let kind = ProjectionRegistry::global().create("TAN").unwrap();
        assert!(matches!(
            Wcs::centred(kind, CoordSystem::Celestial, [0.0, 0.0], [0.0, 0.1], 5, 5),
            Err(SkyMapError::InvalidArgument(_))
        ));
    }
}
