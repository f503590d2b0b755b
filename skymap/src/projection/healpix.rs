//! HEALPix equal-area pixelisation of the sphere.
//!
//! Pixel centres, direction lookup and the ring/nested conversions follow
//! the HEALPix conventions of Gorski et al. (2005). Pixels are addressed by a
//! single linear index in either RING or NESTED ordering.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SkyMapError;
use crate::interpolation::Interpolator;
use crate::io::Header;
use crate::sky_dir::{CoordSystem, SkyDir};

/// Ring index of the lowest pixel row of each base face, in units of nside
const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
/// Longitude index of each base face centre, in units of pi/4
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Largest supported resolution order (nside = 8192).
pub const MAX_ORDER: u32 = 13;

/// Pixel numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealpixOrdering {
    Ring,
    Nested,
}

impl HealpixOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealpixOrdering::Ring => "RING",
            HealpixOrdering::Nested => "NESTED",
        }
    }
}

impl FromStr for HealpixOrdering {
    type Err = SkyMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RING" => Ok(HealpixOrdering::Ring),
            "NESTED" | "NEST" => Ok(HealpixOrdering::Nested),
            other => Err(SkyMapError::InvalidValue(format!(
                "Unknown HEALPix ordering \"{other}\", expected RING or NESTED"
            ))),
        }
    }
}

fn isqrt(value: i64) -> i64 {
    ((value as f64) + 0.5).sqrt() as i64
}

fn spread_bits(value: i64) -> i64 {
    let mut result = 0;
    for bit in 0..32 {
        result |= ((value >> bit) & 1) << (2 * bit);
    }
    result
}

fn compress_bits(value: i64) -> i64 {
    let mut result = 0;
    for bit in 0..32 {
        result |= ((value >> (2 * bit)) & 1) << bit;
    }
    result
}

/// HEALPix pixelisation of a given resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Healpix {
    nside: i64,
    order: u32,
    npface: i64,
    ncap: i64,
    npix: i64,
    fact1: f64,
    fact2: f64,
    ordering: HealpixOrdering,
    coords: CoordSystem,
}

impl Healpix {
    /// Create a pixelisation with `nside` divisions of each base pixel side.
    ///
    /// # Arguments
    /// * `nside` - Resolution parameter, a power of two up to 8192
    /// * `ordering` - Pixel numbering scheme
    /// * `coords` - Coordinate system of the pixel grid
    ///
    /// # Returns
    /// * `Err(SkyMapError::InvalidArgument)` if `nside` is not a supported power of two
    pub fn new(
        nside: usize,
        ordering: HealpixOrdering,
        coords: CoordSystem,
    ) -> Result<Self, SkyMapError> {
        if nside == 0 || !nside.is_power_of_two() || nside.trailing_zeros() > MAX_ORDER {
            return Err(SkyMapError::InvalidArgument(format!(
                "HEALPix nside must be a power of two between 1 and {}, got {nside}",
                1usize << MAX_ORDER
            )));
        }
        let nside = nside as i64;
        let npface = nside * nside;
        let npix = 12 * npface;
        let fact2 = 4.0 / npix as f64;
        Ok(Self {
            nside,
            order: nside.trailing_zeros(),
            npface,
            ncap: 2 * nside * (nside - 1),
            npix,
            fact1: 2.0 * nside as f64 * fact2,
            fact2,
            ordering,
            coords,
        })
    }

    pub fn nside(&self) -> usize {
        self.nside as usize
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn npix(&self) -> usize {
        self.npix as usize
    }

    pub fn ordering(&self) -> HealpixOrdering {
        self.ordering
    }

    pub fn coords(&self) -> CoordSystem {
        self.coords
    }

    /// Solid angle of every pixel in steradians.
    pub fn solid_angle(&self) -> f64 {
        4.0 * PI / self.npix as f64
    }

    fn check_index(&self, index: usize) -> Result<i64, SkyMapError> {
        if index >= self.npix() {
            return Err(SkyMapError::out_of_range("HEALPix pixel", index, self.npix()));
        }
        Ok(index as i64)
    }

    /// Direction of the centre of pixel `index`.
    pub fn pix2dir(&self, index: usize) -> Result<SkyDir, SkyMapError> {
        let pix = self.check_index(index)?;
        let (z, phi) = match self.ordering {
            HealpixOrdering::Ring => self.pix2ang_ring(pix),
            HealpixOrdering::Nested => self.pix2ang_nest(pix),
        };
        let lat = z.clamp(-1.0, 1.0).asin();
        Ok(SkyDir::from_lon_lat(self.coords, phi, lat))
    }

    /// Index of the pixel containing `dir`.
    pub fn dir2pix(&self, dir: &SkyDir) -> usize {
        let (phi, theta) = self.native_angles(dir);
        let z = theta.cos();
        let pix = match self.ordering {
            HealpixOrdering::Ring => self.ang2pix_ring(z, phi),
            HealpixOrdering::Nested => self.ang2pix_nest(z, phi),
        };
        pix as usize
    }

    /// Longitude in [0, 2pi) and colatitude of a direction.
    fn native_angles(&self, dir: &SkyDir) -> (f64, f64) {
        let (lon, lat) = dir.lon_lat(self.coords);
        (lon.rem_euclid(TAU), FRAC_PI_2 - lat)
    }

    fn ang2pix_ring(&self, z: f64, phi: f64) -> i64 {
        let nside = self.nside;
        let za = z.abs();
        let tt = (phi * 2.0 / PI).rem_euclid(4.0);

        if za <= 2.0 / 3.0 {
            let temp1 = nside as f64 * (0.5 + tt);
            let temp2 = nside as f64 * z * 0.75;
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ir = nside + 1 + jp - jm;
            let kshift = 1 - (ir & 1);
            let ip = ((jp + jm - nside + kshift + 1) / 2).rem_euclid(4 * nside);
            self.ncap + (ir - 1) * 4 * nside + ip
        } else {
            let tp = tt - tt.floor();
            let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
            let jp = (tp * tmp) as i64;
            let jm = ((1.0 - tp) * tmp) as i64;
            let ir = jp + jm + 1;
            let ip = ((tt * ir as f64) as i64).rem_euclid(4 * ir);
            if z > 0.0 {
                2 * ir * (ir - 1) + ip
            } else {
                self.npix - 2 * ir * (ir + 1) + ip
            }
        }
    }

    fn ang2pix_nest(&self, z: f64, phi: f64) -> i64 {
        let nside = self.nside;
        let za = z.abs();
        let tt = (phi * 2.0 / PI).rem_euclid(4.0);

        let (face, ix, iy) = if za <= 2.0 / 3.0 {
            let temp1 = nside as f64 * (0.5 + tt);
            let temp2 = nside as f64 * (z * 0.75);
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ifp = jp >> self.order;
            let ifm = jm >> self.order;
            let face = if ifp == ifm {
                ifp | 4
            } else if ifp < ifm {
                ifp
            } else {
                ifm + 8
            };
            (face, jm & (nside - 1), nside - (jp & (nside - 1)) - 1)
        } else {
            let ntt = (tt as i64).min(3);
            let tp = tt - ntt as f64;
            let tmp = nside as f64 * (3.0 * (1.0 - za)).sqrt();
            let jp = ((tp * tmp) as i64).min(nside - 1);
            let jm = (((1.0 - tp) * tmp) as i64).min(nside - 1);
            if z >= 0.0 {
                (ntt, nside - jm - 1, nside - jp - 1)
            } else {
                (ntt + 8, jp, jm)
            }
        };
        self.xyf2nest(ix, iy, face)
    }

    fn pix2ang_ring(&self, pix: i64) -> (f64, f64) {
        let nside = self.nside;
        if pix < self.ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = (pix + 1) - 2 * iring * (iring - 1);
            let z = 1.0 - (iring * iring) as f64 * self.fact2;
            let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
            (z, phi)
        } else if pix < self.npix - self.ncap {
            let ip = pix - self.ncap;
            let tmp = ip / (4 * nside);
            let iring = tmp + nside;
            let iphi = ip - tmp * 4 * nside + 1;
            let fodd = if ((iring + nside) & 1) != 0 { 1.0 } else { 0.5 };
            let z = (2 * nside - iring) as f64 * self.fact1;
            let phi = (iphi as f64 - fodd) * PI / (2 * nside) as f64;
            (z, phi)
        } else {
            let ip = self.npix - pix;
            let iring = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
            let z = -1.0 + (iring * iring) as f64 * self.fact2;
            let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
            (z, phi)
        }
    }

    fn pix2ang_nest(&self, pix: i64) -> (f64, f64) {
        let nside = self.nside;
        let (ix, iy, face) = self.nest2xyf(pix);
        let jr = (JRLL[face as usize] << self.order) - ix - iy - 1;

        let (nr, z, kshift) = if jr < nside {
            (jr, 1.0 - (jr * jr) as f64 * self.fact2, 0)
        } else if jr > 3 * nside {
            let nr = 4 * nside - jr;
            (nr, (nr * nr) as f64 * self.fact2 - 1.0, 0)
        } else {
            (nside, (2 * nside - jr) as f64 * self.fact1, (jr - nside) & 1)
        };

        let mut jp = (JPLL[face as usize] * nr + ix - iy + 1 + kshift) / 2;
        if jp > 4 * nside {
            jp -= 4 * nside;
        }
        if jp < 1 {
            jp += 4 * nside;
        }
        let phi = (jp as f64 - (kshift + 1) as f64 * 0.5) * (FRAC_PI_2 / nr as f64);
        (z, phi)
    }

    fn xyf2nest(&self, ix: i64, iy: i64, face: i64) -> i64 {
        (face << (2 * self.order)) + spread_bits(ix) + (spread_bits(iy) << 1)
    }

    fn nest2xyf(&self, pix: i64) -> (i64, i64, i64) {
        let raw = pix & (self.npface - 1);
        (
            compress_bits(raw),
            compress_bits(raw >> 1),
            pix >> (2 * self.order),
        )
    }

    fn ring2xyf(&self, pix: i64) -> (i64, i64, i64) {
        let nside = self.nside;
        let nl2 = 2 * nside;

        let (iring, iphi, kshift, nr, face) = if pix < self.ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = (pix + 1) - 2 * iring * (iring - 1);
            (iring, iphi, 0, iring, (iphi - 1) / iring)
        } else if pix < self.npix - self.ncap {
            let ip = pix - self.ncap;
            let tmp = ip / (4 * nside);
            let iring = tmp + nside;
            let iphi = ip - tmp * 4 * nside + 1;
            let kshift = (iring + nside) & 1;
            let ire = iring - nside + 1;
            let irm = nl2 + 2 - ire;
            let ifm = (iphi - ire / 2 + nside - 1) >> self.order;
            let ifp = (iphi - irm / 2 + nside - 1) >> self.order;
            let face = if ifp == ifm {
                ifp | 4
            } else if ifp < ifm {
                ifp
            } else {
                ifm + 8
            };
            (iring, iphi, kshift, nside, face)
        } else {
            let ip = self.npix - pix;
            let iring = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
            (2 * nl2 - iring, iphi, 0, iring, 8 + (iphi - 1) / iring)
        };

        let irt = iring - JRLL[face as usize] * nside + 1;
        let mut ipt = 2 * iphi - JPLL[face as usize] * nr - kshift - 1;
        if ipt >= nl2 {
            ipt -= 8 * nside;
        }
        ((ipt - irt) >> 1, (-ipt - irt) >> 1, face)
    }

    fn xyf2ring(&self, ix: i64, iy: i64, face: i64) -> i64 {
        let nside = self.nside;
        let nl4 = 4 * nside;
        let jr = JRLL[face as usize] * nside - ix - iy - 1;

        let (nr, n_before, kshift) = if jr < nside {
            (jr, 2 * jr * (jr - 1), 0)
        } else if jr > 3 * nside {
            let nr = nl4 - jr;
            (nr, self.npix - 2 * (nr + 1) * nr, 0)
        } else {
            (nside, self.ncap + (jr - nside) * nl4, (jr - nside) & 1)
        };

        let mut jp = (JPLL[face as usize] * nr + ix - iy + 1 + kshift) / 2;
        if jp > nl4 {
            jp -= nl4;
        } else if jp < 1 {
            jp += nl4;
        }
        n_before + jp - 1
    }

    /// Convert a RING pixel index to NESTED.
    pub fn ring2nest(&self, index: usize) -> Result<usize, SkyMapError> {
        let pix = self.check_index(index)?;
        let (ix, iy, face) = self.ring2xyf(pix);
        Ok(self.xyf2nest(ix, iy, face) as usize)
    }

    /// Convert a NESTED pixel index to RING.
    pub fn nest2ring(&self, index: usize) -> Result<usize, SkyMapError> {
        let pix = self.check_index(index)?;
        let (ix, iy, face) = self.nest2xyf(pix);
        Ok(self.xyf2ring(ix, iy, face) as usize)
    }

    /// Ring number (1-based from the north pole) of the ring at or above `z`.
    fn ring_above(&self, z: f64) -> i64 {
        let nside = self.nside;
        let az = z.abs();
        if az <= 2.0 / 3.0 {
            return (nside as f64 * (2.0 - 1.5 * z)) as i64;
        }
        let iring = (nside as f64 * (3.0 * (1.0 - az)).sqrt()) as i64;
        if z > 0.0 {
            iring
        } else {
            4 * nside - iring - 1
        }
    }

    /// First pixel, pixel count, colatitude and shift flag of a ring.
    fn ring_info(&self, ring: i64) -> (i64, i64, f64, bool) {
        let nside = self.nside;
        let northring = if ring > 2 * nside { 4 * nside - ring } else { ring };

        let (mut startpix, ringpix, mut theta, shifted) = if northring < nside {
            let tmp = (northring * northring) as f64 * self.fact2;
            let costheta = 1.0 - tmp;
            let sintheta = (tmp * (2.0 - tmp)).sqrt();
            (
                2 * northring * (northring - 1),
                4 * northring,
                sintheta.atan2(costheta),
                true,
            )
        } else {
            (
                self.ncap + (northring - nside) * 4 * nside,
                4 * nside,
                ((2 * nside - northring) as f64 * self.fact1).acos(),
                ((northring - nside) & 1) == 0,
            )
        };

        if northring != ring {
            theta = PI - theta;
            startpix = self.npix - startpix - ringpix;
        }
        (startpix, ringpix, theta, shifted)
    }

    /// Neighbouring pixels of one ring bracketing longitude `phi`, with weights.
    fn ring_pair(&self, ring: i64, phi: f64) -> ([i64; 2], [f64; 2], f64) {
        let (startpix, ringpix, theta, shifted) = self.ring_info(ring);
        let shift = if shifted { 0.5 } else { 0.0 };
        let dphi = TAU / ringpix as f64;
        let tmp = phi / dphi - shift;
        let mut i1 = if tmp < 0.0 { tmp as i64 - 1 } else { tmp as i64 };
        let w1 = (phi - (i1 as f64 + shift) * dphi) / dphi;
        let mut i2 = i1 + 1;
        if i1 < 0 {
            i1 += ringpix;
        }
        if i2 >= ringpix {
            i2 -= ringpix;
        }
        ([startpix + i1, startpix + i2], [1.0 - w1, w1], theta)
    }

    /// Bilinear interpolator over the four pixels surrounding `dir`.
    ///
    /// The returned weights are non-negative and sum to one; pixel indices
    /// follow this pixelisation's ordering.
    pub fn interpolator(&self, dir: &SkyDir) -> Interpolator {
        let (phi, theta) = self.native_angles(dir);
        let nside = self.nside;
        let ir1 = self.ring_above(theta.cos());
        let ir2 = ir1 + 1;

        let mut pix = [0i64; 4];
        let mut wgt = [0.0; 4];
        let mut theta1 = 0.0;
        let mut theta2 = 0.0;

        if ir1 > 0 {
            let (p, w, t) = self.ring_pair(ir1, phi);
            pix[0] = p[0];
            pix[1] = p[1];
            wgt[0] = w[0];
            wgt[1] = w[1];
            theta1 = t;
        }
        if ir2 < 4 * nside {
            let (p, w, t) = self.ring_pair(ir2, phi);
            pix[2] = p[0];
            pix[3] = p[1];
            wgt[2] = w[0];
            wgt[3] = w[1];
            theta2 = t;
        }

        if ir1 == 0 {
            // North polar cap: the first ring's opposite pixels stand in for the pole
            let wtheta = theta / theta2;
            wgt[2] *= wtheta;
            wgt[3] *= wtheta;
            let fac = (1.0 - wtheta) * 0.25;
            wgt[0] = fac;
            wgt[1] = fac;
            wgt[2] += fac;
            wgt[3] += fac;
            pix[0] = (pix[2] + 2) & 3;
            pix[1] = (pix[3] + 2) & 3;
        } else if ir2 == 4 * nside {
            let wtheta = (theta - theta1) / (PI - theta1);
            wgt[0] *= 1.0 - wtheta;
            wgt[1] *= 1.0 - wtheta;
            let fac = wtheta * 0.25;
            wgt[0] += fac;
            wgt[1] += fac;
            wgt[2] = fac;
            wgt[3] = fac;
            pix[2] = ((pix[0] + 2) & 3) + self.npix - 4;
            pix[3] = ((pix[1] + 2) & 3) + self.npix - 4;
        } else {
            let wtheta = (theta - theta1) / (theta2 - theta1);
            wgt[0] *= 1.0 - wtheta;
            wgt[1] *= 1.0 - wtheta;
            wgt[2] *= wtheta;
            wgt[3] *= wtheta;
        }

        let mut indices = [0usize; 4];
        for (slot, &p) in indices.iter_mut().zip(pix.iter()) {
            *slot = match self.ordering {
                HealpixOrdering::Ring => p as usize,
                HealpixOrdering::Nested => {
                    let (ix, iy, face) = self.ring2xyf(p);
                    self.xyf2nest(ix, iy, face) as usize
                }
            };
        }
        Interpolator::new(indices, wgt)
    }

    /// Write the pixelisation keywords.
    pub fn write_header(&self, header: &mut Header) {
        header.set("PIXTYPE", "HEALPIX", "HEALPix pixelisation");
        header.set("ORDERING", self.ordering.as_str(), "Pixel ordering scheme");
        header.set("NSIDE", self.nside(), "Resolution parameter");
        header.set("FIRSTPIX", 0usize, "First pixel index (0 based)");
        header.set("LASTPIX", self.npix() - 1, "Last pixel index (0 based)");
        header.set("COORDSYS", self.coords.healpix_code(), "Coordinate system");
    }

    /// Build a pixelisation from its header keywords.
    pub fn from_header(header: &Header) -> Result<Self, SkyMapError> {
        let nside = header.integer("NSIDE")?;
        let ordering = header.string("ORDERING")?.parse()?;
        let coords = match header.string("COORDSYS") {
            Ok(code) => code.parse()?,
            Err(_) => CoordSystem::Celestial,
        };
        if nside < 1 {
            return Err(SkyMapError::InvalidArgument(format!(
                "HEALPix nside must be positive, got {nside}"
            )));
        }
        Self::new(nside as usize, ordering, coords)
    }
}

impl fmt::Display for Healpix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HEALPix nside={} ({} ordering, {} pixels, {})",
            self.nside,
            self.ordering.as_str(),
            self.npix,
            self.coords
        )
    }
}
