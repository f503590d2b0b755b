//! Circular regions of interest.
//!
//! Event files carry their selection region in the data sub-space keywords:
//! `DSTYPn = 'POS(RA,DEC)'` paired with `DSVALn = 'CIRCLE(ra,dec,radius)'`
//! in degrees.

use std::fmt;

use skymap::io::Header;
use skymap::SkyDir;

use crate::error::ResponseError;

const POSITION_TYPE: &str = "POS(RA,DEC)";

/// Angular disk on the sky.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOfInterest {
    centre: SkyDir,
    radius_deg: f64,
}

impl RegionOfInterest {
    pub fn new(centre: SkyDir, radius_deg: f64) -> Result<Self, ResponseError> {
        if !(radius_deg > 0.0 && radius_deg <= 180.0) {
            return Err(ResponseError::InvalidArgument(format!(
                "RoI radius must be in (0, 180] degrees, got {radius_deg}"
            )));
        }
        Ok(Self { centre, radius_deg })
    }

    pub fn centre(&self) -> SkyDir {
        self.centre
    }

    pub fn radius_deg(&self) -> f64 {
        self.radius_deg
    }

    /// Whether `dir` lies within the radius (boundary included).
    pub fn contains(&self, dir: &SkyDir) -> bool {
        self.centre.dist_deg(dir) <= self.radius_deg
    }

    /// Write the data sub-space keywords.
    pub fn write_header(&self, header: &mut Header) {
        header.set("NDSKEYS", 1_i64, "Number of data sub-space keys");
        header.set("DSTYP1", POSITION_TYPE, "Data sub-space type");
        header.set("DSUNI1", "deg", "Data sub-space unit");
        header.set(
            "DSVAL1",
            format!(
                "CIRCLE({},{},{})",
                self.centre.ra_deg(),
                self.centre.dec_deg(),
                self.radius_deg
            ),
            "Data sub-space value",
        );
    }

    /// Read the positional data sub-space, if the header declares one.
    pub fn from_header(header: &Header) -> Result<Option<Self>, ResponseError> {
        let nkeys = header.integer("NDSKEYS").unwrap_or(0).max(0);
        for n in 1..=nkeys {
            let Ok(kind) = header.string(&format!("DSTYP{n}")) else {
                continue;
            };
            if kind.trim().eq_ignore_ascii_case(POSITION_TYPE) {
                let value = header.string(&format!("DSVAL{n}"))?;
                return Self::parse_circle(&value).map(Some);
            }
        }
        Ok(None)
    }

    fn parse_circle(value: &str) -> Result<Self, ResponseError> {
        let malformed = || {
            ResponseError::InvalidValue(format!(
                "Data sub-space value \"{value}\" is not of the form CIRCLE(ra,dec,radius)"
            ))
        };
        let inner = value
            .trim()
            .strip_prefix("CIRCLE(")
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(malformed)?;
        let numbers = inner
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed())?;
        match numbers.as_slice() {
            [ra, dec, radius] => Self::new(SkyDir::from_radec_deg(*ra, *dec), *radius),
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for RegionOfInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoI centre {} radius {} deg", self.centre, self.radius_deg)
    }
}
