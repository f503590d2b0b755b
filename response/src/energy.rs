//! Photon energies and energy binning.
//!
//! Energies are `uom` quantities; gamma-ray work mostly talks in MeV and
//! in log10 of the energy in TeV, so [`EnergyExt`] adds those views.
//! [`EnergyBounds`] persists as an `EBOUNDS` table with `E_MIN` and `E_MAX`
//! columns in MeV.

use std::fmt;

use skymap::io::{Column, Hdu, Header, Table};
use uom::si::energy::{megaelectronvolt, teraelectronvolt};

use crate::error::ResponseError;

/// Photon energy.
pub type Energy = uom::si::f64::Energy;

/// Extension name of energy boundary tables.
pub const EBOUNDS_EXTNAME: &str = "EBOUNDS";

/// Extension trait for the energy scales used in gamma-ray analysis
pub trait EnergyExt {
    /// Create energy from MeV
    fn from_mev(mev: f64) -> Self;

    /// Get energy in MeV
    fn as_mev(&self) -> f64;

    /// Create energy from TeV
    fn from_tev(tev: f64) -> Self;

    /// Get energy in TeV
    fn as_tev(&self) -> f64;

    /// log10 of the energy in TeV
    fn log10_tev(&self) -> f64;
}

impl EnergyExt for Energy {
    fn from_mev(mev: f64) -> Self {
        Energy::new::<megaelectronvolt>(mev)
    }

    fn as_mev(&self) -> f64 {
        self.get::<megaelectronvolt>()
    }

    fn from_tev(tev: f64) -> Self {
        Energy::new::<teraelectronvolt>(tev)
    }

    fn as_tev(&self) -> f64 {
        self.get::<teraelectronvolt>()
    }

    fn log10_tev(&self) -> f64 {
        self.as_tev().log10()
    }
}

/// Ordered list of energy bins `[emin, emax)`, stored in MeV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyBounds {
    min_mev: Vec<f64>,
    max_mev: Vec<f64>,
}

impl EnergyBounds {
    /// Bins from explicit `(emin, emax)` pairs.
    ///
    /// Each bin must have `0 < emin < emax` and bins must be ordered by their
    /// lower edge.
    pub fn new(bins: &[(Energy, Energy)]) -> Result<Self, ResponseError> {
        let min_mev: Vec<f64> = bins.iter().map(|(lo, _)| lo.as_mev()).collect();
        let max_mev: Vec<f64> = bins.iter().map(|(_, hi)| hi.as_mev()).collect();
        Self::from_mev(min_mev, max_mev)
    }

    fn from_mev(min_mev: Vec<f64>, max_mev: Vec<f64>) -> Result<Self, ResponseError> {
        if min_mev.len() != max_mev.len() {
            return Err(ResponseError::SizeMismatch(format!(
                "{} lower but {} upper energy boundaries",
                min_mev.len(),
                max_mev.len()
            )));
        }
        for (i, (&lo, &hi)) in min_mev.iter().zip(max_mev.iter()).enumerate() {
            if !(lo > 0.0 && lo < hi && hi.is_finite()) {
                return Err(ResponseError::InvalidArgument(format!(
                    "Energy bin {i} [{lo}, {hi}] MeV must satisfy 0 < emin < emax"
                )));
            }
            if i > 0 && lo < min_mev[i - 1] {
                return Err(ResponseError::InvalidArgument(format!(
                    "Energy bin {i} starts below energy bin {}",
                    i - 1
                )));
            }
        }
        Ok(Self { min_mev, max_mev })
    }

    /// `num_bins` logarithmically spaced bins between `emin` and `emax`.
    pub fn log_spaced(emin: Energy, emax: Energy, num_bins: usize) -> Result<Self, ResponseError> {
        if num_bins < 1 {
            return Err(ResponseError::InvalidArgument(
                "Number of energy bins must be at least 1".to_string(),
            ));
        }
        let (lo, hi) = (emin.as_mev(), emax.as_mev());
        if !(lo > 0.0 && lo < hi && hi.is_finite()) {
            return Err(ResponseError::InvalidArgument(format!(
                "Energy range [{lo}, {hi}] MeV must satisfy 0 < emin < emax"
            )));
        }
        let step = (hi / lo).log10() / num_bins as f64;
        let edge = |i: usize| {
            if i == num_bins {
                hi
            } else {
                lo * 10f64.powf(step * i as f64)
            }
        };
        let min_mev = (0..num_bins).map(edge).collect();
        let max_mev = (1..=num_bins).map(edge).collect();
        Self::from_mev(min_mev, max_mev)
    }

    pub fn len(&self) -> usize {
        self.min_mev.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min_mev.is_empty()
    }

    fn check(&self, index: usize) -> Result<(), ResponseError> {
        if index >= self.len() {
            return Err(ResponseError::OutOfRange {
                what: "Energy bin",
                index,
                size: self.len(),
            });
        }
        Ok(())
    }

    pub fn emin(&self, index: usize) -> Result<Energy, ResponseError> {
        self.check(index)?;
        Ok(Energy::from_mev(self.min_mev[index]))
    }

    pub fn emax(&self, index: usize) -> Result<Energy, ResponseError> {
        self.check(index)?;
        Ok(Energy::from_mev(self.max_mev[index]))
    }

    /// Geometric centre of bin `index`.
    pub fn elogmean(&self, index: usize) -> Result<Energy, ResponseError> {
        self.check(index)?;
        Ok(Energy::from_mev(
            (self.min_mev[index] * self.max_mev[index]).sqrt(),
        ))
    }

    /// log10 (TeV) of every bin's geometric centre.
    pub fn log_centres(&self) -> Vec<f64> {
        self.min_mev
            .iter()
            .zip(&self.max_mev)
            .map(|(lo, hi)| ((lo * hi).sqrt() * 1.0e-6).log10())
            .collect()
    }

    /// Index of the bin containing `energy`, if any.
    pub fn index_of(&self, energy: Energy) -> Option<usize> {
        let e = energy.as_mev();
        (0..self.len()).find(|&i| e >= self.min_mev[i] && e < self.max_mev[i])
    }

    /// Serialise as an `EBOUNDS` table.
    pub fn to_hdu(&self) -> Result<Hdu, ResponseError> {
        let table = Table::new(self.len())
            .with_column(Column::scalar("E_MIN", "MeV", self.min_mev.clone()))?
            .with_column(Column::scalar("E_MAX", "MeV", self.max_mev.clone()))?;
        let mut header = Header::new();
        header.set("NBINS", self.len(), "Number of energy bins");
        Ok(Hdu::table(EBOUNDS_EXTNAME, header, table))
    }

    /// Read from a table holding `E_MIN` and `E_MAX` columns in MeV.
    pub fn from_table(table: &Table) -> Result<Self, ResponseError> {
        let min_mev = table.column("E_MIN")?.data().to_vec();
        let max_mev = table.column("E_MAX")?.data().to_vec();
        Self::from_mev(min_mev, max_mev)
    }
}

impl fmt::Display for EnergyBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnergyBounds({} bins", self.len())?;
        if let (Some(lo), Some(hi)) = (self.min_mev.first(), self.max_mev.last()) {
            write!(f, ", {lo:.3} - {hi:.3} MeV")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_energy_scales() {
        let e = Energy::from_tev(1.0);
        assert_relative_eq!(e.as_mev(), 1.0e6, max_relative = 1e-12);
        assert_relative_eq!(e.log10_tev(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(Energy::from_mev(100.0).log10_tev(), -4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_log_spaced_bins() {
        let eb =
            EnergyBounds::log_spaced(Energy::from_tev(0.1), Energy::from_tev(100.0), 3).unwrap();
        assert_eq!(eb.len(), 3);
        assert_relative_eq!(eb.emin(0).unwrap().as_tev(), 0.1, max_relative = 1e-12);
        assert_relative_eq!(eb.emax(0).unwrap().as_tev(), 1.0, max_relative = 1e-12);
        assert_relative_eq!(eb.emax(2).unwrap().as_tev(), 100.0, max_relative = 1e-12);
        let centres = eb.log_centres();
        assert_relative_eq!(centres[0], -0.5, epsilon = 1e-12);
        assert_relative_eq!(centres[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(
            eb.elogmean(2).unwrap().log10_tev(),
            1.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_invalid_bins() {
        assert!(matches!(
            EnergyBounds::log_spaced(Energy::from_tev(1.0), Energy::from_tev(0.1), 2),
            Err(ResponseError::InvalidArgument(_))
        ));
        assert!(matches!(
            EnergyBounds::log_spaced(Energy::from_tev(0.1), Energy::from_tev(1.0), 0),
            Err(ResponseError::InvalidArgument(_))
        ));
        assert!(matches!(
            EnergyBounds::new(&[(Energy::from_mev(0.0), Energy::from_mev(1.0))]),
            Err(ResponseError::InvalidArgument(_))
        ));
        let eb = EnergyBounds::new(&[(Energy::from_mev(1.0), Energy::from_mev(2.0))]).unwrap();
        assert!(matches!(
            eb.emin(1),
            Err(ResponseError::OutOfRange { index: 1, size: 1, .. })
        ));
    }

    #[test]
    fn test_index_of() {
        let eb =
            EnergyBounds::log_spaced(Energy::from_tev(0.1), Energy::from_tev(10.0), 2).unwrap();
        assert_eq!(eb.index_of(Energy::from_tev(0.5)), Some(0));
        assert_eq!(eb.index_of(Energy::from_tev(5.0)), Some(1));
        assert_eq!(eb.index_of(Energy::from_tev(50.0)), None);
    }

    #[test]
    fn test_table_round_trip() {
        let eb =
            EnergyBounds::log_spaced(Energy::from_mev(1.0e4), Energy::from_mev(1.0e7), 4).unwrap();
        let hdu = eb.to_hdu().unwrap();
        assert_eq!(hdu.name(), EBOUNDS_EXTNAME);
        let table = hdu.as_table().unwrap();
        assert_eq!(table.column("E_MIN").unwrap().unit(), "MeV");
        let back = EnergyBounds::from_table(table).unwrap();
        assert_eq!(back, eb);
    }
}
