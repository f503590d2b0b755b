//! Background rate cube.
//!
//! One sky map layer per energy bin, holding the background rate in
//! counts/s/MeV/sr at the bin's geometric centre. Rates between bins are
//! interpolated linearly in log energy.

use std::fmt;
use std::path::Path;

use log::info;
use rayon::prelude::*;
use skymap::io::{read_fits, write_fits, FitsContainer};
use skymap::{SkyDir, SkyMap};

use crate::energy::{Energy, EnergyBounds, EnergyExt, EBOUNDS_EXTNAME};
use crate::error::ResponseError;
use crate::irf::instrument_response;
use crate::node_array::NodeArray;
use crate::observation::{EventCube, Observation};

#[derive(Debug, Clone, Default)]
pub struct BackgroundCube {
    cube: SkyMap,
    ebounds: EnergyBounds,
    energy_axis: NodeArray,
}

impl BackgroundCube {
    /// Zero-filled cube on the geometry of `map`, one layer per energy bin.
    pub fn new(map: &SkyMap, ebounds: EnergyBounds) -> Result<Self, ResponseError> {
        if map.is_empty() || ebounds.is_empty() {
            return Err(ResponseError::InvalidArgument(
                "Background cube needs a sky map with pixels and at least one energy bin"
                    .to_string(),
            ));
        }
        let mut cube = map.extract(0, 1)?;
        cube.set_layer_count(ebounds.len())?;
        cube.fill(0.0);
        Self::assemble(cube, ebounds)
    }

    pub fn from_event_cube(events: &EventCube) -> Result<Self, ResponseError> {
        Self::new(events.counts(), events.ebounds().clone())
    }

    fn assemble(cube: SkyMap, ebounds: EnergyBounds) -> Result<Self, ResponseError> {
        if cube.nlayers() != ebounds.len() {
            return Err(ResponseError::SizeMismatch(format!(
                "Background cube has {} layers for {} energy bins",
                cube.nlayers(),
                ebounds.len()
            )));
        }
        let energy_axis = NodeArray::new(ebounds.log_centres())?;
        Ok(Self {
            cube,
            ebounds,
            energy_axis,
        })
    }

    pub fn map(&self) -> &SkyMap {
        &self.cube
    }

    pub fn ebounds(&self) -> &EnergyBounds {
        &self.ebounds
    }

    /// Background rate in counts/s/MeV/sr at `dir` and `energy`, never negative.
    pub fn evaluate(&self, dir: &SkyDir, energy: Energy) -> Result<f64, ResponseError> {
        let w = self.energy_axis.interpolate(energy.log10_tev());
        let rate = w.wgt_left * self.cube.value_at(dir, w.left)?
            + w.wgt_right * self.cube.value_at(dir, w.right)?;
        Ok(rate.max(0.0))
    }

    /// Spatially integrated rate in counts/s/MeV at `log_energy` (log10 TeV).
    pub fn integral(&self, log_energy: f64) -> Result<f64, ResponseError> {
        let w = self.energy_axis.interpolate(log_energy);
        let left = self.cube.layer(w.left)?;
        let right = self.cube.layer(w.right)?;
        let mut total = 0.0;
        for (index, (l, r)) in left.iter().zip(right).enumerate() {
            let value = w.wgt_left * l + w.wgt_right * r;
            // Pixels outside the projection domain carry no solid angle
            if let Ok(omega) = self.cube.solid_angle(index) {
                total += value * omega;
            }
        }
        Ok(total)
    }

    /// Set the cube to the livetime weighted mean background rate of `observations`.
    ///
    /// Every observation contributes its rate times livetime inside its region
    /// of interest; the sum is divided by the total livetime. Without any
    /// livetime the cube stays zero.
    pub fn fill(&mut self, observations: &[&dyn Observation]) -> Result<(), ResponseError> {
        let log_energies = self.energy_axis.nodes().to_vec();
        let npix = self.cube.npix();
        let dirs: Vec<Option<SkyDir>> = (0..npix).map(|i| self.cube.index_to_dir(i).ok()).collect();

        let contributions = observations
            .par_iter()
            .map(|obs| -> Result<(Vec<f64>, f64), ResponseError> {
                let roi = obs.roi()?;
                let irf = instrument_response(obs.response())?;
                let pointing = obs.pointing();
                let livetime = obs.livetime();
                let mut rates = vec![0.0; npix * log_energies.len()];
                for (pixel, dir) in dirs.iter().enumerate() {
                    let Some(dir) = dir else { continue };
                    if !roi.contains(dir) {
                        continue;
                    }
                    let theta = pointing.dist(dir);
                    for (iebin, &log_e) in log_energies.iter().enumerate() {
                        rates[pixel + npix * iebin] = irf.background(theta, log_e) * livetime;
                    }
                }
                Ok((rates, livetime))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total_livetime: f64 = contributions.iter().map(|(_, t)| t).sum();
        let values = self.cube.pixels_mut();
        values.fill(0.0);
        if total_livetime > 0.0 {
            for (rates, _) in &contributions {
                values.iter_mut().zip(rates).for_each(|(v, r)| *v += r);
            }
            values.iter_mut().for_each(|v| *v /= total_livetime);
        }
        info!(
            "Filled background cube from {} observations with {total_livetime:.1} s livetime",
            observations.len()
        );
        Ok(())
    }

    /// Append the cube image and its `EBOUNDS` table.
    pub fn write(&self, container: &mut FitsContainer) -> Result<(), ResponseError> {
        self.cube.write(container)?;
        container.push(self.ebounds.to_hdu()?);
        Ok(())
    }

    pub fn read(container: &FitsContainer) -> Result<Self, ResponseError> {
        let cube = SkyMap::read(container)?;
        let ebounds = EnergyBounds::from_table(container.table(EBOUNDS_EXTNAME)?)?;
        Self::assemble(cube, ebounds)
    }

    /// Write the cube and its `EBOUNDS` table to a FITS file.
    pub fn save<P: AsRef<Path>>(&self, path: P, clobber: bool) -> Result<(), ResponseError> {
        let mut container = FitsContainer::new();
        self.write(&mut container)?;
        write_fits(&container, &path, clobber)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ResponseError> {
        let cube = Self::read(&read_fits(&path)?)?;
        info!("Loaded background cube from {}", path.as_ref().display());
        Ok(cube)
    }
}

impl fmt::Display for BackgroundCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== BackgroundCube ===")?;
        writeln!(f, " Energy bins ...............: {}", self.ebounds)?;
        write!(f, "{}", self.cube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irf::{GaussianIrf, InstrumentResponse};
    use crate::observation::{EventList, Events, PointingObservation};
    use crate::roi::RegionOfInterest;
    use approx::assert_relative_eq;
    use skymap::{CoordSystem, WcsGeometry};
    use std::sync::Arc;

    fn centre() -> SkyDir {
        SkyDir::from_lb_deg(0.0, 0.0)
    }

    fn empty_cube() -> BackgroundCube {
        let geometry =
            WcsGeometry::new("CAR", CoordSystem::Galactic, [0.0, 0.0], [-0.2, 0.2], 11, 11);
        let map = SkyMap::new_wcs(&geometry, 1).unwrap();
        let ebounds =
            EnergyBounds::log_spaced(Energy::from_tev(0.1), Energy::from_tev(100.0), 3).unwrap();
        BackgroundCube::new(&map, ebounds).unwrap()
    }

    fn observation(livetime: f64, roi_radius: f64) -> PointingObservation {
        let roi = RegionOfInterest::new(centre(), roi_radius).unwrap();
        PointingObservation::new("bgd", centre(), livetime, Arc::new(GaussianIrf::default()))
            .unwrap()
            .with_loaded_events(Events::List(EventList::new(vec![], Some(roi))))
    }

    #[test]
    fn test_fill_single_observation_matches_irf() {
        let mut cube = empty_cube();
        cube.fill(&[&observation(600.0, 5.0)]).unwrap();

        let irf = GaussianIrf::default();
        let log_e = cube.ebounds().elogmean(1).unwrap().log10_tev();
        let expected = irf.background(0.0, log_e);
        let value = cube.map().value(60, 1).unwrap();
        assert_relative_eq!(value, expected, max_relative = 1e-9);
    }

    #[test]
    fn test_fill_livetime_weighting() {
        // The same rate observed twice averages to that rate
        let mut cube = empty_cube();
        let a = observation(100.0, 5.0);
        let b = observation(300.0, 5.0);
        cube.fill(&[&a, &b]).unwrap();
        let mut single = empty_cube();
        single.fill(&[&a]).unwrap();
        for (x, y) in cube.map().pixels().iter().zip(single.map().pixels()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12);
        }

        // A smaller RoI contributes nothing outside its radius
        let mut cube = empty_cube();
        let narrow = observation(100.0, 0.5);
        cube.fill(&[&narrow]).unwrap();
        assert_eq!(cube.map().value(0, 0).unwrap(), 0.0);
        assert!(cube.map().value(60, 0).unwrap() > 0.0);
    }

    #[test]
    fn test_evaluate_interpolates_in_log_energy() {
        let mut cube = empty_cube();
        for layer in 0..3 {
            cube.cube.layer_mut(layer).unwrap().fill(layer as f64 + 1.0);
        }
        // log centres are -0.5, 0.5, 1.5
        let value = cube.evaluate(&centre(), Energy::from_tev(1.0)).unwrap();
        assert_relative_eq!(value, 1.5, epsilon = 1e-9);

        // Extrapolation below the first node would go negative
        cube.cube.layer_mut(0).unwrap().fill(0.5);
        cube.cube.layer_mut(1).unwrap().fill(3.0);
        let value = cube.evaluate(&centre(), Energy::from_tev(0.001)).unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_integral_of_constant_rate() {
        let mut cube = empty_cube();
        cube.cube.fill(2.0);
        let omega: f64 = (0..cube.map().npix())
            .map(|i| cube.map().solid_angle(i).unwrap())
            .sum();
        assert_relative_eq!(cube.integral(0.3).unwrap(), 2.0 * omega, max_relative = 1e-12);
    }

    #[test]
    fn test_container_round_trip() {
        let mut cube = empty_cube();
        cube.fill(&[&observation(600.0, 1.0)]).unwrap();
        let mut container = FitsContainer::new();
        cube.write(&mut container).unwrap();
        let back = BackgroundCube::read(&container).unwrap();
        assert_eq!(back.map().pixels(), cube.map().pixels());
        assert_eq!(back.ebounds(), cube.ebounds());
    }

    #[test]
    fn test_file_round_trip() {
        let mut cube = empty_cube();
        cube.fill(&[&observation(600.0, 1.0)]).unwrap();
        let dir = test_helpers::scratch_dir().unwrap();
        let path = dir.path().join("bgd_cube.fits");
        cube.save(&path, false).unwrap();
        assert!(cube.save(&path, false).is_err());

        let back = BackgroundCube::load(&path).unwrap();
        assert_eq!(back.map().pixels(), cube.map().pixels());
        assert_eq!(back.ebounds(), cube.ebounds());
    }

    #[test]
    fn test_zero_livetime_leaves_cube_empty() {
        let mut cube = empty_cube();
        cube.fill(&[&observation(0.0, 5.0)]).unwrap();
        assert!(cube.map().pixels().iter().all(|&v| v == 0.0));
    }
}
