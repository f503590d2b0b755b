//! Point spread function cube.
//!
//! The cube stores, for every sky pixel, the PSF value on a grid of
//! angular separations (deltas) and energies. Layer `idelta + ndeltas * iebin`
//! of the underlying [`SkyMap`] holds separation `idelta` at energy bin
//! `iebin`. Lookups interpolate bilinearly in (delta, log energy) and
//! spatially through the sky map.
//!
//! Separation nodes are usually spaced quadratically,
//! `delta_i = (binsize * (i + 0.5))^2`, which keeps the first node off the
//! central singularity. When loaded nodes follow that scheme the cube
//! interpolates in `sqrt(delta)`, where the nodes are evenly spaced.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use skymap::io::{read_fits, write_fits, Column, FitsContainer, Hdu, Header, Table};
use skymap::{MapDefinition, SkyDir, SkyMap};

use crate::energy::{Energy, EnergyBounds, EnergyExt, EBOUNDS_EXTNAME};
use crate::error::ResponseError;
use crate::irf::instrument_response;
use crate::node_array::NodeArray;
use crate::observation::{EventCube, Observation};

/// Extension name of the separation node table.
pub const DELTAS_EXTNAME: &str = "DELTAS";

const QUADRATIC_TOLERANCE: f64 = 1.0e-6;

/// Serializable recipe for an empty PSF cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsfCubeDefinition {
    /// Sky geometry of every layer
    pub geometry: MapDefinition,

    /// Lower edge of the energy range in TeV
    pub emin_tev: f64,

    /// Upper edge of the energy range in TeV
    pub emax_tev: f64,

    /// Number of logarithmic energy bins
    pub num_energies: usize,

    /// Largest separation in degrees
    pub dmax_deg: f64,

    /// Number of separation nodes
    pub num_deltas: usize,

    /// Space separation nodes quadratically
    #[serde(default = "default_true")]
    pub quadratic_binning: bool,

    /// Cap the first and zero the last separation node after filling
    #[serde(default)]
    pub smooth: bool,
}

fn default_true() -> bool {
    true
}

impl PsfCubeDefinition {
    pub fn load_from_file(path: &Path) -> Result<Self, ResponseError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ResponseError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Separation nodes in degrees.
///
/// # Arguments
/// * `dmax_deg` - Largest separation covered
/// * `num_deltas` - Number of nodes
/// * `quadratic` - Space nodes evenly in `sqrt(delta)` instead of `delta`
pub fn delta_nodes(dmax_deg: f64, num_deltas: usize, quadratic: bool) -> Vec<f64> {
    (0..num_deltas)
        .map(|i| {
            if quadratic {
                let binsize = dmax_deg.sqrt() / num_deltas as f64;
                let delta = binsize * (i as f64 + 0.5);
                delta * delta
            } else {
                let binsize = dmax_deg / num_deltas as f64;
                binsize * (i as f64 + 0.5)
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct LayerWeights {
    delta: f64,
    log_energy: f64,
    layers: [usize; 4],
    weights: [f64; 4],
}

/// PSF values per sky pixel, separation and energy.
#[derive(Debug, Default)]
pub struct PsfCube {
    cube: SkyMap,
    ebounds: EnergyBounds,
    deltas: Vec<f64>,
    delta_axis: NodeArray,
    energy_axis: NodeArray,
    quadratic_binning: bool,
    smooth: bool,
    weights: Mutex<Option<LayerWeights>>,
}

impl Clone for PsfCube {
    fn clone(&self) -> Self {
        Self {
            cube: self.cube.clone(),
            ebounds: self.ebounds.clone(),
            deltas: self.deltas.clone(),
            delta_axis: self.delta_axis.clone(),
            energy_axis: self.energy_axis.clone(),
            quadratic_binning: self.quadratic_binning,
            smooth: self.smooth,
            weights: Mutex::new(None),
        }
    }
}

impl PsfCube {
    /// Empty cube on the geometry of `map` with zero-filled layers.
    ///
    /// # Arguments
    /// * `map` - Sky geometry; its values and layer count are discarded
    /// * `ebounds` - Energy bins
    /// * `deltas` - Separation nodes in degrees, strictly increasing and positive
    pub fn new(map: &SkyMap, ebounds: EnergyBounds, deltas: Vec<f64>) -> Result<Self, ResponseError> {
        if map.is_empty() {
            return Err(ResponseError::InvalidArgument(
                "PSF cube needs a sky map with pixels".to_string(),
            ));
        }
        if ebounds.is_empty() || deltas.is_empty() {
            return Err(ResponseError::InvalidArgument(format!(
                "PSF cube needs at least one energy bin and one separation, got {} and {}",
                ebounds.len(),
                deltas.len()
            )));
        }
        if deltas[0] <= 0.0 {
            return Err(ResponseError::InvalidArgument(format!(
                "Separations must be positive, first node is {}",
                deltas[0]
            )));
        }
        let mut cube = map.extract(0, 1)?;
        cube.set_layer_count(ebounds.len() * deltas.len())?;
        cube.fill(0.0);
        Self::assemble(cube, ebounds, deltas)
    }

    /// Cube with the geometry and energy binning of a counts cube.
    pub fn from_event_cube(
        events: &EventCube,
        dmax_deg: f64,
        num_deltas: usize,
    ) -> Result<Self, ResponseError> {
        Self::check_delta_range(dmax_deg, num_deltas)?;
        Self::new(
            events.counts(),
            events.ebounds().clone(),
            delta_nodes(dmax_deg, num_deltas, true),
        )
    }

    /// Empty cube built from a serializable recipe.
    pub fn from_definition(definition: &PsfCubeDefinition) -> Result<Self, ResponseError> {
        Self::check_delta_range(definition.dmax_deg, definition.num_deltas)?;
        let map = definition.geometry.build(1)?;
        let ebounds = EnergyBounds::log_spaced(
            Energy::from_tev(definition.emin_tev),
            Energy::from_tev(definition.emax_tev),
            definition.num_energies,
        )?;
        let deltas = delta_nodes(
            definition.dmax_deg,
            definition.num_deltas,
            definition.quadratic_binning,
        );
        let mut cube = Self::new(&map, ebounds, deltas)?;
        cube.smooth = definition.smooth;
        Ok(cube)
    }

    fn check_delta_range(dmax_deg: f64, num_deltas: usize) -> Result<(), ResponseError> {
        if !(dmax_deg > 0.0 && dmax_deg.is_finite()) || num_deltas < 1 {
            return Err(ResponseError::InvalidArgument(format!(
                "Separation axis needs dmax > 0 and at least one node, got dmax={dmax_deg} with {num_deltas} nodes"
            )));
        }
        Ok(())
    }

    fn assemble(cube: SkyMap, ebounds: EnergyBounds, deltas: Vec<f64>) -> Result<Self, ResponseError> {
        let expected = ebounds.len() * deltas.len();
        if cube.nlayers() != expected {
            return Err(ResponseError::SizeMismatch(format!(
                "PSF cube has {} layers but {} energies times {} separations need {expected}",
                cube.nlayers(),
                ebounds.len(),
                deltas.len()
            )));
        }
        let (delta_axis, quadratic_binning) = Self::delta_axis(&deltas)?;
        let energy_axis = NodeArray::new(ebounds.log_centres())?;
        debug!(
            "PSF cube axes: {} energies, {} separations, quadratic binning {quadratic_binning}",
            ebounds.len(),
            deltas.len()
        );
        Ok(Self {
            cube,
            ebounds,
            deltas,
            delta_axis,
            energy_axis,
            quadratic_binning,
            smooth: false,
            weights: Mutex::new(None),
        })
    }

    /// Interpolation axis for the separation nodes (given in degrees).
    ///
    /// Returns the `sqrt(delta)` axis in sqrt-radians when the nodes follow
    /// the quadratic scheme within a relative tolerance, the plain axis in
    /// radians otherwise.
    fn delta_axis(deltas: &[f64]) -> Result<(NodeArray, bool), ResponseError> {
        let radians: Vec<f64> = deltas.iter().map(|d| d.to_radians()).collect();
        let n = radians.len();
        if n > 1 {
            let binsize = (radians[n - 1].sqrt() - radians[0].sqrt()) / (n - 1) as f64;
            let roots: Vec<f64> = (0..n).map(|i| binsize * (i as f64 + 0.5)).collect();
            let quadratic = roots
                .iter()
                .zip(&radians)
                .all(|(r, d)| (r * r - d).abs() <= QUADRATIC_TOLERANCE * d);
            if quadratic {
                return Ok((NodeArray::new(roots)?, true));
            }
        }
        Ok((NodeArray::new(radians)?, false))
    }

    pub fn map(&self) -> &SkyMap {
        &self.cube
    }

    pub fn ebounds(&self) -> &EnergyBounds {
        &self.ebounds
    }

    /// Separation nodes in degrees.
    pub fn deltas(&self) -> &[f64] {
        &self.deltas
    }

    pub fn quadratic_binning(&self) -> bool {
        self.quadratic_binning
    }

    pub fn smoothing(&self) -> bool {
        self.smooth
    }

    /// Apply [`PsfCube::set_to_smooth`] after every fill.
    pub fn set_smoothing(&mut self, smooth: bool) {
        self.smooth = smooth;
    }

    /// Layer holding separation `idelta` at energy bin `iebin`.
    pub fn offset(&self, idelta: usize, iebin: usize) -> usize {
        idelta + self.deltas.len() * iebin
    }

    fn layer_weights(&self, delta: f64, log_energy: f64) -> LayerWeights {
        let mut cached = self.weights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(w) = *cached {
            if w.delta == delta && w.log_energy == log_energy {
                return w;
            }
        }
        let x = if self.quadratic_binning {
            delta.sqrt()
        } else {
            delta
        };
        let d = self.delta_axis.interpolate(x);
        let e = self.energy_axis.interpolate(log_energy);
        let w = LayerWeights {
            delta,
            log_energy,
            layers: [
                self.offset(d.left, e.left),
                self.offset(d.left, e.right),
                self.offset(d.right, e.left),
                self.offset(d.right, e.right),
            ],
            weights: [
                d.wgt_left * e.wgt_left,
                d.wgt_left * e.wgt_right,
                d.wgt_right * e.wgt_left,
                d.wgt_right * e.wgt_right,
            ],
        };
        *cached = Some(w);
        w
    }

    /// PSF in 1/sr at `dir` for separation `delta` (radians) and `energy`.
    ///
    /// Interpolation overshoot below zero is clamped to zero.
    pub fn evaluate(&self, dir: &SkyDir, delta: f64, energy: Energy) -> Result<f64, ResponseError> {
        let w = self.layer_weights(delta, energy.log10_tev());
        let mut psf = 0.0;
        for (&layer, &weight) in w.layers.iter().zip(w.weights.iter()) {
            if weight != 0.0 {
                psf += weight * self.cube.value_at(dir, layer)?;
            }
        }
        Ok(psf.max(0.0))
    }

    /// Directions of all pixel centres; pixels off the projection domain are `None`.
    fn pixel_dirs(&self) -> Vec<Option<SkyDir>> {
        (0..self.cube.npix())
            .map(|i| self.cube.index_to_dir(i).ok())
            .collect()
    }

    /// Set the cube to the PSF of a single observation.
    ///
    /// Pixels outside the observation's region of interest stay zero.
    pub fn set(&mut self, observation: &dyn Observation) -> Result<(), ResponseError> {
        let roi = observation.roi()?;
        let irf = instrument_response(observation.response())?;
        let pointing = observation.pointing();
        let log_energies = self.energy_axis.nodes().to_vec();
        let nd = self.deltas.len();
        let npix = self.cube.npix();

        self.cube.fill(0.0);
        let dirs = self.pixel_dirs();
        let values = self.cube.pixels_mut();
        for (pixel, dir) in dirs.iter().enumerate() {
            let Some(dir) = dir else { continue };
            if !roi.contains(dir) {
                continue;
            }
            let theta = pointing.dist(dir);
            for (iebin, &log_e) in log_energies.iter().enumerate() {
                for (idelta, delta) in self.deltas.iter().enumerate() {
                    let layer = idelta + nd * iebin;
                    values[pixel + npix * layer] = irf.psf(delta.to_radians(), theta, log_e);
                }
            }
        }
        if self.smooth {
            self.set_to_smooth();
        }
        info!("Set PSF cube from observation {}", observation.name());
        Ok(())
    }

    /// Set the cube to the exposure weighted mean PSF of several observations.
    ///
    /// Each observation contributes `aeff * livetime` as weight at every
    /// pixel of its region of interest and energy. Pixel/energy cells without
    /// exposure are zero.
    pub fn fill(&mut self, observations: &[&dyn Observation]) -> Result<(), ResponseError> {
        let log_energies = self.energy_axis.nodes().to_vec();
        let deltas_rad: Vec<f64> = self.deltas.iter().map(|d| d.to_radians()).collect();
        let nd = deltas_rad.len();
        let ne = log_energies.len();
        let npix = self.cube.npix();
        let dirs = self.pixel_dirs();

        let contributions = observations
            .par_iter()
            .map(|obs| -> Result<(Vec<f64>, Vec<f64>), ResponseError> {
                let roi = obs.roi()?;
                let irf = instrument_response(obs.response())?;
                let pointing = obs.pointing();
                let livetime = obs.livetime();
                let mut values = vec![0.0; npix * ne * nd];
                let mut exposure = vec![0.0; npix * ne];
                for (pixel, dir) in dirs.iter().enumerate() {
                    let Some(dir) = dir else { continue };
                    if !roi.contains(dir) {
                        continue;
                    }
                    let theta = pointing.dist(dir);
                    for (iebin, &log_e) in log_energies.iter().enumerate() {
                        let weight = irf.aeff(theta, log_e) * livetime;
                        exposure[pixel + npix * iebin] += weight;
                        for (idelta, &delta) in deltas_rad.iter().enumerate() {
                            let layer = idelta + nd * iebin;
                            values[pixel + npix * layer] += irf.psf(delta, theta, log_e) * weight;
                        }
                    }
                }
                Ok((values, exposure))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut values = vec![0.0; npix * ne * nd];
        let mut exposure = vec![0.0; npix * ne];
        for (v, e) in &contributions {
            values.iter_mut().zip(v).for_each(|(a, b)| *a += b);
            exposure.iter_mut().zip(e).for_each(|(a, b)| *a += b);
        }

        let target = self.cube.pixels_mut();
        for iebin in 0..ne {
            for pixel in 0..npix {
                let weight = exposure[pixel + npix * iebin];
                for idelta in 0..nd {
                    let slot = pixel + npix * (idelta + nd * iebin);
                    target[slot] = if weight > 0.0 {
                        values[slot] / weight
                    } else {
                        0.0
                    };
                }
            }
        }
        if self.smooth {
            self.set_to_smooth();
        }
        info!("Filled PSF cube from {} observations", observations.len());
        Ok(())
    }

    /// Copy the second separation node onto the first and zero the last one.
    ///
    /// Only cubes with more than two separation nodes are touched.
    pub fn set_to_smooth(&mut self) {
        let nd = self.deltas.len();
        if nd <= 2 {
            return;
        }
        let npix = self.cube.npix();
        let values = self.cube.pixels_mut();
        for iebin in 0..self.ebounds.len() {
            let first = npix * (nd * iebin);
            let second = npix * (1 + nd * iebin);
            let last = npix * (nd - 1 + nd * iebin);
            values.copy_within(second..second + npix, first);
            values[last..last + npix].fill(0.0);
        }
    }

    /// Append the cube image, `EBOUNDS` and `DELTAS` to a container.
    pub fn write(&self, container: &mut FitsContainer) -> Result<(), ResponseError> {
        self.cube.write(container)?;
        container.push(self.ebounds.to_hdu()?);
        let table = Table::new(self.deltas.len())
            .with_column(Column::scalar("Value", "deg", self.deltas.clone()))?;
        container.push(Hdu::table(DELTAS_EXTNAME, Header::new(), table));
        Ok(())
    }

    /// Read a cube written by [`PsfCube::write`].
    pub fn read(container: &FitsContainer) -> Result<Self, ResponseError> {
        let cube = SkyMap::read(container)?;
        let ebounds = EnergyBounds::from_table(container.table(EBOUNDS_EXTNAME)?)?;
        let deltas = container
            .table(DELTAS_EXTNAME)?
            .column("Value")?
            .data()
            .to_vec();
        if ebounds.is_empty() || deltas.is_empty() {
            return Err(ResponseError::SizeMismatch(
                "PSF cube needs at least one energy bin and one separation".to_string(),
            ));
        }
        Self::assemble(cube, ebounds, deltas)
    }

    /// Write the cube, `EBOUNDS` and `DELTAS` to a FITS file.
    pub fn save<P: AsRef<Path>>(&self, path: P, clobber: bool) -> Result<(), ResponseError> {
        let mut container = FitsContainer::new();
        self.write(&mut container)?;
        write_fits(&container, &path, clobber)?;
        info!("Saved PSF cube to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ResponseError> {
        let cube = Self::read(&read_fits(&path)?)?;
        info!("Loaded PSF cube from {}", path.as_ref().display());
        Ok(cube)
    }
}

impl fmt::Display for PsfCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== PsfCube ===")?;
        writeln!(f, " Energy bins ...............: {}", self.ebounds.len())?;
        writeln!(f, " Separations ...............: {}", self.deltas.len())?;
        if let (Some(lo), Some(hi)) = (self.deltas.first(), self.deltas.last()) {
            writeln!(f, " Separation range ..........: {lo:.4} - {hi:.4} deg")?;
        }
        writeln!(f, " Quadratic binning .........: {}", self.quadratic_binning)?;
        write!(f, "{}", self.cube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irf::{GaussianIrf, InstrumentResponse, Response};
    use crate::observation::{EventAtom, EventList, EventSource, Events, PointingObservation};
    use crate::roi::RegionOfInterest;
    use approx::assert_relative_eq;
    use skymap::{CoordSystem, WcsGeometry};
    use std::sync::Arc;

    fn crab() -> SkyDir {
        SkyDir::from_radec_deg(83.63, 22.01)
    }

    fn definition() -> PsfCubeDefinition {
        PsfCubeDefinition {
            geometry: MapDefinition::Wcs(WcsGeometry::new(
                "CAR",
                CoordSystem::Celestial,
                [83.63, 22.01],
                [-0.5, 0.5],
                5,
                5,
            )),
            emin_tev: 0.1,
            emax_tev: 100.0,
            num_energies: 3,
            dmax_deg: 0.5,
            num_deltas: 4,
            quadratic_binning: true,
            smooth: false,
        }
    }

    fn observation(roi_radius: f64, livetime: f64, pointing: SkyDir) -> PointingObservation {
        let roi = RegionOfInterest::new(crab(), roi_radius).unwrap();
        PointingObservation::new("obs", pointing, livetime, Arc::new(GaussianIrf::default()))
            .unwrap()
            .with_loaded_events(Events::List(EventList::new(
                vec![EventAtom {
                    dir: crab(),
                    energy: Energy::from_tev(1.0),
                }],
                Some(roi),
            )))
    }

    #[test]
    fn test_delta_nodes() {
        let quadratic = delta_nodes(1.0, 4, true);
        assert_relative_eq!(quadratic[0], 0.015625);
        assert_relative_eq!(quadratic[3], 0.765625);
        let linear = delta_nodes(1.0, 4, false);
        assert_eq!(linear, vec![0.125, 0.375, 0.625, 0.875]);
    }

    #[test]
    fn test_quadratic_binning_detection() {
        let cube = PsfCube::from_definition(&definition()).unwrap();
        assert!(cube.quadratic_binning());

        let mut container = FitsContainer::new();
        cube.write(&mut container).unwrap();
        let back = PsfCube::read(&container).unwrap();
        assert!(back.quadratic_binning());
        assert_eq!(back.deltas(), cube.deltas());

        let mut linear = definition();
        linear.quadratic_binning = false;
        let cube = PsfCube::from_definition(&linear).unwrap();
        assert!(!cube.quadratic_binning());
        let mut container = FitsContainer::new();
        cube.write(&mut container).unwrap();
        assert!(!PsfCube::read(&container).unwrap().quadratic_binning());
    }

    #[test]
    fn test_layer_layout() {
        let cube = PsfCube::from_definition(&definition()).unwrap();
        assert_eq!(cube.map().nlayers(), 12);
        assert_eq!(cube.offset(0, 0), 0);
        assert_eq!(cube.offset(3, 0), 3);
        assert_eq!(cube.offset(1, 2), 9);
    }

    #[test]
    fn test_set_from_single_observation() {
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        let obs = observation(10.0, 1800.0, crab());
        cube.set(&obs).unwrap();

        let npix = cube.map().npix();
        for layer in 0..12 {
            let values = cube.map().layer(layer).unwrap();
            assert!(values.iter().all(|&v| v >= 0.0));
            assert!(values.iter().all(|&v| v > 0.0), "layer {layer} not populated");
        }
        assert_eq!(npix, 25);

        // Node values come back unchanged at node positions
        let irf = GaussianIrf::default();
        let delta = cube.deltas()[1].to_radians();
        let energy = cube.ebounds().elogmean(1).unwrap();
        let expected = irf.psf(delta, 0.0, energy.log10_tev());
        assert_relative_eq!(
            cube.evaluate(&crab(), delta, energy).unwrap(),
            expected,
            max_relative = 1e-6
        );
    }

    #[test]
    fn test_roi_excludes_pixels() {
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        let obs = observation(0.8, 1800.0, crab());
        cube.set(&obs).unwrap();

        // Corner pixel (0, 0) lies about 1.4 deg from the centre
        for layer in 0..12 {
            assert_eq!(cube.map()[(0, layer)], 0.0);
            assert!(cube.map()[(12, layer)] > 0.0);
        }
    }

    #[test]
    fn test_fill_is_exposure_weighted_mean() {
        let mut single = PsfCube::from_definition(&definition()).unwrap();
        let obs = observation(10.0, 1800.0, crab());
        single.set(&obs).unwrap();

        // Same observation twice with different livetimes gives the same mean
        let mut mean = PsfCube::from_definition(&definition()).unwrap();
        let a = observation(10.0, 1000.0, crab());
        let b = observation(10.0, 3000.0, crab());
        mean.fill(&[&a, &b]).unwrap();

        for (x, y) in mean.map().pixels().iter().zip(single.map().pixels()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_fill_without_exposure_is_zero() {
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        let idle = observation(10.0, 0.0, crab());
        cube.fill(&[&idle]).unwrap();
        assert!(cube.map().pixels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_observation_without_instrument_response() {
        #[derive(Debug)]
        struct CountsOnly;
        impl Response for CountsOnly {
            fn name(&self) -> &str {
                "counts-only"
            }
        }
        let roi = RegionOfInterest::new(crab(), 5.0).unwrap();
        let obs = PointingObservation::new("obs", crab(), 100.0, Arc::new(CountsOnly))
            .unwrap()
            .with_loaded_events(Events::List(EventList::new(vec![], Some(roi))));
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        assert!(matches!(cube.set(&obs), Err(ResponseError::InvalidValue(_))));
        assert!(matches!(cube.fill(&[&obs]), Err(ResponseError::InvalidValue(_))));
    }

    #[test]
    fn test_observation_without_events() {
        let obs =
            PointingObservation::new("obs", crab(), 100.0, Arc::new(GaussianIrf::default()))
                .unwrap()
                .with_events(EventSource::Container(Arc::new(FitsContainer::new())));
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        assert!(cube.set(&obs).is_err());
    }

    #[test]
    fn test_smoothing() {
        let mut def = definition();
        def.smooth = true;
        let mut cube = PsfCube::from_definition(&def).unwrap();
        cube.set(&observation(10.0, 1800.0, crab())).unwrap();
        for iebin in 0..3 {
            let first = cube.map().layer(cube.offset(0, iebin)).unwrap().to_vec();
            let second = cube.map().layer(cube.offset(1, iebin)).unwrap().to_vec();
            assert_eq!(first, second);
            assert!(cube
                .map()
                .layer(cube.offset(3, iebin))
                .unwrap()
                .iter()
                .all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_evaluate_clamps_negative_extrapolation() {
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        cube.set(&observation(10.0, 1800.0, crab())).unwrap();
        // Far beyond the last separation the linear extrapolation turns negative
        let value = cube
            .evaluate(&crab(), 5.0_f64.to_radians(), Energy::from_tev(1.0))
            .unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_read_rejects_wrong_layer_count() {
        let cube = PsfCube::from_definition(&definition()).unwrap();
        let mut container = FitsContainer::new();
        cube.map().extract(0, 5).unwrap().write(&mut container).unwrap();
        container.push(cube.ebounds().to_hdu().unwrap());
        let table = Table::new(4)
            .with_column(Column::scalar("Value", "deg", cube.deltas().to_vec()))
            .unwrap();
        container.push(Hdu::table(DELTAS_EXTNAME, Header::new(), table));
        assert!(matches!(
            PsfCube::read(&container),
            Err(ResponseError::SizeMismatch(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let mut cube = PsfCube::from_definition(&definition()).unwrap();
        cube.set(&observation(10.0, 1800.0, crab())).unwrap();
        let dir = test_helpers::scratch_dir().unwrap();
        let path = dir.path().join("psf_cube.fits");
        cube.save(&path, false).unwrap();

        let container = read_fits(&path).unwrap();
        assert!(container.contains(EBOUNDS_EXTNAME));
        assert_eq!(container.table(DELTAS_EXTNAME).unwrap().nrows(), 4);

        let back = PsfCube::load(&path).unwrap();
        assert_eq!(back.map().nx(), cube.map().nx());
        assert_eq!(back.map().nlayers(), 12);
        assert_eq!(back.map().pixels(), cube.map().pixels());
        assert_eq!(back.deltas(), cube.deltas());
        assert_eq!(back.ebounds(), cube.ebounds());
        assert!(back.quadratic_binning());

        let delta = cube.deltas()[2].to_radians();
        let energy = Energy::from_tev(2.0);
        assert_relative_eq!(
            back.evaluate(&crab(), delta, energy).unwrap(),
            cube.evaluate(&crab(), delta, energy).unwrap(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_definition_json_defaults() {
        let json = r#"{
            "geometry": {"type": "healpix", "coords": "GAL", "nside": 4, "ordering": "RING"},
            "emin_tev": 0.1, "emax_tev": 10.0, "num_energies": 2,
            "dmax_deg": 1.0, "num_deltas": 8
        }"#;
        let def: PsfCubeDefinition = serde_json::from_str(json).unwrap();
        assert!(def.quadratic_binning);
        assert!(!def.smooth);
        let cube = PsfCube::from_definition(&def).unwrap();
        assert_eq!(cube.map().nlayers(), 16);
        assert_eq!(cube.map().npix(), 192);
    }
}
