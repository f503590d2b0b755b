//! End-to-end cube builds from observations backed by event containers and files.

use std::sync::Arc;

use approx::assert_relative_eq;
use response::{
    BackgroundCube, Energy, EnergyExt, EventAtom, EventList, EventSource, GaussianIrf,
    Observation, PointingObservation, PsfCube, PsfCubeDefinition, RegionOfInterest,
    ResponseError,
};
use skymap::io::{write_fits, FitsContainer};
use skymap::{CoordSystem, MapDefinition, SkyDir, WcsGeometry};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pointing() -> SkyDir {
    SkyDir::from_radec_deg(83.63, 22.01)
}

fn event_container(centre: SkyDir, roi_radius: f64) -> FitsContainer {
    let roi = RegionOfInterest::new(centre, roi_radius).unwrap();
    let list = EventList::new(
        vec![EventAtom {
            dir: centre,
            energy: Energy::from_tev(2.0),
        }],
        Some(roi),
    );
    let mut container = FitsContainer::new();
    container.push(list.to_hdu().unwrap());
    container
}

fn run(name: &str, offset_deg: f64, livetime: f64, roi_radius: f64) -> PointingObservation {
    let mut centre = pointing();
    centre.rotate_deg(90.0, offset_deg);
    let container = event_container(centre, roi_radius);
    PointingObservation::new(name, centre, livetime, Arc::new(GaussianIrf::default()))
        .unwrap()
        .with_events(EventSource::Container(Arc::new(container)))
}

fn definition() -> PsfCubeDefinition {
    PsfCubeDefinition {
        geometry: MapDefinition::Wcs(WcsGeometry::new(
            "TAN",
            CoordSystem::Celestial,
            [83.63, 22.01],
            [-0.25, 0.25],
            9,
            9,
        )),
        emin_tev: 0.1,
        emax_tev: 100.0,
        num_energies: 3,
        dmax_deg: 1.0,
        num_deltas: 4,
        quadratic_binning: true,
        smooth: false,
    }
}

#[test]
fn test_psf_cube_populates_every_layer() {
    init_logging();
    let mut cube = PsfCube::from_definition(&definition()).unwrap();
    let obs = run("single", 0.0, 1800.0, 5.0);
    cube.set(&obs).unwrap();

    assert_eq!(cube.map().nlayers(), 12);
    for layer in 0..12 {
        let values = cube.map().layer(layer).unwrap();
        assert!(values.iter().all(|&v| v >= 0.0));
        assert!(values.iter().any(|&v| v > 0.0));
    }
}

#[test]
fn test_multi_observation_fill_is_deterministic() {
    init_logging();
    let runs: Vec<PointingObservation> = (0..4)
        .map(|i| run(&format!("run{i}"), 0.5 * i as f64, 600.0 * (i + 1) as f64, 3.0))
        .collect();
    let observations: Vec<&dyn Observation> = runs.iter().map(|r| r as &dyn Observation).collect();

    let mut first = PsfCube::from_definition(&definition()).unwrap();
    first.fill(&observations).unwrap();
    let mut second = PsfCube::from_definition(&definition()).unwrap();
    second.fill(&observations).unwrap();
    assert_eq!(first.map().pixels(), second.map().pixels());

    // The analytic PSF does not depend on the off-axis angle, so the
    // exposure weighted mean equals the single-run PSF wherever any run sees the pixel
    let energy = first.ebounds().elogmean(0).unwrap();
    let delta = first.deltas()[2].to_radians();
    let irf = GaussianIrf::default();
    let expected = response::InstrumentResponse::psf(&irf, delta, 0.0, energy.log10_tev());
    assert_relative_eq!(
        first.evaluate(&pointing(), delta, energy).unwrap(),
        expected,
        max_relative = 1e-6
    );
}

#[test]
fn test_background_cube_from_runs() {
    init_logging();
    let geometry = MapDefinition::Wcs(WcsGeometry::new(
        "CAR",
        CoordSystem::Celestial,
        [83.63, 22.01],
        [-0.5, 0.5],
        7,
        7,
    ))
    .build(1)
    .unwrap();
    let ebounds = response::EnergyBounds::log_spaced(
        Energy::from_tev(0.5),
        Energy::from_tev(50.0),
        2,
    )
    .unwrap();
    let mut cube = BackgroundCube::new(&geometry, ebounds).unwrap();
    let runs = [run("a", 0.0, 1000.0, 2.0), run("b", 1.0, 1000.0, 2.0)];
    cube.fill(&[&runs[0], &runs[1]]).unwrap();

    let rate = cube.evaluate(&pointing(), Energy::from_tev(3.0)).unwrap();
    assert!(rate > 0.0);
    assert!(cube.integral(0.5).unwrap() > 0.0);
}

#[test]
fn test_binned_observation_cannot_build_cube() {
    let counts = MapDefinition::Wcs(WcsGeometry::new(
        "CAR",
        CoordSystem::Celestial,
        [83.63, 22.01],
        [-0.5, 0.5],
        3,
        3,
    ))
    .build(2)
    .unwrap();
    let ebounds =
        response::EnergyBounds::log_spaced(Energy::from_tev(1.0), Energy::from_tev(10.0), 2)
            .unwrap();
    let cube = response::EventCube::new(counts, ebounds).unwrap();
    let mut container = FitsContainer::new();
    cube.write(&mut container).unwrap();

    let obs = PointingObservation::new("binned", pointing(), 100.0, Arc::new(GaussianIrf::default()))
        .unwrap()
        .with_events(EventSource::Container(Arc::new(container)));
    let mut psf = PsfCube::from_event_cube(&cube, 1.0, 5).unwrap();
    assert_eq!(psf.map().nlayers(), 10);
    assert!(matches!(psf.set(&obs), Err(ResponseError::InvalidValue(_))));
}

#[test]
fn test_definition_file_round_trip() {
    let dir = test_helpers::scratch_dir().unwrap();
    let path = dir.path().join("psf_cube.json");
    definition().save_to_file(&path).unwrap();
    let back = PsfCubeDefinition::load_from_file(&path).unwrap();
    assert_eq!(back.num_deltas, 4);
    assert!(back.quadratic_binning);

    let cube = PsfCube::from_definition(&back).unwrap();
    assert!(cube.quadratic_binning());
    assert_eq!(cube.map().nlayers(), 12);
}

#[test]
fn test_file_backed_runs_to_saved_cube() {
    init_logging();
    let dir = test_helpers::scratch_dir().unwrap();
    let runs: Vec<PointingObservation> = (0..2)
        .map(|i| {
            let path = dir.path().join(format!("events_{i}.fits"));
            write_fits(&event_container(pointing(), 4.0), &path, false).unwrap();
            PointingObservation::new(
                &format!("run{i}"),
                pointing(),
                900.0 * (i + 1) as f64,
                Arc::new(GaussianIrf::default()),
            )
            .unwrap()
            .with_events(EventSource::File(path))
        })
        .collect();
    let observations: Vec<&dyn Observation> = runs.iter().map(|r| r as &dyn Observation).collect();

    let mut cube = PsfCube::from_definition(&definition()).unwrap();
    cube.fill(&observations).unwrap();
    assert!(runs.iter().all(|r| r.is_loaded()));

    let in_memory = run("memory", 0.0, 900.0, 4.0);
    let mut reference = PsfCube::from_definition(&definition()).unwrap();
    reference.set(&in_memory).unwrap();
    for (a, b) in cube.map().pixels().iter().zip(reference.map().pixels()) {
        assert_relative_eq!(*a, *b, max_relative = 1e-10);
    }

    let path = dir.path().join("psf_cube.fits");
    cube.save(&path, false).unwrap();
    let back = PsfCube::load(&path).unwrap();
    assert_eq!(back.map().pixels(), cube.map().pixels());
    assert_eq!(back.deltas(), cube.deltas());
}
