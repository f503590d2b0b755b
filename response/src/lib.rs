//! Response cubes sampled from sky maps
//!
//! Energies and energy binning, interpolation axes, regions of interest,
//! instrument response traits, observations with lazily loaded events, and
//! the precomputed PSF and background cubes built from them.

pub mod background_cube;
pub mod energy;
pub mod error;
pub mod irf;
pub mod node_array;
pub mod observation;
pub mod psf_cube;
pub mod roi;

pub use background_cube::BackgroundCube;
pub use energy::{Energy, EnergyBounds, EnergyExt};
pub use error::ResponseError;
pub use irf::{GaussianIrf, InstrumentResponse, Response};
pub use node_array::{NodeArray, NodeWeights};
pub use observation::{
    EventAtom, EventBin, EventCube, EventList, EventSource, Events, Observation,
    PointingObservation,
};
pub use psf_cube::{PsfCube, PsfCubeDefinition};
pub use roi::RegionOfInterest;
