//! Observations and their event data.
//!
//! A [`PointingObservation`] knows where the telescope pointed, how long it
//! was live and which response applies. Its events stay in their source
//! container or file until first asked for; the first caller decodes them and
//! concurrent callers wait for that single load.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;
use skymap::io::{read_fits, Column, FitsContainer, Hdu, Header, Table};
use skymap::{SkyDir, SkyMap};

use crate::energy::{Energy, EnergyBounds, EnergyExt, EBOUNDS_EXTNAME};
use crate::error::ResponseError;
use crate::irf::Response;
use crate::roi::RegionOfInterest;

/// Extension name of event list tables.
pub const EVENTS_EXTNAME: &str = "EVENTS";

/// One detected photon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventAtom {
    pub dir: SkyDir,
    pub energy: Energy,
}

/// Unbinned events with the region they were selected from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventList {
    events: Vec<EventAtom>,
    roi: Option<RegionOfInterest>,
}

impl EventList {
    pub fn new(events: Vec<EventAtom>, roi: Option<RegionOfInterest>) -> Self {
        Self { events, roi }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventAtom> {
        self.events.iter()
    }

    pub fn roi(&self) -> Option<&RegionOfInterest> {
        self.roi.as_ref()
    }

    /// Serialise as an `EVENTS` table (`RA`, `DEC` in deg, `ENERGY` in TeV).
    pub fn to_hdu(&self) -> Result<Hdu, ResponseError> {
        let ra = self.events.iter().map(|e| e.dir.ra_deg()).collect();
        let dec = self.events.iter().map(|e| e.dir.dec_deg()).collect();
        let energy = self.events.iter().map(|e| e.energy.as_tev()).collect();
        let table = Table::new(self.len())
            .with_column(Column::scalar("RA", "deg", ra))?
            .with_column(Column::scalar("DEC", "deg", dec))?
            .with_column(Column::scalar("ENERGY", "TeV", energy))?;
        let mut header = Header::new();
        if let Some(roi) = &self.roi {
            roi.write_header(&mut header);
        }
        Ok(Hdu::table(EVENTS_EXTNAME, header, table))
    }

    pub fn from_hdu(hdu: &Hdu) -> Result<Self, ResponseError> {
        let table = hdu.as_table().ok_or_else(|| {
            ResponseError::InvalidValue(format!("HDU {} is not an event table", hdu.name()))
        })?;
        let ra = table.column("RA")?.data();
        let dec = table.column("DEC")?.data();
        let energy = table.column("ENERGY")?.data();
        let events = ra
            .iter()
            .zip(dec)
            .zip(energy)
            .map(|((&ra, &dec), &e)| EventAtom {
                dir: SkyDir::from_radec_deg(ra, dec),
                energy: Energy::from_tev(e),
            })
            .collect();
        let roi = RegionOfInterest::from_header(hdu.header())?;
        Ok(Self { events, roi })
    }
}

/// Counts binned on a sky map, one layer per energy bin.
#[derive(Debug, Clone)]
pub struct EventCube {
    counts: SkyMap,
    ebounds: EnergyBounds,
}

/// One bin of an [`EventCube`], addressed by its position in the cube.
#[derive(Debug, Clone, Copy)]
pub struct EventBin<'a> {
    cube: &'a EventCube,
    index: usize,
}

impl EventCube {
    pub fn new(counts: SkyMap, ebounds: EnergyBounds) -> Result<Self, ResponseError> {
        if counts.nlayers() != ebounds.len() {
            return Err(ResponseError::SizeMismatch(format!(
                "Counts map has {} layers but there are {} energy bins",
                counts.nlayers(),
                ebounds.len()
            )));
        }
        Ok(Self { counts, ebounds })
    }

    pub fn counts(&self) -> &SkyMap {
        &self.counts
    }

    pub fn ebounds(&self) -> &EnergyBounds {
        &self.ebounds
    }

    /// Number of bins: pixels times energy bins.
    pub fn size(&self) -> usize {
        self.counts.npix() * self.counts.nlayers()
    }

    pub fn bin(&self, index: usize) -> Result<EventBin<'_>, ResponseError> {
        if index >= self.size() {
            return Err(ResponseError::OutOfRange {
                what: "Event bin",
                index,
                size: self.size(),
            });
        }
        Ok(EventBin { cube: self, index })
    }

    pub fn bins(&self) -> impl Iterator<Item = EventBin<'_>> {
        (0..self.size()).map(move |index| EventBin { cube: self, index })
    }

    /// Total number of counts.
    pub fn total_counts(&self) -> f64 {
        self.counts.pixels().iter().sum()
    }

    /// Append the counts map and its `EBOUNDS` table.
    pub fn write(&self, container: &mut FitsContainer) -> Result<(), ResponseError> {
        self.counts.write(container)?;
        container.push(self.ebounds.to_hdu()?);
        Ok(())
    }

    pub fn read(container: &FitsContainer) -> Result<Self, ResponseError> {
        let counts = SkyMap::read(container)?;
        let ebounds = EnergyBounds::from_table(container.table(EBOUNDS_EXTNAME)?)?;
        Self::new(counts, ebounds)
    }
}

impl EventBin<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pixel index within a layer.
    pub fn ipix(&self) -> usize {
        self.index % self.cube.counts.npix()
    }

    /// Energy bin index.
    pub fn iebin(&self) -> usize {
        self.index / self.cube.counts.npix()
    }

    pub fn counts(&self) -> f64 {
        self.cube.counts[(self.ipix(), self.iebin())]
    }

    pub fn dir(&self) -> Result<SkyDir, ResponseError> {
        Ok(self.cube.counts.index_to_dir(self.ipix())?)
    }

    /// Geometric centre of the bin's energy range.
    pub fn energy(&self) -> Result<Energy, ResponseError> {
        self.cube.ebounds.elogmean(self.iebin())
    }

    pub fn solid_angle(&self) -> Result<f64, ResponseError> {
        Ok(self.cube.counts.solid_angle(self.ipix())?)
    }
}

/// Decoded event data of an observation.
#[derive(Debug, Clone)]
pub enum Events {
    List(EventList),
    Cube(EventCube),
}

impl Events {
    /// Decode an `EVENTS` table if present, otherwise a counts cube.
    pub fn read(container: &FitsContainer) -> Result<Self, ResponseError> {
        if container.contains(EVENTS_EXTNAME) {
            let hdu = container.hdu_by_name(EVENTS_EXTNAME)?;
            return Ok(Events::List(EventList::from_hdu(hdu)?));
        }
        Ok(Events::Cube(EventCube::read(container)?))
    }

    pub fn len(&self) -> usize {
        match self {
            Events::List(list) => list.len(),
            Events::Cube(cube) => cube.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where an observation's events come from.
#[derive(Debug, Clone)]
pub enum EventSource {
    Container(Arc<FitsContainer>),
    /// FITS file holding an `EVENTS` table or a counts cube with `EBOUNDS`.
    File(PathBuf),
}

/// What every observation offers to response cube builders.
pub trait Observation: Send + Sync {
    fn name(&self) -> &str;

    fn pointing(&self) -> SkyDir;

    /// Livetime in seconds.
    fn livetime(&self) -> f64;

    /// Region of interest of the event selection.
    fn roi(&self) -> Result<RegionOfInterest, ResponseError>;

    fn response(&self) -> &dyn Response;
}

/// Observation with a fixed pointing and lazily loaded events.
pub struct PointingObservation {
    name: String,
    pointing: SkyDir,
    livetime: f64,
    response: Arc<dyn Response>,
    source: Option<EventSource>,
    events: OnceCell<Events>,
}

impl PointingObservation {
    pub fn new(
        name: &str,
        pointing: SkyDir,
        livetime: f64,
        response: Arc<dyn Response>,
    ) -> Result<Self, ResponseError> {
        if !(livetime >= 0.0 && livetime.is_finite()) {
            return Err(ResponseError::InvalidArgument(format!(
                "Livetime must be a non-negative number of seconds, got {livetime}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            pointing,
            livetime,
            response,
            source: None,
            events: OnceCell::new(),
        })
    }

    /// Attach an event source; events already decoded are discarded.
    pub fn with_events(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self.events = OnceCell::new();
        self
    }

    /// Attach already decoded events.
    pub fn with_loaded_events(self, events: Events) -> Self {
        let cell = OnceCell::new();
        // A fresh cell cannot already be set
        let _ = cell.set(events);
        Self {
            events: cell,
            ..self
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.events.get().is_some()
    }

    /// Events of this observation, decoded on first access.
    pub fn events(&self) -> Result<&Events, ResponseError> {
        self.events.get_or_try_init(|| match &self.source {
            Some(EventSource::Container(container)) => {
                let events = Events::read(container)?;
                debug!("Loaded {} events for observation {}", events.len(), self.name);
                Ok(events)
            }
            Some(EventSource::File(path)) => {
                let events = Events::read(&read_fits(path)?)?;
                debug!(
                    "Loaded {} events for observation {} from {}",
                    events.len(),
                    self.name,
                    path.display()
                );
                Ok(events)
            }
            None => Err(ResponseError::InvalidValue(format!(
                "Observation \"{}\" has no event source",
                self.name
            ))),
        })
    }
}

impl Observation for PointingObservation {
    fn name(&self) -> &str {
        &self.name
    }

    fn pointing(&self) -> SkyDir {
        self.pointing
    }

    fn livetime(&self) -> f64 {
        self.livetime
    }

    fn roi(&self) -> Result<RegionOfInterest, ResponseError> {
        match self.events()? {
            Events::List(list) => list.roi().copied().ok_or_else(|| {
                ResponseError::InvalidValue(format!(
                    "Event list of observation \"{}\" carries no region of interest",
                    self.name
                ))
            }),
            Events::Cube(_) => Err(ResponseError::InvalidValue(format!(
                "Observation \"{}\" does not contain an event list. Event list \
                 information is needed to retrieve the region of interest",
                self.name
            ))),
        }
    }

    fn response(&self) -> &dyn Response {
        self.response.as_ref()
    }
}

impl fmt::Debug for PointingObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointingObservation")
            .field("name", &self.name)
            .field("pointing", &self.pointing)
            .field("livetime", &self.livetime)
            .field("response", &self.response.name())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
