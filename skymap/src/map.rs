//! Multi-layer sky maps.
//!
//! A [`SkyMap`] stores `npix * nlayers` values over a [`Projection`]. Value
//! `index` of layer `layer` lives at `index + npix * layer`, so each layer is
//! a contiguous slice. Planar maps number their pixels row by row:
//! `index = x + nx * y`.
//!
//! Maps can be combined with maps of a different projection: arithmetic
//! resamples the operand at the direction of every pixel of the target map
//! through bilinear interpolation.

use std::fmt;
use std::ops::{AddAssign, Index, IndexMut, MulAssign, SubAssign};
use std::path::Path;

use log::{debug, info};
use ndarray::Array2;

use crate::config::WcsGeometry;
use crate::error::SkyMapError;
use crate::interpolation::{InterpolationCache, Interpolator};
use crate::io::{read_fits, write_fits, Column, FitsContainer, Hdu, Header, Image, Table};
use crate::pixel::SkyPixel;
use crate::projection::{Healpix, HealpixOrdering, Projection, ProjectionRegistry, Wcs};
use crate::sky_dir::{CoordSystem, SkyDir};

/// Extension name of HEALPix maps.
pub const HEALPIX_EXTNAME: &str = "HEALPIX";
/// Extension name of planar maps.
pub const IMAGE_EXTNAME: &str = "IMAGE";

/// Sky map with one or more layers of pixel values.
#[derive(Debug, Clone, Default)]
pub struct SkyMap {
    projection: Option<Projection>,
    num_pixels: usize,
    num_layers: usize,
    /// Planar grid size; zero for HEALPix and empty maps
    num_x: usize,
    num_y: usize,
    pixels: Vec<f64>,
    cache: InterpolationCache,
}

fn check_layers(num_layers: usize) -> Result<(), SkyMapError> {
    if num_layers < 1 {
        return Err(SkyMapError::InvalidArgument(format!(
            "Number of layers must be at least 1, got {num_layers}"
        )));
    }
    Ok(())
}

impl SkyMap {
    /// Map without projection or pixels.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Zero-filled HEALPix map.
    ///
    /// # Arguments
    /// * `coords` - Coordinate system of the pixelisation
    /// * `nside` - HEALPix resolution parameter (power of two)
    /// * `ordering` - Pixel ordering
    /// * `num_layers` - Number of layers (at least 1)
    pub fn new_healpix(
        coords: CoordSystem,
        nside: usize,
        ordering: HealpixOrdering,
        num_layers: usize,
    ) -> Result<Self, SkyMapError> {
        check_layers(num_layers)?;
        let hpx = Healpix::new(nside, ordering, coords)?;
        Ok(Self::from_healpix(hpx, num_layers))
    }

    /// Zero-filled planar map centred on `geometry.center`.
    ///
    /// # Arguments
    /// * `geometry` - Projection code, coordinate system, centre, pixel scale and size
    /// * `num_layers` - Number of layers (at least 1)
    pub fn new_wcs(geometry: &WcsGeometry, num_layers: usize) -> Result<Self, SkyMapError> {
        Self::new_wcs_with(ProjectionRegistry::global(), geometry, num_layers)
    }

    /// Zero-filled planar map whose projection code is looked up in `registry`.
    pub fn new_wcs_with(
        registry: &ProjectionRegistry,
        geometry: &WcsGeometry,
        num_layers: usize,
    ) -> Result<Self, SkyMapError> {
        check_layers(num_layers)?;
        if geometry.nx < 1 || geometry.ny < 1 {
            return Err(SkyMapError::InvalidArgument(format!(
                "Map size must be at least 1x1, got {}x{}",
                geometry.nx, geometry.ny
            )));
        }
        let kind = registry.create(&geometry.projection)?;
        let wcs = Wcs::centred(
            kind,
            geometry.coords,
            geometry.center,
            geometry.binsize,
            geometry.nx,
            geometry.ny,
        )?;
        Ok(Self::from_wcs(wcs, geometry.nx, geometry.ny, num_layers))
    }

    fn from_healpix(hpx: Healpix, num_layers: usize) -> Self {
        let num_pixels = hpx.npix();
        Self {
            projection: Some(Projection::Healpix(hpx)),
            num_pixels,
            num_layers,
            num_x: 0,
            num_y: 0,
            pixels: vec![0.0; num_pixels * num_layers],
            cache: InterpolationCache::new(),
        }
    }

    fn from_wcs(wcs: Wcs, nx: usize, ny: usize, num_layers: usize) -> Self {
        Self {
            projection: Some(Projection::Wcs(wcs)),
            num_pixels: nx * ny,
            num_layers,
            num_x: nx,
            num_y: ny,
            pixels: vec![0.0; nx * ny * num_layers],
            cache: InterpolationCache::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn npix(&self) -> usize {
        self.num_pixels
    }

    pub fn nlayers(&self) -> usize {
        self.num_layers
    }

    pub fn nx(&self) -> usize {
        self.num_x
    }

    pub fn ny(&self) -> usize {
        self.num_y
    }

    /// Axis lengths: `[npix, nlayers]` for HEALPix, `[nx, ny, nlayers]` for planar maps.
    pub fn shape(&self) -> Vec<usize> {
        match self.projection {
            Some(Projection::Wcs(_)) => vec![self.num_x, self.num_y, self.num_layers],
            _ => vec![self.num_pixels, self.num_layers],
        }
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    fn require_projection(&self) -> Result<&Projection, SkyMapError> {
        self.projection
            .as_ref()
            .ok_or_else(|| SkyMapError::InvalidValue("Sky map has no projection".to_string()))
    }

    fn is_planar(&self) -> bool {
        matches!(self.projection, Some(Projection::Wcs(_)))
    }

    /// Replace the projection of the map, keeping its pixel values.
    ///
    /// The new projection must address the same pixels: a HEALPix projection
    /// with the same number of pixels, or any planar projection for a planar map.
    pub fn set_projection(&mut self, projection: Projection) -> Result<(), SkyMapError> {
        let compatible = match (&projection, &self.projection) {
            (Projection::Healpix(hpx), Some(Projection::Healpix(_))) => {
                hpx.npix() == self.num_pixels
            }
            (Projection::Wcs(_), Some(Projection::Wcs(_))) => true,
            _ => false,
        };
        if !compatible {
            return Err(SkyMapError::InvalidArgument(format!(
                "Projection {projection} does not match the pixel layout of this map"
            )));
        }
        self.projection = Some(projection);
        self.cache.invalidate();
        Ok(())
    }

    /// All values, layer by layer.
    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [f64] {
        &mut self.pixels
    }

    fn check_layer(&self, layer: usize) -> Result<(), SkyMapError> {
        if layer >= self.num_layers {
            return Err(SkyMapError::out_of_range("Layer", layer, self.num_layers));
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), SkyMapError> {
        if index >= self.num_pixels {
            return Err(SkyMapError::out_of_range("Pixel index", index, self.num_pixels));
        }
        Ok(())
    }

    /// Values of one layer.
    pub fn layer(&self, layer: usize) -> Result<&[f64], SkyMapError> {
        self.check_layer(layer)?;
        let start = layer * self.num_pixels;
        Ok(&self.pixels[start..start + self.num_pixels])
    }

    pub fn layer_mut(&mut self, layer: usize) -> Result<&mut [f64], SkyMapError> {
        self.check_layer(layer)?;
        let start = layer * self.num_pixels;
        Ok(&mut self.pixels[start..start + self.num_pixels])
    }

    /// One layer of a planar map as an `(ny, nx)` array.
    pub fn layer_array(&self, layer: usize) -> Result<Array2<f64>, SkyMapError> {
        if !self.is_planar() {
            return Err(SkyMapError::InvalidValue(
                "Only planar maps have a two dimensional layer layout".to_string(),
            ));
        }
        let values = self.layer(layer)?.to_vec();
        Array2::from_shape_vec((self.num_y, self.num_x), values)
            .map_err(|e| SkyMapError::SizeMismatch(e.to_string()))
    }

    /// Bounds-checked value of pixel `index` in `layer`.
    pub fn value(&self, index: usize, layer: usize) -> Result<f64, SkyMapError> {
        self.check_index(index)?;
        self.check_layer(layer)?;
        Ok(self.pixels[index + self.num_pixels * layer])
    }

    /// Bounds-checked mutable value of pixel `index` in `layer`.
    pub fn value_mut(&mut self, index: usize, layer: usize) -> Result<&mut f64, SkyMapError> {
        self.check_index(index)?;
        self.check_layer(layer)?;
        Ok(&mut self.pixels[index + self.num_pixels * layer])
    }

    /// Value of the pixel containing `pixel` in `layer`.
    pub fn pixel_value(&self, pixel: &SkyPixel, layer: usize) -> Result<f64, SkyMapError> {
        let index = self.pixel_to_index(pixel)?;
        self.value(index, layer)
    }

    /// Set the value of the pixel containing `pixel` in `layer`.
    pub fn set_pixel_value(
        &mut self,
        pixel: &SkyPixel,
        layer: usize,
        value: f64,
    ) -> Result<(), SkyMapError> {
        let index = self.pixel_to_index(pixel)?;
        *self.value_mut(index, layer)? = value;
        Ok(())
    }

    /// Pixel address of a linear index.
    pub fn index_to_pixel(&self, index: usize) -> SkyPixel {
        if self.is_planar() {
            SkyPixel::xy((index % self.num_x) as f64, (index / self.num_x) as f64)
        } else {
            SkyPixel::index(index)
        }
    }

    /// Linear index of the pixel containing `pixel`.
    ///
    /// Continuous coordinates round to the nearest pixel centre.
    pub fn pixel_to_index(&self, pixel: &SkyPixel) -> Result<usize, SkyMapError> {
        if !self.contains_pixel(pixel) {
            return Err(SkyMapError::OutOfRange {
                what: "Pixel",
                index: match pixel {
                    SkyPixel::Index(i) => i.max(0.0) as usize,
                    SkyPixel::Xy { x, y } => {
                        (x + 0.5).max(0.0) as usize + self.num_x * (y + 0.5).max(0.0) as usize
                    }
                },
                size: self.num_pixels,
            });
        }
        Ok(match pixel {
            SkyPixel::Index(i) => (i + 0.5) as usize,
            SkyPixel::Xy { x, y } => {
                let ix = ((x + 0.5) as usize).min(self.num_x - 1);
                let iy = ((y + 0.5) as usize).min(self.num_y - 1);
                ix + self.num_x * iy
            }
        })
    }

    /// Whether `pixel` lies on the map (within half a pixel of a pixel centre).
    ///
    /// A 2D pixel never lies on a HEALPix map; a 1D pixel on a planar map is
    /// tested against the linear index range.
    pub fn contains_pixel(&self, pixel: &SkyPixel) -> bool {
        match pixel {
            SkyPixel::Index(i) => *i + 0.5 >= 0.0 && *i + 0.5 < self.num_pixels as f64,
            SkyPixel::Xy { x, y } => {
                self.is_planar()
                    && *x + 0.5 >= 0.0
                    && *x + 0.5 < self.num_x as f64
                    && *y + 0.5 >= 0.0
                    && *y + 0.5 < self.num_y as f64
            }
        }
    }

    /// Whether `dir` falls inside the map footprint.
    pub fn contains_dir(&self, dir: &SkyDir) -> bool {
        match self.dir_to_pixel(dir) {
            Ok(pixel) => self.contains_pixel(&pixel),
            Err(_) => false,
        }
    }

    /// Sky direction of a pixel.
    ///
    /// A 1D pixel on a planar map is decomposed row by row into (x, y); a
    /// 2D pixel on a HEALPix map is an error.
    pub fn pixel_to_dir(&self, pixel: &SkyPixel) -> Result<SkyDir, SkyMapError> {
        let projection = self.require_projection()?;
        match (pixel, projection) {
            (SkyPixel::Index(_), Projection::Wcs(_)) => {
                let index = self.pixel_to_index(pixel)?;
                projection.pix2dir(&self.index_to_pixel(index))
            }
            _ => projection.pix2dir(pixel),
        }
    }

    /// Sky direction of the centre of pixel `index`.
    pub fn index_to_dir(&self, index: usize) -> Result<SkyDir, SkyMapError> {
        self.check_index(index)?;
        self.require_projection()?
            .pix2dir(&self.index_to_pixel(index))
    }

    /// Pixel position of a sky direction.
    pub fn dir_to_pixel(&self, dir: &SkyDir) -> Result<SkyPixel, SkyMapError> {
        self.require_projection()?.dir2pix(dir)
    }

    /// Linear index of the pixel containing `dir`.
    pub fn dir_to_index(&self, dir: &SkyDir) -> Result<usize, SkyMapError> {
        let pixel = self.dir_to_pixel(dir)?;
        self.pixel_to_index(&pixel)
    }

    /// Solid angle of pixel `index` in steradians.
    pub fn solid_angle(&self, index: usize) -> Result<f64, SkyMapError> {
        self.check_index(index)?;
        self.require_projection()?
            .solid_angle(&self.index_to_pixel(index))
    }

    /// Solid angle of the pixel at `pixel` in steradians.
    pub fn pixel_solid_angle(&self, pixel: &SkyPixel) -> Result<f64, SkyMapError> {
        let projection = self.require_projection()?;
        match (pixel, projection) {
            (SkyPixel::Index(_), Projection::Wcs(_)) => {
                let index = self.pixel_to_index(pixel)?;
                projection.solid_angle(&self.index_to_pixel(index))
            }
            _ => projection.solid_angle(pixel),
        }
    }

    fn compute_interpolator(&self, dir: &SkyDir) -> Option<Interpolator> {
        match self.projection.as_ref()? {
            Projection::Healpix(hpx) => Some(hpx.interpolator(dir)),
            Projection::Wcs(wcs) => {
                let (x, y) = wcs.dir2pix(dir).ok()?;
                if !self.contains_pixel(&SkyPixel::xy(x, y)) {
                    return None;
                }
                Some(Interpolator::planar(x, y, self.num_x, self.num_y))
            }
        }
    }

    /// Interpolation weights for `dir`, or `None` outside the map footprint.
    ///
    /// The result for the most recent direction is cached, so sampling
    /// several layers at one direction costs a single projection lookup.
    pub fn interpolator(&self, dir: &SkyDir) -> Option<Interpolator> {
        self.cache
            .lookup(dir, |dir| self.compute_interpolator(dir))
    }

    /// Interpolation cache statistics.
    pub fn cache_stats(&self) -> crate::interpolation::CacheStats {
        self.cache.stats()
    }

    /// Bilinearly interpolated value of `layer` at `dir`.
    ///
    /// Directions outside the map footprint yield 0.
    pub fn value_at(&self, dir: &SkyDir, layer: usize) -> Result<f64, SkyMapError> {
        let values = self.layer(layer)?;
        Ok(self
            .interpolator(dir)
            .map_or(0.0, |interp| interp.evaluate(values)))
    }

    /// Change the number of layers.
    ///
    /// Existing layers are kept, new layers are zero-filled.
    pub fn set_layer_count(&mut self, num_layers: usize) -> Result<(), SkyMapError> {
        check_layers(num_layers)?;
        if num_layers == self.num_layers {
            return Ok(());
        }
        let keep = self.num_pixels * num_layers.min(self.num_layers);
        let mut pixels = vec![0.0; self.num_pixels * num_layers];
        pixels[..keep].copy_from_slice(&self.pixels[..keep]);
        self.pixels = pixels;
        self.num_layers = num_layers;
        Ok(())
    }

    /// Set every value of every layer.
    pub fn fill(&mut self, value: f64) {
        self.pixels.fill(value);
    }

    /// Copy of `count` consecutive layers starting at `first`.
    pub fn extract(&self, first: usize, count: usize) -> Result<SkyMap, SkyMapError> {
        self.check_layer(first)?;
        if count < 1 || first + count > self.num_layers {
            return Err(SkyMapError::InvalidArgument(format!(
                "Cannot extract {count} layers starting at layer {first} from a map with {} layers",
                self.num_layers
            )));
        }
        let start = first * self.num_pixels;
        let end = start + count * self.num_pixels;
        Ok(SkyMap {
            projection: self.projection.clone(),
            num_pixels: self.num_pixels,
            num_layers: count,
            num_x: self.num_x,
            num_y: self.num_y,
            pixels: self.pixels[start..end].to_vec(),
            cache: InterpolationCache::new(),
        })
    }

    /// Sum all layers into a single layer.
    pub fn stack_layers(&mut self) {
        if self.is_empty() || self.num_layers <= 1 {
            return;
        }
        let mut stacked = vec![0.0; self.num_pixels];
        for layer in self.pixels.chunks_exact(self.num_pixels) {
            for (sum, value) in stacked.iter_mut().zip(layer) {
                *sum += value;
            }
        }
        self.pixels = stacked;
        self.num_layers = 1;
    }

    /// Sum of value times solid angle over the pixels of `layer`.
    ///
    /// Pixels outside the domain of the projection are skipped.
    pub fn flux(&self, layer: usize) -> Result<f64, SkyMapError> {
        let values = self.layer(layer)?;
        let mut total = 0.0;
        for (index, value) in values.iter().enumerate() {
            if let Ok(omega) = self.solid_angle(index) {
                total += value * omega;
            }
        }
        Ok(total)
    }

    /// Map with the square root of every value.
    pub fn sqrt(&self) -> Result<SkyMap, SkyMapError> {
        if let Some(index) = self.pixels.iter().position(|&v| v < 0.0) {
            return Err(SkyMapError::InvalidValue(format!(
                "Cannot take the square root of negative value {} at position {index}",
                self.pixels[index]
            )));
        }
        let mut result = self.clone();
        result.pixels.iter_mut().for_each(|v| *v = v.sqrt());
        Ok(result)
    }

    /// Values of `other` sampled at the centres of this map's pixels.
    ///
    /// Pixels of this map that have no sky direction are reported as `None`;
    /// directions outside `other` sample to zero.
    fn resample(&self, other: &SkyMap) -> Result<Vec<Option<Interpolator>>, SkyMapError> {
        if self.num_layers != other.num_layers {
            return Err(SkyMapError::InvalidValue(format!(
                "Cannot combine a map with {} layers with a map with {} layers",
                self.num_layers, other.num_layers
            )));
        }
        let projection = self.require_projection()?;
        let mut samples = Vec::with_capacity(self.num_pixels);
        for index in 0..self.num_pixels {
            let sample = match projection.pix2dir(&self.index_to_pixel(index)) {
                Ok(dir) => Some(other.interpolator(&dir).unwrap_or_default()),
                Err(SkyMapError::Singularity(_)) => None,
                Err(e) => return Err(e),
            };
            samples.push(sample);
        }
        Ok(samples)
    }

    fn combine<F>(&mut self, other: &SkyMap, check_zero: bool, op: F) -> Result<(), SkyMapError>
    where
        F: Fn(f64, f64) -> f64,
    {
        let samples = self.resample(other)?;
        let npix = self.num_pixels;

        let mut operand = vec![0.0; self.pixels.len()];
        for layer in 0..self.num_layers {
            let values = other.layer(layer)?;
            for (index, sample) in samples.iter().enumerate() {
                let Some(interp) = sample else { continue };
                let value = if interp.weight_sum() == 0.0 {
                    0.0
                } else {
                    interp.evaluate(values)
                };
                if check_zero && value == 0.0 {
                    return Err(SkyMapError::InvalidValue(format!(
                        "Division by zero: operand is zero at pixel {index} of layer {layer}"
                    )));
                }
                operand[index + npix * layer] = value;
            }
        }

        for layer in 0..self.num_layers {
            for (index, sample) in samples.iter().enumerate() {
                if sample.is_some() {
                    let slot = index + npix * layer;
                    self.pixels[slot] = op(self.pixels[slot], operand[slot]);
                }
            }
        }
        debug!("Combined maps with {} layers over {npix} pixels", self.num_layers);
        Ok(())
    }

    /// Add `other`, resampled at this map's pixel directions.
    pub fn add_map(&mut self, other: &SkyMap) -> Result<(), SkyMapError> {
        self.combine(other, false, |a, b| a + b)
    }

    /// Subtract `other`, resampled at this map's pixel directions.
    pub fn sub_map(&mut self, other: &SkyMap) -> Result<(), SkyMapError> {
        self.combine(other, false, |a, b| a - b)
    }

    /// Multiply by `other`, resampled at this map's pixel directions.
    pub fn mul_map(&mut self, other: &SkyMap) -> Result<(), SkyMapError> {
        self.combine(other, false, |a, b| a * b)
    }

    /// Divide by `other`, resampled at this map's pixel directions.
    ///
    /// Fails without modifying the map if any sampled divisor is exactly zero.
    pub fn div_map(&mut self, other: &SkyMap) -> Result<(), SkyMapError> {
        self.combine(other, true, |a, b| a / b)
    }

    /// Divide every value by `value`.
    pub fn div_scalar(&mut self, value: f64) -> Result<(), SkyMapError> {
        if value == 0.0 {
            return Err(SkyMapError::InvalidArgument(
                "Cannot divide a sky map by zero".to_string(),
            ));
        }
        self.pixels.iter_mut().for_each(|v| *v /= value);
        Ok(())
    }

    /// Serialise into an HDU: a `HEALPIX` table or an `IMAGE`.
    pub fn to_hdu(&self) -> Result<Hdu, SkyMapError> {
        let projection = self.require_projection()?;
        let mut header = Header::new();
        projection.write_header(&mut header);

        match projection {
            Projection::Healpix(_) => {
                let mut data = vec![0.0; self.pixels.len()];
                for layer in 0..self.num_layers {
                    for row in 0..self.num_pixels {
                        data[row * self.num_layers + layer] =
                            self.pixels[row + self.num_pixels * layer];
                    }
                }
                let column = Column::new("DATA", "", self.num_layers, data)?;
                let table = Table::new(self.num_pixels).with_column(column)?;
                header.set("NBRBINS", self.num_layers, "Number of maps");
                Ok(Hdu::table(HEALPIX_EXTNAME, header, table))
            }
            Projection::Wcs(_) => {
                let naxes = if self.num_layers > 1 {
                    vec![self.num_x, self.num_y, self.num_layers]
                } else {
                    vec![self.num_x, self.num_y]
                };
                let image = Image::new(naxes, self.pixels.clone())?;
                Ok(Hdu::image(IMAGE_EXTNAME, header, image))
            }
        }
    }

    /// Append this map to a container and return its HDU index.
    pub fn write(&self, container: &mut FitsContainer) -> Result<usize, SkyMapError> {
        Ok(container.push(self.to_hdu()?))
    }

    /// Decode a single HDU holding a HEALPix table or a planar image.
    pub fn from_hdu(hdu: &Hdu) -> Result<SkyMap, SkyMapError> {
        let is_healpix = hdu
            .header()
            .string("PIXTYPE")
            .map(|p| p.eq_ignore_ascii_case("HEALPIX"))
            .unwrap_or(false);

        match (is_healpix, hdu.as_table(), hdu.as_image()) {
            (true, Some(table), _) => Self::read_healpix(hdu.header(), table),
            (_, _, Some(image)) => Self::read_wcs(hdu.header(), image),
            _ => Err(SkyMapError::InvalidValue(format!(
                "HDU {} holds neither a HEALPix table nor an image",
                hdu.name()
            ))),
        }
    }

    /// Decode the sky map of a container.
    ///
    /// A table carrying `PIXTYPE = 'HEALPIX'` takes precedence; otherwise
    /// the first image HDU with at least two axes is read as a planar map.
    pub fn read(container: &FitsContainer) -> Result<SkyMap, SkyMapError> {
        let healpix = container.hdus().iter().find(|hdu| {
            hdu.as_table().is_some()
                && hdu
                    .header()
                    .string("PIXTYPE")
                    .map(|p| p.eq_ignore_ascii_case("HEALPIX"))
                    .unwrap_or(false)
        });
        if let Some(hdu) = healpix {
            return Self::from_hdu(hdu);
        }

        let image = container
            .hdus()
            .iter()
            .find(|hdu| hdu.as_image().map(|i| i.naxis() >= 2).unwrap_or(false));
        match image {
            Some(hdu) => Self::from_hdu(hdu),
            None => Err(SkyMapError::InvalidValue(
                "Container holds neither a HEALPix table nor an image".to_string(),
            )),
        }
    }

    fn read_healpix(header: &Header, table: &Table) -> Result<SkyMap, SkyMapError> {
        let hpx = Healpix::from_header(header)?;
        let npix = hpx.npix();
        let nrows = table.nrows();
        if nrows == 0 || npix % nrows != 0 {
            return Err(SkyMapError::SizeMismatch(format!(
                "{npix} HEALPix pixels cannot be spread evenly over {nrows} table rows"
            )));
        }
        let nentry = npix / nrows;

        let columns: Vec<&Column> = table
            .columns()
            .iter()
            .filter(|c| c.repeat() % nentry == 0)
            .collect();
        let num_layers: usize = columns.iter().map(|c| c.repeat() / nentry).sum();
        if num_layers == 0 {
            return Err(SkyMapError::SizeMismatch(format!(
                "No table column holds a multiple of {nentry} elements per row"
            )));
        }

        let mut map = Self::from_healpix(hpx, num_layers);
        let mut layer = 0;
        for column in columns {
            for block in 0..column.repeat() / nentry {
                let first = block * nentry;
                let target = map.layer_mut(layer)?;
                let mut ip = 0;
                for row in 0..nrows {
                    for inx in first..first + nentry {
                        target[ip] = column.value(row, inx);
                        ip += 1;
                    }
                }
                layer += 1;
            }
        }
        debug!("Read HEALPix map with {npix} pixels and {num_layers} layers");
        Ok(map)
    }

    fn read_wcs(header: &Header, image: &Image) -> Result<SkyMap, SkyMapError> {
        if image.naxis() < 2 {
            return Err(SkyMapError::SizeMismatch(format!(
                "Planar sky maps need at least 2 image axes, found {}",
                image.naxis()
            )));
        }
        let nx = image.naxes(0);
        let ny = image.naxes(1);
        let num_layers: usize = image.shape()[2..].iter().product();
        if nx < 1 || ny < 1 || num_layers < 1 {
            return Err(SkyMapError::SizeMismatch(format!(
                "Image axes {:?} describe an empty map",
                image.shape()
            )));
        }
        let wcs = Wcs::from_header(header, ProjectionRegistry::global())?;
        let mut map = Self::from_wcs(wcs, nx, ny, num_layers);
        map.pixels.copy_from_slice(image.data());
        debug!("Read {nx}x{ny} planar map with {num_layers} layers");
        Ok(map)
    }

    /// Load a sky map from a FITS file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SkyMap, SkyMapError> {
        let container = read_fits(&path)?;
        let map = Self::read(&container)?;
        info!("Loaded sky map from {}", path.as_ref().display());
        Ok(map)
    }

    /// Save the sky map to a FITS file.
    ///
    /// HEALPix maps become a `HEALPIX` binary table, planar maps an `IMAGE` HDU.
    pub fn save<P: AsRef<Path>>(&self, path: P, clobber: bool) -> Result<(), SkyMapError> {
        let mut container = FitsContainer::new();
        self.write(&mut container)?;
        write_fits(&container, &path, clobber)?;
        Ok(())
    }
}

impl Index<(usize, usize)> for SkyMap {
    type Output = f64;

    /// Unchecked access to pixel `index` of `layer`; panics outside the pixel array.
    fn index(&self, (index, layer): (usize, usize)) -> &f64 {
        &self.pixels[index + self.num_pixels * layer]
    }
}

impl IndexMut<(usize, usize)> for SkyMap {
    fn index_mut(&mut self, (index, layer): (usize, usize)) -> &mut f64 {
        &mut self.pixels[index + self.num_pixels * layer]
    }
}

impl AddAssign<f64> for SkyMap {
    fn add_assign(&mut self, value: f64) {
        self.pixels.iter_mut().for_each(|v| *v += value);
    }
}

impl SubAssign<f64> for SkyMap {
    fn sub_assign(&mut self, value: f64) {
        self.pixels.iter_mut().for_each(|v| *v -= value);
    }
}

impl MulAssign<f64> for SkyMap {
    fn mul_assign(&mut self, value: f64) {
        self.pixels.iter_mut().for_each(|v| *v *= value);
    }
}

impl fmt::Display for SkyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SkyMap ===")?;
        writeln!(f, " Number of pixels ..........: {}", self.num_pixels)?;
        writeln!(f, " Number of layers ..........: {}", self.num_layers)?;
        if self.is_planar() {
            writeln!(f, " X axis dimension ..........: {}", self.num_x)?;
            writeln!(f, " Y axis dimension ..........: {}", self.num_y)?;
        }
        match &self.projection {
            Some(projection) => write!(f, " Projection ................: {projection}"),
            None => write!(f, " Projection ................: none"),
        }
    }
}
