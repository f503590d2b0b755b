//! FITS file bridge for image and binary table HDUs.
//!
//! Reads every HDU of a FITS file into a [`FitsContainer`] together with the
//! world coordinate and pixelisation keywords sky maps rely on, and writes a
//! container back to disk. Images are stored as 64-bit floats; tables become
//! binary tables of `D` columns with one vector cell per row.

use fitsio::bintable::{BinaryColumnDescriptor, BinaryColumnType};
use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::{FitsHdu, HduInfo};
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use log::{debug, info};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::container::{Column, FitsContainer, Hdu, HduData, Header, HeaderValue, Image, Table};

/// Errors that can occur during FITS container and file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::compat::errors::Error),
    #[error("HDU not found: {0}")]
    HduNotFound(String),
    #[error("Invalid data type in HDU: {0}")]
    InvalidDataType(String),
    #[error("Keyword {0} not found")]
    MissingKeyword(String),
    #[error("Keyword {keyword} is not of {expected} type")]
    KeywordType {
        keyword: String,
        expected: &'static str,
    },
    #[error("Column {0} not found")]
    ColumnNotFound(String),
    #[error("Invalid data shape: {0}")]
    InvalidShape(String),
    #[error("Column {column} has unsupported format {format}")]
    UnsupportedColumn { column: String, format: String },
    #[error("File {0} already exists")]
    FileExists(PathBuf),
}

#[derive(Clone, Copy)]
enum KeyKind {
    Str,
    Float,
    Int,
}

/// Keywords carried between disk and container, with their value types.
const TRANSFERRED_KEYWORDS: &[(&str, KeyKind)] = &[
    ("CTYPE1", KeyKind::Str),
    ("CTYPE2", KeyKind::Str),
    ("CTYPE3", KeyKind::Str),
    ("CUNIT1", KeyKind::Str),
    ("CUNIT2", KeyKind::Str),
    ("CRVAL1", KeyKind::Float),
    ("CRVAL2", KeyKind::Float),
    ("CRPIX1", KeyKind::Float),
    ("CRPIX2", KeyKind::Float),
    ("CDELT1", KeyKind::Float),
    ("CDELT2", KeyKind::Float),
    ("LONPOLE", KeyKind::Float),
    ("LATPOLE", KeyKind::Float),
    ("EQUINOX", KeyKind::Float),
    ("RADESYS", KeyKind::Str),
    ("BUNIT", KeyKind::Str),
    ("PIXTYPE", KeyKind::Str),
    ("ORDERING", KeyKind::Str),
    ("COORDSYS", KeyKind::Str),
    ("NSIDE", KeyKind::Int),
    ("FIRSTPIX", KeyKind::Int),
    ("LASTPIX", KeyKind::Int),
    ("NBRBINS", KeyKind::Int),
    ("NBINS", KeyKind::Int),
    ("NDSKEYS", KeyKind::Int),
];

/// Per-key data sub-space keywords, numbered from 1 to `NDSKEYS`.
const DATA_SUBSPACE_PREFIXES: &[&str] = &["DSTYP", "DSUNI", "DSVAL", "DSREF"];

/// Keywords describing the data layout; these are set by the FITS writer itself.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "EXTNAME",
    "PCOUNT", "GCOUNT", "TFIELDS",
];

fn read_header(fptr: &FitsFile, hdu: &FitsHdu) -> Header {
    let mut header = Header::new();
    for &(keyword, kind) in TRANSFERRED_KEYWORDS {
        match kind {
            KeyKind::Str => {
                if let Ok(value) = hdu.read_key::<String>(fptr, keyword) {
                    header.set(keyword, value, "");
                }
            }
            KeyKind::Float => {
                if let Ok(value) = hdu.read_key::<f64>(fptr, keyword) {
                    header.set(keyword, value, "");
                }
            }
            KeyKind::Int => {
                if let Ok(value) = hdu.read_key::<i64>(fptr, keyword) {
                    header.set(keyword, value, "");
                }
            }
        }
    }
    let nkeys = header.integer("NDSKEYS").unwrap_or(0).max(0);
    for n in 1..=nkeys {
        for prefix in DATA_SUBSPACE_PREFIXES {
            let keyword = format!("{prefix}{n}");
            if let Ok(value) = hdu.read_key::<String>(fptr, &keyword) {
                header.set(&keyword, value, "");
            }
        }
    }
    header
}

/// Vector length of a binary table column from its `TFORMn` code, e.g. 4 for `4D`.
fn column_repeat(column: &str, format: &str) -> Result<usize, FitsError> {
    let format = format.trim();
    let digits = format.chars().take_while(|c| c.is_ascii_digit()).count();
    let unsupported = || FitsError::UnsupportedColumn {
        column: column.to_string(),
        format: format.to_string(),
    };
    match &format[digits..] {
        "D" | "E" | "J" | "K" | "I" | "B" => {}
        _ => return Err(unsupported()),
    }
    if digits == 0 {
        return Ok(1);
    }
    format[..digits].parse().map_err(|_| unsupported())
}

fn read_table(
    fptr: &FitsFile,
    hdu: &FitsHdu,
    ncolumns: usize,
    nrows: usize,
) -> Result<Table, FitsError> {
    let mut table = Table::new(nrows);
    for n in 1..=ncolumns {
        let ttype = format!("TTYPE{n}");
        let name = hdu
            .read_key::<String>(fptr, &ttype)
            .map_err(|_| FitsError::MissingKeyword(ttype))?;
        let tform = format!("TFORM{n}");
        let format = hdu
            .read_key::<String>(fptr, &tform)
            .map_err(|_| FitsError::MissingKeyword(tform))?;
        let unit = hdu
            .read_key::<String>(fptr, &format!("TUNIT{n}"))
            .unwrap_or_default();
        let repeat = column_repeat(&name, &format)?;
        let data = if nrows == 0 || repeat == 0 {
            Vec::new()
        } else {
            hdu.read_col::<f64>(fptr, &name)?
        };
        table.add_column(Column::new(&name, &unit, repeat, data)?)?;
    }
    Ok(table)
}

/// Read all HDUs of a FITS file into a container.
///
/// Image HDUs keep their data with axes in FITS order (`NAXIS1` first) and
/// binary tables keep their numeric columns. HDUs without data are kept as
/// empty placeholders so that HDU indices match the file.
///
/// # Arguments
/// * `path` - Path to the FITS file
pub fn read_fits<P: AsRef<Path>>(path: P) -> Result<FitsContainer, FitsError> {
    let fptr = FitsFile::open(&path)?;
    let mut container = FitsContainer::new();

    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        let name = match hdu.read_key::<String>(&fptr, "EXTNAME") {
            Ok(name) => name,
            Err(_) if hdu_idx == 0 => "Primary".to_string(),
            Err(_) => format!("HDU_{hdu_idx}"),
        };
        let header = read_header(&fptr, &hdu);

        let data = match hdu.info(&fptr)? {
            HduInfo::ImageInfo { shape, .. } if !shape.is_empty() => {
                let values = f64::read_image(&fptr, &hdu)?;
                let naxes: Vec<usize> = shape.iter().rev().copied().collect();
                HduData::Image(Image::new(naxes, values)?)
            }
            HduInfo::TableInfo {
                column_count,
                row_count,
            } => HduData::Table(read_table(&fptr, &hdu, column_count, row_count)?),
            _ => HduData::Empty,
        };

        debug!("Read HDU {hdu_idx} ({name}) from {}", path.as_ref().display());
        container.push(Hdu::new(&name, header, data));
        hdu_idx += 1;
    }

    info!(
        "Read {} HDUs from {}",
        container.len(),
        path.as_ref().display()
    );
    Ok(container)
}

fn write_header(fptr: &mut FitsFile, hdu: &FitsHdu, header: &Header) -> Result<(), FitsError> {
    for card in header.cards() {
        if STRUCTURAL_KEYWORDS.contains(&card.keyword.as_str()) {
            continue;
        }
        match &card.value {
            HeaderValue::Str(s) => hdu.write_key(fptr, &card.keyword, &s.clone())?,
            HeaderValue::Float(v) => hdu.write_key(fptr, &card.keyword, v)?,
            HeaderValue::Int(v) => hdu.write_key(fptr, &card.keyword, v)?,
            HeaderValue::Bool(b) => hdu.write_key(fptr, &card.keyword, &i64::from(*b))?,
        }
    }
    Ok(())
}

fn write_table(fptr: &mut FitsFile, entry: &Hdu, table: &Table) -> Result<FitsHdu, FitsError> {
    let descriptors: Vec<BinaryColumnDescriptor> = table
        .columns()
        .iter()
        .map(|column| BinaryColumnDescriptor {
            name: Some(column.name().to_string()),
            repeat: column.repeat(),
            col_type: BinaryColumnType::Double,
            byte_width: 8 * column.repeat(),
            tdim: None,
        })
        .collect();

    let hdu = fptr.create_table(entry.name(), &descriptors)?;
    for (n, column) in table.columns().iter().enumerate() {
        if table.nrows() > 0 && column.repeat() > 0 {
            hdu.write_col(fptr, column.name(), column.data())?;
        }
        if !column.unit().is_empty() {
            hdu.write_key(fptr, &format!("TUNIT{}", n + 1), column.unit())?;
        }
    }
    Ok(hdu)
}

/// Write the HDUs of a container to a FITS file.
///
/// Image axes are stored in FITS order, so the first container axis becomes
/// `NAXIS1`.
///
/// # Arguments
/// * `container` - HDUs to write; empty HDUs are skipped
/// * `path` - Output path
/// * `clobber` - Overwrite an existing file
pub fn write_fits<P: AsRef<Path>>(
    container: &FitsContainer,
    path: P,
    clobber: bool,
) -> Result<(), FitsError> {
    if !clobber && path.as_ref().exists() {
        return Err(FitsError::FileExists(path.as_ref().to_path_buf()));
    }

    let mut fptr = FitsFile::create(&path).overwrite().open()?;

    for entry in container.hdus() {
        let hdu = match entry.data() {
            HduData::Empty => continue,
            HduData::Image(image) => {
                // The writer takes row-major axes, slowest first
                let dimensions: Vec<usize> = image.shape().iter().rev().copied().collect();
                let image_description = ImageDescription {
                    data_type: ImageType::Double,
                    dimensions: &dimensions,
                };
                let hdu = fptr.create_image(entry.name(), &image_description)?;
                f64::write_image(&mut fptr, &hdu, image.data())?;
                hdu
            }
            HduData::Table(table) => write_table(&mut fptr, entry, table)?,
        };
        write_header(&mut fptr, &hdu, entry.header())?;
        hdu.write_key(&mut fptr, "EXTNAME", entry.name())?;
        debug!("Wrote HDU {}", entry.name());
    }
    fptr.flush()?;

    info!("Wrote FITS file {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_fits_error_display() {
        let error = FitsError::HduNotFound("EBOUNDS".to_string());
        assert!(error.to_string().contains("HDU not found: EBOUNDS"));

        let error = FitsError::UnsupportedColumn {
            column: "FLAG".to_string(),
            format: "1L".to_string(),
        };
        assert!(error.to_string().contains("FLAG"));
        assert!(error.to_string().contains("1L"));
    }

    #[test]
    fn test_column_repeat_from_tform() {
        assert_eq!(column_repeat("DATA", "4D").unwrap(), 4);
        assert_eq!(column_repeat("DATA", "D").unwrap(), 1);
        assert_eq!(column_repeat("DATA", " 12E ").unwrap(), 12);
        assert!(matches!(
            column_repeat("NAME", "20A"),
            Err(FitsError::UnsupportedColumn { .. })
        ));
    }

    #[test]
    fn test_write_refuses_existing_file_without_clobber() {
        let container = FitsContainer::new();
        let temp_file = NamedTempFile::new().unwrap();
        let result = write_fits(&container, temp_file.path(), false);
        assert!(matches!(result, Err(FitsError::FileExists(_))));
    }

    #[test]
    fn test_first_axis_is_written_as_naxis1() {
        let image = Image::new(vec![5, 3], vec![0.0; 15]).unwrap();
        let mut container = FitsContainer::new();
        container.push(Hdu::image("IMAGE", Header::new(), image));

        let temp_file = NamedTempFile::new().unwrap();
        write_fits(&container, temp_file.path(), true).unwrap();

        let fptr = FitsFile::open(temp_file.path()).unwrap();
        let hdu = fptr.hdu("IMAGE").unwrap();
        assert_eq!(hdu.read_key::<i64>(&fptr, "NAXIS1").unwrap(), 5);
        assert_eq!(hdu.read_key::<i64>(&fptr, "NAXIS2").unwrap(), 3);
    }

    #[test]
    fn test_image_round_trip_keeps_wcs_keywords() {
        let mut header = Header::new();
        header.set("CTYPE1", "RA---CAR", "");
        header.set("CTYPE2", "DEC--CAR", "");
        header.set("CRVAL1", 10.0, "");
        header.set("CDELT2", 0.1, "");
        let data: Vec<f64> = (0..24).map(f64::from).collect();
        let image = Image::new(vec![4, 3, 2], data.clone()).unwrap();

        let mut container = FitsContainer::new();
        container.push(Hdu::image("IMAGE", header, image));

        let temp_file = NamedTempFile::new().unwrap();
        write_fits(&container, temp_file.path(), true).unwrap();
        let read_back = read_fits(temp_file.path()).unwrap();

        let hdu = read_back.hdu_by_name("IMAGE").unwrap();
        let image = hdu.as_image().unwrap();
        assert_eq!(image.shape(), &[4, 3, 2]);
        assert_eq!(image.data(), data.as_slice());
        assert_eq!(hdu.header().string("CTYPE1").unwrap(), "RA---CAR");
        assert_eq!(hdu.header().real("CRVAL1").unwrap(), 10.0);
        assert_eq!(hdu.header().real("CDELT2").unwrap(), 0.1);
    }

    #[test]
    fn test_table_round_trip_keeps_vector_columns() {
        let table = Table::new(3)
            .with_column(Column::new("DATA", "", 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap())
            .unwrap()
            .with_column(Column::scalar("Value", "deg", vec![0.1, 0.2, 0.3]))
            .unwrap();
        let mut header = Header::new();
        header.set("NBRBINS", 2_i64, "");
        header.set("NDSKEYS", 1_i64, "");
        header.set("DSTYP1", "POS(RA,DEC)", "");
        header.set("DSVAL1", "CIRCLE(83.6,22.0,3)", "");

        let mut container = FitsContainer::new();
        container.push(Hdu::table("DELTAS", header, table));

        let temp_file = NamedTempFile::new().unwrap();
        write_fits(&container, temp_file.path(), true).unwrap();
        let read_back = read_fits(temp_file.path()).unwrap();

        let hdu = read_back.hdu_by_name("DELTAS").unwrap();
        let table = hdu.as_table().unwrap();
        assert_eq!(table.nrows(), 3);
        let data = table.column("DATA").unwrap();
        assert_eq!(data.repeat(), 2);
        assert_eq!(data.value(1, 0), 3.0);
        assert_eq!(data.value(2, 1), 6.0);
        let value = table.column("Value").unwrap();
        assert_eq!(value.unit(), "deg");
        assert_eq!(value.data(), &[0.1, 0.2, 0.3]);
        assert_eq!(hdu.header().integer("NBRBINS").unwrap(), 2);
        assert_eq!(hdu.header().string("DSVAL1").unwrap(), "CIRCLE(83.6,22.0,3)");
    }

    #[test]
    fn test_empty_table_round_trip() {
        let table = Table::new(0)
            .with_column(Column::scalar("RA", "deg", Vec::new()))
            .unwrap();
        let mut container = FitsContainer::new();
        container.push(Hdu::table("EVENTS", Header::new(), table));

        let temp_file = NamedTempFile::new().unwrap();
        write_fits(&container, temp_file.path(), true).unwrap();
        let read_back = read_fits(temp_file.path()).unwrap();

        let table = read_back.table("EVENTS").unwrap();
        assert_eq!(table.nrows(), 0);
        assert_eq!(table.column("RA").unwrap().unit(), "deg");
    }
}
