//! In-memory FITS-like container of header/data units.
//!
//! The container mirrors the FITS structure closely enough for sky maps and
//! response cubes to persist themselves: an ordered list of HDUs, each with
//! a keyword header and either image or binary-table data. Image HDUs can be
//! written to disk through [`crate::io::fits`].

use std::fmt;

use super::FitsError;

/// Value of a header keyword.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Str(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<usize> for HeaderValue {
    fn from(value: usize) -> Self {
        HeaderValue::Int(value as i64)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Str(s) => write!(f, "'{s}'"),
            HeaderValue::Float(v) => write!(f, "{v}"),
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Bool(true) => write!(f, "T"),
            HeaderValue::Bool(false) => write!(f, "F"),
        }
    }
}

/// A single header card.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub keyword: String,
    pub value: HeaderValue,
    pub comment: String,
}

/// Ordered set of header cards with unique keywords.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a keyword, replacing the value (and comment) of an existing card.
    pub fn set<V: Into<HeaderValue>>(&mut self, keyword: &str, value: V, comment: &str) {
        let keyword = keyword.to_uppercase();
        let value = value.into();
        match self.cards.iter_mut().find(|card| card.keyword == keyword) {
            Some(card) => {
                card.value = value;
                card.comment = comment.to_string();
            }
            None => self.cards.push(Card {
                keyword,
                value,
                comment: comment.to_string(),
            }),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|card| card.keyword.eq_ignore_ascii_case(keyword))
            .map(|card| &card.value)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    fn required(&self, keyword: &str) -> Result<&HeaderValue, FitsError> {
        self.get(keyword)
            .ok_or_else(|| FitsError::MissingKeyword(keyword.to_string()))
    }

    /// String value of a keyword; numeric values are formatted.
    pub fn string(&self, keyword: &str) -> Result<String, FitsError> {
        Ok(match self.required(keyword)? {
            HeaderValue::Str(s) => s.trim().to_string(),
            other => other.to_string(),
        })
    }

    /// Floating point value of a keyword; integers and numeric strings convert.
    pub fn real(&self, keyword: &str) -> Result<f64, FitsError> {
        match self.required(keyword)? {
            HeaderValue::Float(v) => Ok(*v),
            HeaderValue::Int(v) => Ok(*v as f64),
            HeaderValue::Str(s) => s.trim().parse().map_err(|_| FitsError::KeywordType {
                keyword: keyword.to_string(),
                expected: "floating point",
            }),
            HeaderValue::Bool(_) => Err(FitsError::KeywordType {
                keyword: keyword.to_string(),
                expected: "floating point",
            }),
        }
    }

    /// Integer value of a keyword; integral floats and numeric strings convert.
    pub fn integer(&self, keyword: &str) -> Result<i64, FitsError> {
        let mismatch = || FitsError::KeywordType {
            keyword: keyword.to_string(),
            expected: "integer",
        };
        match self.required(keyword)? {
            HeaderValue::Int(v) => Ok(*v),
            HeaderValue::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            HeaderValue::Str(s) => s.trim().parse().map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }
}

/// N-dimensional double precision image, first axis varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    naxes: Vec<usize>,
    data: Vec<f64>,
}

impl Image {
    pub fn new(naxes: Vec<usize>, data: Vec<f64>) -> Result<Self, FitsError> {
        let expected: usize = naxes.iter().product();
        if naxes.is_empty() || expected != data.len() {
            return Err(FitsError::InvalidShape(format!(
                "image axes {:?} require {} values but {} were given",
                naxes,
                expected,
                data.len()
            )));
        }
        Ok(Self { naxes, data })
    }

    pub fn zeros(naxes: Vec<usize>) -> Self {
        let len = naxes.iter().product();
        Self {
            naxes,
            data: vec![0.0; len],
        }
    }

    pub fn naxis(&self) -> usize {
        self.naxes.len()
    }

    /// Length of axis `axis` (0-based), or 1 beyond the last axis.
    pub fn naxes(&self, axis: usize) -> usize {
        self.naxes.get(axis).copied().unwrap_or(1)
    }

    pub fn shape(&self) -> &[usize] {
        &self.naxes
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }
}

/// Binary table column of doubles with `repeat` elements per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    unit: String,
    repeat: usize,
    data: Vec<f64>,
}

impl Column {
    /// Create a column holding `data.len() / repeat` rows.
    pub fn new(name: &str, unit: &str, repeat: usize, data: Vec<f64>) -> Result<Self, FitsError> {
        if repeat == 0 || data.len() % repeat != 0 {
            return Err(FitsError::InvalidShape(format!(
                "column {name}: {} values cannot be split into rows of {repeat}",
                data.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            unit: unit.to_string(),
            repeat,
            data,
        })
    }

    /// Scalar column with one element per row.
    pub fn scalar(name: &str, unit: &str, data: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            repeat: 1,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Number of elements per row.
    pub fn repeat(&self) -> usize {
        self.repeat
    }

    pub fn nrows(&self) -> usize {
        self.data.len() / self.repeat
    }

    /// Element `inx` of row `row`.
    pub fn value(&self, row: usize, inx: usize) -> f64 {
        self.data[row * self.repeat + inx]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

/// Binary table with a fixed number of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    nrows: usize,
    columns: Vec<Column>,
}

impl Table {
    pub fn new(nrows: usize) -> Self {
        Self {
            nrows,
            columns: Vec::new(),
        }
    }

    pub fn add_column(&mut self, column: Column) -> Result<(), FitsError> {
        if column.nrows() != self.nrows {
            return Err(FitsError::InvalidShape(format!(
                "column {} has {} rows but the table has {}",
                column.name(),
                column.nrows(),
                self.nrows
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Builder form of [`Table::add_column`].
    pub fn with_column(mut self, column: Column) -> Result<Self, FitsError> {
        self.add_column(column)?;
        Ok(self)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&Column, FitsError> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| FitsError::ColumnNotFound(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HduData {
    Empty,
    Image(Image),
    Table(Table),
}

/// Header/data unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    name: String,
    header: Header,
    data: HduData,
}

impl Hdu {
    pub fn new(name: &str, header: Header, data: HduData) -> Self {
        let mut header = header;
        header.set("EXTNAME", name, "Extension name");
        Self {
            name: name.to_string(),
            header,
            data,
        }
    }

    pub fn image(name: &str, header: Header, image: Image) -> Self {
        Self::new(name, header, HduData::Image(image))
    }

    pub fn table(name: &str, header: Header, table: Table) -> Self {
        Self::new(name, header, HduData::Table(table))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn data(&self) -> &HduData {
        &self.data
    }

    pub fn as_image(&self) -> Option<&Image> {
        match &self.data {
            HduData::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match &self.data {
            HduData::Table(table) => Some(table),
            _ => None,
        }
    }
}

/// Ordered collection of HDUs; index 0 plays the role of the primary HDU.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsContainer {
    hdus: Vec<Hdu>,
}

impl FitsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an HDU and return its index.
    pub fn push(&mut self, hdu: Hdu) -> usize {
        self.hdus.push(hdu);
        self.hdus.len() - 1
    }

    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn hdu(&self, index: usize) -> Result<&Hdu, FitsError> {
        self.hdus
            .get(index)
            .ok_or_else(|| FitsError::HduNotFound(format!("#{index}")))
    }

    pub fn hdu_by_name(&self, name: &str) -> Result<&Hdu, FitsError> {
        self.hdus
            .iter()
            .find(|hdu| hdu.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| FitsError::HduNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hdu_by_name(name).is_ok()
    }

    /// Table data of the named HDU.
    pub fn table(&self, name: &str) -> Result<&Table, FitsError> {
        let hdu = self.hdu_by_name(name)?;
        hdu.as_table()
            .ok_or_else(|| FitsError::InvalidDataType(format!("HDU {name} is not a table")))
    }
}
