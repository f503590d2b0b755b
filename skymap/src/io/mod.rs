//! Persistence of sky maps and cubes.

pub mod container;
pub mod fits;

pub use container::{Column, FitsContainer, Hdu, HduData, Header, HeaderValue, Image, Table};
pub use fits::{read_fits, write_fits, FitsError};
