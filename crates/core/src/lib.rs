//! # terraclass Core
//!
//! Core types and I/O for the terraclass surface classification pipeline.
//!
//! This crate provides:
//! - `Bbox` / `Window`: world-space and array-space rectangles, grid alignment
//! - `Raster<T>`: generic georeferenced raster grid
//! - `GeoTransform`: affine transformation for georeferencing
//! - `Crs`: coordinate reference system identifiers
//! - GeoTIFF window I/O and a GeoJSON feature adapter
//!
//! The hard invariant everything here serves: rasters produced by different
//! pipeline stages over the same Bbox and resolution are cell-aligned, so
//! they can be stacked, classified and compared index-for-index.

pub mod crs;
pub mod error;
pub mod geometry;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::Crs;
pub use error::{Error, Result};
pub use geometry::{Bbox, Window};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::Crs;
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{Bbox, Window};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
}
