//! Error types for terraclass

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for terraclass operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid geometry: xmin {xmin} / xmax {xmax}, ymin {ymin} / ymax {ymax}")]
    InvalidGeometry {
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },

    #[error("invalid window size {0}: must be odd and between 1 and 13")]
    InvalidWindowSize(usize),

    #[error("invalid edge policy '{0}': expected 'crop' or 'reflect'")]
    InvalidEdgePolicy(String),

    #[error("no points intersect the requested bounding box")]
    EmptyBboxIntersection,

    #[error("unknown dimension '{0}'")]
    UnknownDimension(String),

    #[error("window of size {neighborhood} does not fit raster of {rows}x{cols} cells")]
    WindowLargerThanRaster {
        rows: usize,
        cols: usize,
        neighborhood: usize,
    },

    #[error("feature does not overlap the raster extent")]
    NoOverlap,

    #[error("read error for '{path}': {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("write error for '{path}': {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch {
        er: usize,
        ec: usize,
        ar: usize,
        ac: usize,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a read error with a formatted reason.
    pub fn read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a write error with a formatted reason.
    pub fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for terraclass operations
pub type Result<T> = std::result::Result<T, Error>;
