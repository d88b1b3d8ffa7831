//! Feature stacking and the classifier seam
//!
//! The classifier itself is external and opaque: features in, class code
//! out. What this module owns is the alignment guarantee — every band in a
//! stack must share geometry exactly, so that index (row, col) means the
//! same world-space cell in all of them — and the nodata bookkeeping around
//! the classifier call.

use log::info;
use ndarray::Array2;
use terraclass_core::raster::Raster;
use terraclass_core::{Error, Result};

/// Class code marking cells that could not be classified.
pub const UNCLASSIFIED: u8 = 255;

/// Cell-aligned set of feature rasters, in caller-defined band order.
#[derive(Debug, Clone)]
pub struct RasterStack {
    bands: Vec<Raster<f64>>,
}

impl RasterStack {
    /// Build a stack, verifying that all bands share shape and transform.
    pub fn new(bands: Vec<Raster<f64>>) -> Result<Self> {
        let first = bands
            .first()
            .ok_or_else(|| Error::Other("raster stack needs at least one band".to_string()))?;
        let shape = first.shape();
        let transform = *first.transform();

        for band in &bands {
            if band.shape() != shape {
                return Err(Error::SizeMismatch {
                    er: shape.0,
                    ec: shape.1,
                    ar: band.rows(),
                    ac: band.cols(),
                });
            }
            if !transforms_match(band.transform(), &transform) {
                return Err(Error::Other(
                    "bands do not stack: geotransforms differ".to_string(),
                ));
            }
        }

        Ok(Self { bands })
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].shape()
    }

    pub fn bands(&self) -> &[Raster<f64>] {
        &self.bands
    }

    /// Feature vector for one cell, or `None` when any band is nodata there.
    pub fn cell_features(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        let mut features = Vec::with_capacity(self.bands.len());
        for band in &self.bands {
            let value = unsafe { band.get_unchecked(row, col) };
            if band.is_nodata(value) {
                return None;
            }
            features.push(value);
        }
        Some(features)
    }
}

fn transforms_match(a: &terraclass_core::GeoTransform, b: &terraclass_core::GeoTransform) -> bool {
    (a.origin_x - b.origin_x).abs() < 1e-9
        && (a.origin_y - b.origin_y).abs() < 1e-9
        && (a.pixel_width - b.pixel_width).abs() < 1e-9
        && (a.pixel_height - b.pixel_height).abs() < 1e-9
}

/// Opaque per-cell classifier: a feature vector in band order to a class
/// code. Trained models live behind this seam.
pub trait Classifier {
    fn classify(&self, features: &[f64]) -> u8;
}

/// Classify every cell of a stack.
///
/// Cells where any band is nodata are not passed to the classifier; they
/// come out as [`UNCLASSIFIED`].
pub fn classify_stack(stack: &RasterStack, model: &dyn Classifier) -> Result<Raster<u8>> {
    let (rows, cols) = stack.shape();
    let mut data = Array2::<u8>::from_elem((rows, cols), UNCLASSIFIED);
    let mut valid = 0usize;

    for row in 0..rows {
        for col in 0..cols {
            if let Some(features) = stack.cell_features(row, col) {
                data[(row, col)] = model.classify(&features);
                valid += 1;
            }
        }
    }
    info!("classified {} of {} cells", valid, rows * cols);

    let mut out: Raster<u8> = stack.bands()[0].with_same_meta(rows, cols);
    *out.data_mut() = data;
    out.set_nodata(Some(UNCLASSIFIED));
    Ok(out)
}
