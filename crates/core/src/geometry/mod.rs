//! Bounding boxes, pixel windows and grid alignment
//!
//! Every stage of the pipeline exchanges data through `Bbox` (world
//! coordinates) and `Window` (array indices). Keeping the conversions in one
//! place is what keeps the rasters of different stages cell-aligned.

use crate::error::{Error, Result};
use geo_types::{LineString, Polygon};

/// Largest supported kernel neighborhood. Bigger windows smear away the
/// local signal the classifier needs, and cost quadratically more to read.
pub const MAX_NEIGHBORHOOD: usize = 13;

/// Axis-aligned rectangular region in world coordinates.
///
/// Invariant: `xmin < xmax` and `ymin < ymax`, enforced at construction.
/// A `Bbox` is immutable; operations return new values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Bbox {
    /// Create a new Bbox, validating the corner ordering.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        if !(xmin < xmax && ymin < ymax) {
            return Err(Error::InvalidGeometry {
                xmin,
                ymin,
                xmax,
                ymax,
            });
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Minimal enclosing Bbox whose edges are integer multiples of
    /// `resolution` offset from `origin`.
    pub fn aligned(&self, resolution: f64, origin: (f64, f64)) -> Bbox {
        let (ox, oy) = origin;
        Bbox {
            xmin: ox + ((self.xmin - ox) / resolution).floor() * resolution,
            ymin: oy + ((self.ymin - oy) / resolution).floor() * resolution,
            xmax: ox + ((self.xmax - ox) / resolution).ceil() * resolution,
            ymax: oy + ((self.ymax - oy) / resolution).ceil() * resolution,
        }
    }

    /// Grid shape (rows, cols) covering this Bbox at the given resolution.
    pub fn shape(&self, resolution: f64) -> (usize, usize) {
        let rows = (self.height() / resolution).ceil() as usize;
        let cols = (self.width() / resolution).ceil() as usize;
        (rows, cols)
    }

    /// Bbox grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Bbox {
        Bbox {
            xmin: self.xmin - margin,
            ymin: self.ymin - margin,
            xmax: self.xmax + margin,
            ymax: self.ymax + margin,
        }
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    pub fn intersects(&self, other: &Bbox) -> bool {
        self.xmin <= other.xmax
            && self.xmax >= other.xmin
            && self.ymin <= other.ymax
            && self.ymax >= other.ymin
    }

    /// Intersection of two Bboxes, or `None` when they do not overlap with
    /// positive area.
    pub fn intersection(&self, other: &Bbox) -> Option<Bbox> {
        let xmin = self.xmin.max(other.xmin);
        let ymin = self.ymin.max(other.ymin);
        let xmax = self.xmax.min(other.xmax);
        let ymax = self.ymax.min(other.ymax);
        Bbox::new(xmin, ymin, xmax, ymax).ok()
    }

    /// Closed-ring polygon tracing this Bbox, for clipping and
    /// point-in-polygon tests.
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.xmin, self.ymin),
                (self.xmax, self.ymin),
                (self.xmax, self.ymax),
                (self.xmin, self.ymax),
                (self.xmin, self.ymin),
            ]),
            vec![],
        )
    }
}

/// Integer rectangle in array-index space: column/row offset plus size.
///
/// Offsets may be negative before clipping; a clipped window always lies
/// within the addressable extent it was clipped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col: isize,
    pub row: isize,
    pub cols: usize,
    pub rows: usize,
}

impl Window {
    pub fn new(col: isize, row: isize, cols: usize, rows: usize) -> Self {
        Self {
            col,
            row,
            cols,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }

    /// Overlap of two windows, or `None` when they are disjoint.
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let col = self.col.max(other.col);
        let row = self.row.max(other.row);
        let col_end = (self.col + self.cols as isize).min(other.col + other.cols as isize);
        let row_end = (self.row + self.rows as isize).min(other.row + other.rows as isize);
        if col_end <= col || row_end <= row {
            return None;
        }
        Some(Window {
            col,
            row,
            cols: (col_end - col) as usize,
            rows: (row_end - row) as usize,
        })
    }

    /// Whether this window lies entirely within an extent of
    /// `rows` x `cols` cells anchored at (0, 0).
    pub fn fits(&self, rows: usize, cols: usize) -> bool {
        self.col >= 0
            && self.row >= 0
            && self.col + self.cols as isize <= cols as isize
            && self.row + self.rows as isize <= rows as isize
    }
}

/// Validate a kernel neighborhood size and return the half-window (the
/// number of halo cells needed on each side).
pub fn kernel_halo_cells(neighborhood: usize) -> Result<usize> {
    if neighborhood < 1 || neighborhood % 2 == 0 || neighborhood > MAX_NEIGHBORHOOD {
        return Err(Error::InvalidWindowSize(neighborhood));
    }
    Ok((neighborhood - 1) / 2)
}

/// World-space margin that must be read around a Bbox so a kernel of the
/// given size can be evaluated over its whole interior.
pub fn kernel_halo_margin(neighborhood: usize, resolution: f64) -> Result<f64> {
    Ok(kernel_halo_cells(neighborhood)? as f64 * resolution)
}
