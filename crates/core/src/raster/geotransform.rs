//! Affine georeferencing for rasters

use crate::geometry::{Bbox, Window};
use serde::{Deserialize, Serialize};

/// Affine transformation between pixel coordinates (col, row) and world
/// coordinates (x, y).
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// The origin is the upper-left corner of the upper-left cell. Only
/// axis-aligned (north-up) rasters are supported: `pixel_height` is
/// negative and there are no rotation terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Cell size in X direction
    pub pixel_width: f64,
    /// Cell size in Y direction (negative for north-up)
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// North-up transform with square cells of the given resolution.
    pub fn north_up(origin_x: f64, origin_y: f64, resolution: f64) -> Self {
        Self::new(origin_x, origin_y, resolution, -resolution)
    }

    /// North-up transform covering `bbox` at the given resolution.
    pub fn from_bbox(bbox: &Bbox, resolution: f64) -> Self {
        Self::north_up(bbox.xmin, bbox.ymax, resolution)
    }

    /// World coordinates of the center of pixel (col, row).
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        let x = self.origin_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.origin_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// World coordinates of the upper-left corner of pixel (col, row).
    pub fn pixel_to_geo_corner(&self, col: usize, row: usize) -> (f64, f64) {
        let x = self.origin_x + col as f64 * self.pixel_width;
        let y = self.origin_y + row as f64 * self.pixel_height;
        (x, y)
    }

    /// Fractional pixel coordinates (col, row) of a world point.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.origin_x) / self.pixel_width;
        let row = (y - self.origin_y) / self.pixel_height;
        (col, row)
    }

    /// Cell size (cells are square throughout the pipeline).
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Covering Bbox for a raster of `rows` x `cols` cells.
    pub fn bbox(&self, rows: usize, cols: usize) -> Bbox {
        let xmax = self.origin_x + cols as f64 * self.pixel_width;
        let ymin = self.origin_y + rows as f64 * self.pixel_height;
        Bbox {
            xmin: self.origin_x,
            ymin,
            xmax,
            ymax: self.origin_y,
        }
    }

    /// Pixel window covering `bbox`.
    ///
    /// No clipping is applied; the caller decides whether an out-of-extent
    /// window is an error or something to intersect away. The far edges are
    /// rounded to the nearest cell boundary so resolution-aligned bboxes map
    /// to exact windows.
    pub fn bbox_to_window(&self, bbox: &Bbox) -> Window {
        let col0 = ((bbox.xmin - self.origin_x) / self.pixel_width).floor() as isize;
        let col1 = ((bbox.xmax - self.origin_x) / self.pixel_width + 0.5).floor() as isize;
        let row0 = ((bbox.ymax - self.origin_y) / self.pixel_height).floor() as isize;
        let row1 = ((bbox.ymin - self.origin_y) / self.pixel_height + 0.5).floor() as isize;
        Window {
            col: col0,
            row: row0,
            cols: (col1 - col0).max(0) as usize,
            rows: (row1 - row0).max(0) as usize,
        }
    }

    /// Transform of the raster subset described by `window`.
    pub fn window_transform(&self, window: &Window) -> GeoTransform {
        GeoTransform {
            origin_x: self.origin_x + window.col as f64 * self.pixel_width,
            origin_y: self.origin_y + window.row as f64 * self.pixel_height,
            pixel_width: self.pixel_width,
            pixel_height: self.pixel_height,
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
