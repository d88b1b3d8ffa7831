//! I/O adapters for rasters
//!
//! All raster persistence goes through this module. The contract the rest of
//! the pipeline depends on: a write-then-read round trip preserves geometry
//! (bbox, resolution) and the nodata sentinel bit-exactly.

mod geotiff;

pub use geotiff::{write_raster, RasterReader};
