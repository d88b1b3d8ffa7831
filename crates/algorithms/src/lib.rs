//! # terraclass Algorithms
//!
//! The raster processing pipeline for terraclass:
//!
//! - **rasterize**: bin lidar point samples into aligned grid rasters
//! - **kernel**: sliding-window statistics (mean, variance, diffmean)
//! - **classify**: stack aligned feature rasters for an opaque classifier
//! - **denoise**: nodata filling, majority voting, sieving
//! - **zonal**: per-polygon class counts
//!
//! Stages compose by plain function calls over immutable rasters and
//! bboxes; nothing here shares mutable state, so independent tiles can run
//! concurrently.

pub mod classify;
pub mod denoise;
pub mod kernel;
pub(crate) mod maybe_rayon;
pub mod rasterize;
pub mod zonal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classify::{classify_stack, Classifier, RasterStack, UNCLASSIFIED};
    pub use crate::denoise::{denoise, fill_nearest_neighbor, majority_vote, sieve};
    pub use crate::kernel::{
        kernel_features, EdgePolicy, KernelFeature, KernelFeatureExtraction,
    };
    pub use crate::rasterize::{
        Aggregation, Dimension, GridSampler, LidarRasterizer, MemoryPointReader, PointReader,
        PointSample,
    };
    pub use crate::zonal::ClassCounter;
    pub use terraclass_core::prelude::*;
}
