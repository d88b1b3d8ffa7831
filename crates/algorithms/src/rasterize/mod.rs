//! Rasterization of lidar point clouds
//!
//! Bins scattered point samples into a regular grid, one output raster per
//! requested dimension. All rasters produced for one set of sources share
//! identical geometry (bbox, resolution, shape) — the alignment invariant
//! the rest of the pipeline depends on.

use log::{debug, info};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use terraclass_core::geometry::Bbox;
use terraclass_core::io::write_raster;
use terraclass_core::raster::{GeoTransform, Raster};
use terraclass_core::{Crs, Error, Result};

/// Named lidar dimensions with their nodata sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Z,
    Intensity,
    ReturnNumber,
    NumberOfReturns,
    Classification,
    ScanAngleRank,
    PulseWidth,
    Amplitude,
    PointSourceId,
}

impl Dimension {
    /// Nodata sentinel used when a grid cell receives no points.
    pub fn nodata(self) -> f64 {
        match self {
            Dimension::Z => -999.0,
            Dimension::Intensity => 0.0,
            Dimension::ReturnNumber => 0.0,
            Dimension::NumberOfReturns => 0.0,
            Dimension::Classification => 255.0,
            Dimension::ScanAngleRank => -999.0,
            Dimension::PulseWidth => -999.0,
            Dimension::Amplitude => -999.0,
            Dimension::PointSourceId => 0.0,
        }
    }

    /// Band name used in output filenames.
    pub fn band_name(self) -> &'static str {
        match self {
            Dimension::Z => "Z",
            Dimension::Intensity => "Intensity",
            Dimension::ReturnNumber => "ReturnNumber",
            Dimension::NumberOfReturns => "NumberOfReturns",
            Dimension::Classification => "Classification",
            Dimension::ScanAngleRank => "ScanAngleRank",
            Dimension::PulseWidth => "Pulsewidth",
            Dimension::Amplitude => "Amplitude",
            Dimension::PointSourceId => "PointSourceId",
        }
    }

    /// Parse a dimension name. Accepts the band name spelling as well as
    /// "Pulse width" with the embedded space.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "Z" => Ok(Dimension::Z),
            "Intensity" => Ok(Dimension::Intensity),
            "ReturnNumber" => Ok(Dimension::ReturnNumber),
            "NumberOfReturns" => Ok(Dimension::NumberOfReturns),
            "Classification" => Ok(Dimension::Classification),
            "ScanAngleRank" => Ok(Dimension::ScanAngleRank),
            "Pulsewidth" | "Pulse width" => Ok(Dimension::PulseWidth),
            "Amplitude" => Ok(Dimension::Amplitude),
            "PointSourceId" => Ok(Dimension::PointSourceId),
            other => Err(Error::UnknownDimension(other.to_string())),
        }
    }
}

/// One lidar point restricted to the requested dimensions.
///
/// `values` is positionally parallel to the dimension list the point was
/// read with. Samples are ephemeral: consumed by the sampler, never stored.
#[derive(Debug, Clone)]
pub struct PointSample {
    pub x: f64,
    pub y: f64,
    pub values: Vec<f64>,
}

/// Boundary trait for point-cloud sources.
///
/// A reader yields each point at most once per call; re-reading requires a
/// new call. Implementations fail with `UnknownDimension` when asked for a
/// dimension the source does not carry.
pub trait PointReader {
    fn read_points(&mut self, bbox: &Bbox, dimensions: &[Dimension]) -> Result<Vec<PointSample>>;
}

/// In-memory point source, used to compose pipelines and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryPointReader {
    dimensions: Vec<Dimension>,
    points: Vec<PointSample>,
}

impl MemoryPointReader {
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self {
            dimensions,
            points: Vec::new(),
        }
    }

    /// Add a point; `values` must be parallel to the reader's dimensions.
    pub fn push(&mut self, x: f64, y: f64, values: &[f64]) {
        debug_assert_eq!(values.len(), self.dimensions.len());
        self.points.push(PointSample {
            x,
            y,
            values: values.to_vec(),
        });
    }
}

impl PointReader for MemoryPointReader {
    fn read_points(&mut self, bbox: &Bbox, dimensions: &[Dimension]) -> Result<Vec<PointSample>> {
        let indices: Vec<usize> = dimensions
            .iter()
            .map(|dim| {
                self.dimensions
                    .iter()
                    .position(|d| d == dim)
                    .ok_or_else(|| Error::UnknownDimension(dim.band_name().to_string()))
            })
            .collect::<Result<_>>()?;

        Ok(self
            .points
            .iter()
            .filter(|p| grid_contains(bbox, p.x, p.y))
            .map(|p| PointSample {
                x: p.x,
                y: p.y,
                values: indices.iter().map(|&i| p.values[i]).collect(),
            })
            .collect())
    }
}

/// Half-open grid membership: points on the top/left edges belong to the
/// grid, points on the bottom/right edges fall into the neighboring tile.
fn grid_contains(bbox: &Bbox, x: f64, y: f64) -> bool {
    x >= bbox.xmin && x < bbox.xmax && y > bbox.ymin && y <= bbox.ymax
}

/// Per-cell aggregation of the points that fall into a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Mean,
    Min,
    Max,
    Count,
}

/// Bins point samples into grid cells and aggregates per cell.
#[derive(Debug, Clone)]
pub struct GridSampler {
    bbox: Bbox,
    resolution: f64,
    rows: usize,
    cols: usize,
}

impl GridSampler {
    pub fn new(bbox: Bbox, resolution: f64) -> Self {
        let (rows, cols) = bbox.shape(resolution);
        Self {
            bbox,
            resolution,
            rows,
            cols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Cell containing the point, or `None` for points outside the grid.
    pub fn cell_index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !grid_contains(&self.bbox, x, y) {
            return None;
        }
        let col = ((x - self.bbox.xmin) / self.resolution).floor() as usize;
        let row = ((self.bbox.ymax - y) / self.resolution).floor() as usize;
        Some((row.min(self.rows - 1), col.min(self.cols - 1)))
    }

    /// Aggregate one value column of the samples into a raster.
    ///
    /// Cells that receive no points are set to `nodata`.
    pub fn sample(
        &self,
        points: &[PointSample],
        value_index: usize,
        nodata: f64,
        aggregation: Aggregation,
    ) -> Raster<f64> {
        let mut acc = match aggregation {
            Aggregation::Min => Array2::from_elem((self.rows, self.cols), f64::INFINITY),
            Aggregation::Max => Array2::from_elem((self.rows, self.cols), f64::NEG_INFINITY),
            _ => Array2::zeros((self.rows, self.cols)),
        };
        let mut count = Array2::<u32>::zeros((self.rows, self.cols));

        for point in points {
            let Some((row, col)) = self.cell_index(point.x, point.y) else {
                continue;
            };
            let value = point.values[value_index];
            match aggregation {
                Aggregation::Mean => acc[(row, col)] += value,
                Aggregation::Min => {
                    if value < acc[(row, col)] {
                        acc[(row, col)] = value;
                    }
                }
                Aggregation::Max => {
                    if value > acc[(row, col)] {
                        acc[(row, col)] = value;
                    }
                }
                Aggregation::Count => {}
            }
            count[(row, col)] += 1;
        }

        let data = Array2::from_shape_fn((self.rows, self.cols), |(row, col)| {
            let n = count[(row, col)];
            if n == 0 {
                return nodata;
            }
            match aggregation {
                Aggregation::Mean => acc[(row, col)] / n as f64,
                Aggregation::Min | Aggregation::Max => acc[(row, col)],
                Aggregation::Count => n as f64,
            }
        });

        let mut raster = Raster::from_array(data);
        raster.set_transform(GeoTransform::from_bbox(&self.bbox, self.resolution));
        raster.set_nodata(Some(nodata));
        raster
    }
}

/// Rasterizes one or more dimensions from one or more point-cloud sources.
///
/// Points from all sources are merged before aggregation, so two half-tiles
/// contribute to the same cells. Output files are named
/// `{prefix}{dimension}{postfix}.tif` inside `outdir`.
#[derive(Debug, Clone)]
pub struct LidarRasterizer {
    pub outdir: PathBuf,
    pub prefix: String,
    pub postfix: String,
    pub resolution: f64,
    pub bbox: Bbox,
    pub dimensions: Vec<Dimension>,
    pub aggregation: Aggregation,
    pub crs: Option<Crs>,
}

impl LidarRasterizer {
    pub fn new(
        outdir: impl AsRef<Path>,
        resolution: f64,
        bbox: Bbox,
        dimensions: Vec<Dimension>,
    ) -> Self {
        Self {
            outdir: outdir.as_ref().to_path_buf(),
            prefix: String::new(),
            postfix: String::new(),
            resolution,
            bbox,
            dimensions,
            aggregation: Aggregation::default(),
            crs: None,
        }
    }

    /// Read, merge and aggregate, returning one raster per dimension.
    pub fn rasterize(&self, sources: &mut [&mut dyn PointReader]) -> Result<Vec<Raster<f64>>> {
        let mut points: Vec<PointSample> = Vec::new();
        for source in sources.iter_mut() {
            let mut part = source.read_points(&self.bbox, &self.dimensions)?;
            debug!("source delivered {} points", part.len());
            points.append(&mut part);
        }
        if points.is_empty() {
            return Err(Error::EmptyBboxIntersection);
        }
        info!(
            "gridding {} points into {} dimension rasters",
            points.len(),
            self.dimensions.len()
        );

        let sampler = GridSampler::new(self.bbox, self.resolution);
        let rasters = self
            .dimensions
            .iter()
            .enumerate()
            .map(|(index, dim)| {
                let mut raster =
                    sampler.sample(&points, index, dim.nodata(), self.aggregation);
                raster.set_crs(self.crs.clone());
                raster
            })
            .collect();
        Ok(rasters)
    }

    /// Rasterize and persist, returning the written paths.
    pub fn run(&self, sources: &mut [&mut dyn PointReader]) -> Result<Vec<PathBuf>> {
        let rasters = self.rasterize(sources)?;
        let mut paths = Vec::with_capacity(rasters.len());
        for (dim, raster) in self.dimensions.iter().zip(&rasters) {
            let path = self.output_filename(*dim);
            write_raster(&path, raster)?;
            info!("wrote '{}'", path.display());
            paths.push(path);
        }
        Ok(paths)
    }

    fn output_filename(&self, dimension: Dimension) -> PathBuf {
        let name = format!(
            "{}{}{}.tif",
            self.prefix,
            dimension.band_name(),
            self.postfix
        );
        self.outdir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bbox() -> Bbox {
        Bbox::new(0.0, 0.0, 4.0, 4.0).unwrap()
    }

    fn amplitude_reader(points: &[(f64, f64, f64)]) -> MemoryPointReader {
        let mut reader = MemoryPointReader::new(vec![Dimension::Amplitude]);
        for &(x, y, a) in points {
            reader.push(x, y, &[a]);
        }
        reader
    }

    #[test]
    fn test_two_points_one_cell_mean() {
        let mut reader = amplitude_reader(&[(0.5, 3.5, 10.0), (0.6, 3.6, 20.0)]);
        let rasterizer = LidarRasterizer::new(
            "unused",
            1.0,
            bbox(),
            vec![Dimension::Amplitude],
        );
        let rasters = rasterizer.rasterize(&mut [&mut reader]).unwrap();
        assert_eq!(rasters.len(), 1);
        assert_relative_eq!(rasters[0].get(0, 0).unwrap(), 15.0);
    }

    #[test]
    fn test_empty_cells_are_nodata() {
        let mut reader = amplitude_reader(&[(0.5, 3.5, 10.0)]);
        let rasterizer =
            LidarRasterizer::new("unused", 1.0, bbox(), vec![Dimension::Amplitude]);
        let raster = rasterizer.rasterize(&mut [&mut reader]).unwrap().remove(0);
        assert_relative_eq!(raster.get(0, 0).unwrap(), 10.0);
        assert_relative_eq!(raster.get(3, 3).unwrap(), -999.0);
        assert!(raster.is_nodata(raster.get(3, 3).unwrap()));
    }

    #[test]
    fn test_points_outside_bbox_discarded() {
        let mut reader = amplitude_reader(&[(10.0, 10.0, 99.0), (0.5, 0.5, 5.0)]);
        let rasterizer =
            LidarRasterizer::new("unused", 1.0, bbox(), vec![Dimension::Amplitude]);
        let raster = rasterizer.rasterize(&mut [&mut reader]).unwrap().remove(0);
        assert_relative_eq!(raster.get(3, 0).unwrap(), 5.0);
    }

    #[test]
    fn test_no_points_in_bbox_fails() {
        let mut reader = amplitude_reader(&[(10.0, 10.0, 99.0)]);
        let rasterizer =
            LidarRasterizer::new("unused", 1.0, bbox(), vec![Dimension::Amplitude]);
        let err = rasterizer.rasterize(&mut [&mut reader]).unwrap_err();
        assert!(matches!(err, Error::EmptyBboxIntersection));
    }

    #[test]
    fn test_unknown_dimension_fails() {
        let mut reader = amplitude_reader(&[(0.5, 0.5, 1.0)]);
        let rasterizer =
            LidarRasterizer::new("unused", 1.0, bbox(), vec![Dimension::Intensity]);
        let err = rasterizer.rasterize(&mut [&mut reader]).unwrap_err();
        assert!(matches!(err, Error::UnknownDimension(_)));
    }

    #[test]
    fn test_sources_merge_before_aggregation() {
        let mut a = amplitude_reader(&[(1.5, 1.5, 10.0)]);
        let mut b = amplitude_reader(&[(1.5, 1.5, 30.0)]);
        let rasterizer =
            LidarRasterizer::new("unused", 1.0, bbox(), vec![Dimension::Amplitude]);
        let raster = rasterizer
            .rasterize(&mut [&mut a, &mut b])
            .unwrap()
            .remove(0);
        assert_relative_eq!(raster.get(2, 1).unwrap(), 20.0);
    }

    #[test]
    fn test_aggregations() {
        let mut reader = amplitude_reader(&[(0.5, 3.5, 10.0), (0.7, 3.7, 30.0)]);
        let mut rasterizer =
            LidarRasterizer::new("unused", 1.0, bbox(), vec![Dimension::Amplitude]);

        rasterizer.aggregation = Aggregation::Min;
        let raster = rasterizer.rasterize(&mut [&mut reader]).unwrap().remove(0);
        assert_relative_eq!(raster.get(0, 0).unwrap(), 10.0);

        rasterizer.aggregation = Aggregation::Max;
        let raster = rasterizer.rasterize(&mut [&mut reader]).unwrap().remove(0);
        assert_relative_eq!(raster.get(0, 0).unwrap(), 30.0);

        rasterizer.aggregation = Aggregation::Count;
        let raster = rasterizer.rasterize(&mut [&mut reader]).unwrap().remove(0);
        assert_relative_eq!(raster.get(0, 0).unwrap(), 2.0);
    }

    #[test]
    fn test_edge_membership() {
        let sampler = GridSampler::new(bbox(), 1.0);
        // Top-left corner is in, bottom-right corner is out
        assert_eq!(sampler.cell_index(0.0, 4.0), Some((0, 0)));
        assert_eq!(sampler.cell_index(4.0, 0.5), None);
        assert_eq!(sampler.cell_index(0.5, 0.0), None);
        // Just inside the bottom-right cell
        assert_eq!(sampler.cell_index(3.999, 0.001), Some((3, 3)));
    }

    #[test]
    fn test_outputs_share_geometry() {
        let mut reader = MemoryPointReader::new(vec![Dimension::Amplitude, Dimension::Z]);
        reader.push(0.5, 3.5, &[12.0, 45.0]);
        let rasterizer = LidarRasterizer::new(
            "unused",
            0.5,
            bbox(),
            vec![Dimension::Amplitude, Dimension::Z],
        );
        let rasters = rasterizer.rasterize(&mut [&mut reader]).unwrap();
        assert_eq!(rasters[0].shape(), rasters[1].shape());
        assert_eq!(rasters[0].transform(), rasters[1].transform());
        assert_eq!(rasters[0].shape(), (8, 8));
    }

    #[test]
    fn test_grid_shape_rounds_up() {
        let bbox = Bbox::new(0.0, 0.0, 3.3, 2.1).unwrap();
        let sampler = GridSampler::new(bbox, 1.0);
        assert_eq!(sampler.shape(), (3, 4));
    }
}
