//! Sliding-window statistical features
//!
//! Computes neighborhood statistics (mean, variance, difference-of-means)
//! over a raster with a square window of odd size. The window slides with
//! moving sums — per-column running totals updated by adding the incoming
//! row and removing the outgoing one, then a horizontal rolling sum — so the
//! cost is O(cells) amortized instead of O(cells * n^2).
//!
//! At the raster boundary an edge policy applies: `crop` shrinks the output
//! to cells whose full window exists, `reflect` mirrors interior cells
//! across the edge. When the region of interest has real neighboring data
//! in the source raster, that data is read as a halo and the policy only
//! applies at the true extent.

use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use terraclass_core::geometry::{kernel_halo_cells, Bbox};
use terraclass_core::io::{write_raster, RasterReader};
use terraclass_core::raster::Raster;
use terraclass_core::{Error, Result};

/// Rule for handling the raster boundary when the window extends past the
/// data extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Truncate: output shrinks by the missing margin, out-of-extent data is
    /// never fabricated.
    Crop,
    /// Mirror interior cells across the boundary (the edge cell itself is
    /// not repeated), keeping the full output extent.
    Reflect,
}

impl FromStr for EdgePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "crop" => Ok(EdgePolicy::Crop),
            "reflect" => Ok(EdgePolicy::Reflect),
            other => Err(Error::InvalidEdgePolicy(other.to_string())),
        }
    }
}

/// Neighborhood statistics the extractor can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFeature {
    /// Arithmetic mean of the neighborhood, including the center cell
    Mean,
    /// Sample variance of the neighborhood, including the center cell
    Var,
    /// Center cell value minus the neighborhood mean
    DiffMean,
}

impl KernelFeature {
    /// Band name used in output filenames.
    pub fn band_name(self) -> &'static str {
        match self {
            KernelFeature::Mean => "mean",
            KernelFeature::Var => "var",
            KernelFeature::DiffMean => "diffmean",
        }
    }
}

impl FromStr for KernelFeature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(KernelFeature::Mean),
            "var" => Ok(KernelFeature::Var),
            "diffmean" => Ok(KernelFeature::DiffMean),
            other => Err(Error::Other(format!("unknown kernel feature '{}'", other))),
        }
    }
}

fn is_nodata_val(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) => value == nd,
        None => false,
    }
}

/// Mirror-pad a matrix by the given number of cells per side.
///
/// Reflection excludes the edge cell, so a pad of `k` needs at least `k + 1`
/// cells of real data in that direction.
fn reflect_pad(
    src: ArrayView2<'_, f64>,
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
    neighborhood: usize,
) -> Result<Array2<f64>> {
    let (rows, cols) = src.dim();
    if top.max(bottom) + 1 > rows || left.max(right) + 1 > cols {
        return Err(Error::WindowLargerThanRaster {
            rows,
            cols,
            neighborhood,
        });
    }
    Ok(Array2::from_shape_fn(
        (rows + top + bottom, cols + left + right),
        |(i, j)| {
            let mut r = i as isize - top as isize;
            if r < 0 {
                r = -r;
            } else if r >= rows as isize {
                r = 2 * rows as isize - 2 - r;
            }
            let mut c = j as isize - left as isize;
            if c < 0 {
                c = -c;
            } else if c >= cols as isize {
                c = 2 * cols as isize - 2 - c;
            }
            src[(r as usize, c as usize)]
        },
    ))
}

/// Moving-window pass over `matrix` in "valid" mode: every output cell has a
/// full n x n window. Returns one array per requested feature, each of shape
/// `(rows - n + 1, cols - n + 1)`.
fn rolling_features(
    matrix: &Array2<f64>,
    nodata: Option<f64>,
    neighborhood: usize,
    features: &[KernelFeature],
    out_nodata: f64,
) -> Result<Vec<Array2<f64>>> {
    let (rows, cols) = matrix.dim();
    let n = neighborhood;
    if rows < n || cols < n {
        return Err(Error::WindowLargerThanRaster {
            rows,
            cols,
            neighborhood: n,
        });
    }
    let pad = (n - 1) / 2;
    let out_rows = rows - n + 1;
    let out_cols = cols - n + 1;

    let mut outputs: Vec<Array2<f64>> = features
        .iter()
        .map(|_| Array2::from_elem((out_rows, out_cols), out_nodata))
        .collect();

    // Per-column totals for the current row band [out_row, out_row + n)
    let mut col_sum = vec![0.0_f64; cols];
    let mut col_sumsq = vec![0.0_f64; cols];
    let mut col_cnt = vec![0_u32; cols];

    let mut add_row = |row: usize,
                       sign: f64,
                       col_sum: &mut [f64],
                       col_sumsq: &mut [f64],
                       col_cnt: &mut [u32]| {
        for col in 0..cols {
            let v = matrix[(row, col)];
            if is_nodata_val(v, nodata) {
                continue;
            }
            col_sum[col] += sign * v;
            col_sumsq[col] += sign * v * v;
            if sign > 0.0 {
                col_cnt[col] += 1;
            } else {
                col_cnt[col] -= 1;
            }
        }
    };

    for row in 0..n {
        add_row(row, 1.0, &mut col_sum, &mut col_sumsq, &mut col_cnt);
    }

    for out_row in 0..out_rows {
        if out_row > 0 {
            add_row(out_row - 1, -1.0, &mut col_sum, &mut col_sumsq, &mut col_cnt);
            add_row(
                out_row + n - 1,
                1.0,
                &mut col_sum,
                &mut col_sumsq,
                &mut col_cnt,
            );
        }

        // Horizontal rolling sum over the column totals
        let mut sum = 0.0_f64;
        let mut sumsq = 0.0_f64;
        let mut cnt = 0_u32;
        for col in 0..n {
            sum += col_sum[col];
            sumsq += col_sumsq[col];
            cnt += col_cnt[col];
        }

        for out_col in 0..out_cols {
            if out_col > 0 {
                sum += col_sum[out_col + n - 1] - col_sum[out_col - 1];
                sumsq += col_sumsq[out_col + n - 1] - col_sumsq[out_col - 1];
                cnt += col_cnt[out_col + n - 1];
                cnt -= col_cnt[out_col - 1];
            }

            let center = matrix[(out_row + pad, out_col + pad)];
            for (feature, output) in features.iter().zip(outputs.iter_mut()) {
                let value = match feature {
                    KernelFeature::Mean => {
                        if cnt == 0 {
                            continue;
                        }
                        sum / cnt as f64
                    }
                    KernelFeature::Var => match cnt {
                        0 => continue,
                        1 => 0.0,
                        _ => {
                            let var = (sumsq - sum * sum / cnt as f64) / (cnt - 1) as f64;
                            var.max(0.0)
                        }
                    },
                    KernelFeature::DiffMean => {
                        if cnt == 0 || is_nodata_val(center, nodata) {
                            continue;
                        }
                        center - sum / cnt as f64
                    }
                };
                output[(out_row, out_col)] = value;
            }
        }
    }

    Ok(outputs)
}

/// Compute kernel features over a raster held in memory.
///
/// With `crop` the output shrinks by `(n-1)/2` cells per side; with
/// `reflect` it keeps the input shape. Each output raster carries the
/// geometry of the region it actually covers.
pub fn kernel_features(
    raster: &Raster<f64>,
    neighborhood: usize,
    edge_policy: EdgePolicy,
    features: &[KernelFeature],
) -> Result<Vec<(KernelFeature, Raster<f64>)>> {
    let pad = kernel_halo_cells(neighborhood)?;
    let nodata = raster.nodata();
    let out_nodata = nodata.unwrap_or(f64::NAN);

    let (matrix, out_transform) = match edge_policy {
        EdgePolicy::Crop => {
            let transform = raster.transform().window_transform(
                &terraclass_core::Window::new(pad as isize, pad as isize, 0, 0),
            );
            (raster.data().clone(), transform)
        }
        EdgePolicy::Reflect => (
            reflect_pad(raster.view(), pad, pad, pad, pad, neighborhood)?,
            *raster.transform(),
        ),
    };

    let arrays = rolling_features(&matrix, nodata, neighborhood, features, out_nodata)?;

    Ok(features
        .iter()
        .zip(arrays)
        .map(|(&feature, data)| {
            let mut out = Raster::from_array(data);
            out.set_transform(out_transform);
            out.set_crs(raster.crs().cloned());
            out.set_nodata(Some(out_nodata));
            (feature, out)
        })
        .collect())
}

/// Extracts kernel features for a region of a raster file, reading a halo
/// around the region so the edge policy only applies at the true raster
/// extent.
#[derive(Debug, Clone)]
pub struct KernelFeatureExtraction {
    pub outdir: PathBuf,
    pub prefix: String,
    pub postfix: String,
    pub neighborhood: usize,
    pub edge_policy: EdgePolicy,
    pub features: Vec<KernelFeature>,
}

impl KernelFeatureExtraction {
    pub fn new(
        outdir: impl AsRef<Path>,
        neighborhood: usize,
        edge_policy: EdgePolicy,
        features: Vec<KernelFeature>,
    ) -> Self {
        Self {
            outdir: outdir.as_ref().to_path_buf(),
            prefix: String::new(),
            postfix: String::new(),
            neighborhood,
            edge_policy,
            features,
        }
    }

    /// Compute the features for `bbox` (default: the full raster extent).
    pub fn extract(
        &self,
        reader: &RasterReader<f64>,
        bbox: Option<Bbox>,
    ) -> Result<Vec<(KernelFeature, Raster<f64>)>> {
        let pad = kernel_halo_cells(self.neighborhood)?;
        let requested = bbox.unwrap_or_else(|| reader.bbox());
        let resolution = reader.resolution();
        let margin = pad as f64 * resolution;

        let desired = requested.expanded(margin);
        let available = desired
            .intersection(&reader.bbox())
            .ok_or(Error::NoOverlap)?;
        let src = reader.read_window(&available)?;
        debug!(
            "halo read: requested {:?}, available {:?}",
            requested, available
        );

        // Halo cells the raster could not provide, per side
        let top = ((desired.ymax - available.ymax) / resolution).round() as usize;
        let bottom = ((available.ymin - desired.ymin) / resolution).round() as usize;
        let left = ((available.xmin - desired.xmin) / resolution).round() as usize;
        let right = ((desired.xmax - available.xmax) / resolution).round() as usize;

        let nodata = src.nodata();
        let out_nodata = nodata.unwrap_or(f64::NAN);

        let (matrix, out_bbox) = match self.edge_policy {
            EdgePolicy::Crop => {
                let out_bbox = Bbox::new(
                    available.xmin + pad as f64 * resolution,
                    available.ymin + pad as f64 * resolution,
                    available.xmax - pad as f64 * resolution,
                    available.ymax - pad as f64 * resolution,
                )
                .map_err(|_| Error::WindowLargerThanRaster {
                    rows: src.rows(),
                    cols: src.cols(),
                    neighborhood: self.neighborhood,
                })?;
                (src.data().clone(), out_bbox)
            }
            EdgePolicy::Reflect => (
                reflect_pad(src.view(), top, bottom, left, right, self.neighborhood)?,
                requested,
            ),
        };

        let arrays =
            rolling_features(&matrix, nodata, self.neighborhood, &self.features, out_nodata)?;

        let out_window = reader.transform().bbox_to_window(&out_bbox);
        let out_transform = reader.transform().window_transform(&out_window);

        Ok(self
            .features
            .iter()
            .zip(arrays)
            .map(|(&feature, data)| {
                let mut out = Raster::from_array(data);
                out.set_transform(out_transform);
                out.set_crs(src.crs().cloned());
                out.set_nodata(Some(out_nodata));
                (feature, out)
            })
            .collect())
    }

    /// Compute and persist, returning the written paths.
    pub fn run(&self, reader: &RasterReader<f64>, bbox: Option<Bbox>) -> Result<Vec<PathBuf>> {
        let results = self.extract(reader, bbox)?;
        let mut paths = Vec::with_capacity(results.len());
        for (feature, raster) in &results {
            let path = self.output_filename(*feature);
            write_raster(&path, raster)?;
            info!("wrote '{}'", path.display());
            paths.push(path);
        }
        Ok(paths)
    }

    fn output_filename(&self, feature: KernelFeature) -> PathBuf {
        let name = format!("{}{}{}.tif", self.prefix, feature.band_name(), self.postfix);
        self.outdir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use terraclass_core::raster::GeoTransform;

    fn raster_from(rows: usize, cols: usize, values: &[f64]) -> Raster<f64> {
        let mut r = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
        r.set_transform(GeoTransform::north_up(0.0, rows as f64, 1.0));
        r
    }

    fn uniform(rows: usize, cols: usize, value: f64) -> Raster<f64> {
        let mut r = Raster::filled(rows, cols, value);
        r.set_transform(GeoTransform::north_up(0.0, rows as f64, 1.0));
        r
    }

    #[test]
    fn test_edge_policy_parsing() {
        assert_eq!("crop".parse::<EdgePolicy>().unwrap(), EdgePolicy::Crop);
        assert_eq!("reflect".parse::<EdgePolicy>().unwrap(), EdgePolicy::Reflect);
        assert!(matches!(
            "wrap".parse::<EdgePolicy>(),
            Err(Error::InvalidEdgePolicy(_))
        ));
    }

    #[test]
    fn test_even_window_rejected() {
        let r = uniform(5, 5, 1.0);
        let err =
            kernel_features(&r, 4, EdgePolicy::Reflect, &[KernelFeature::Mean]).unwrap_err();
        assert!(matches!(err, Error::InvalidWindowSize(4)));
    }

    #[test]
    fn test_crop_shrinks_output() {
        let r = uniform(10, 10, 2.5);
        let out = kernel_features(&r, 3, EdgePolicy::Crop, &[KernelFeature::Mean]).unwrap();
        let (_, mean) = &out[0];
        assert_eq!(mean.shape(), (8, 8));
        assert_relative_eq!(mean.get(0, 0).unwrap(), 2.5);
        // Cropped output is anchored one cell in
        assert_relative_eq!(mean.transform().origin_x, 1.0);
        assert_relative_eq!(mean.transform().origin_y, 9.0);
    }

    #[test]
    fn test_reflect_keeps_shape() {
        let r = uniform(4, 4, 1.0);
        let out = kernel_features(
            &r,
            3,
            EdgePolicy::Reflect,
            &[KernelFeature::Mean, KernelFeature::Var],
        )
        .unwrap();
        let (_, mean) = &out[0];
        let (_, var) = &out[1];
        assert_eq!(mean.shape(), (4, 4));
        assert_eq!(var.shape(), (4, 4));
        for row in 0..4 {
            for col in 0..4 {
                assert_relative_eq!(mean.get(row, col).unwrap(), 1.0);
                assert_relative_eq!(var.get(row, col).unwrap(), 0.0);
            }
        }
    }

    #[test]
    fn test_reflect_mirrors_without_edge_cell() {
        let r = raster_from(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let out = kernel_features(&r, 3, EdgePolicy::Reflect, &[KernelFeature::Mean]).unwrap();
        let (_, mean) = &out[0];
        // Window at (0,0) over the mirrored matrix sums to 27
        assert_relative_eq!(mean.get(0, 0).unwrap(), 3.0);
    }

    #[test]
    fn test_window_larger_than_raster() {
        let r = uniform(3, 3, 1.0);
        let err = kernel_features(&r, 5, EdgePolicy::Crop, &[KernelFeature::Mean]).unwrap_err();
        assert!(matches!(err, Error::WindowLargerThanRaster { .. }));

        // Reflect pad 2 needs 3 rows of real data; a 2-row raster cannot do it
        let r = uniform(2, 5, 1.0);
        let err = kernel_features(&r, 5, EdgePolicy::Reflect, &[KernelFeature::Mean]).unwrap_err();
        assert!(matches!(err, Error::WindowLargerThanRaster { .. }));
    }

    #[test]
    fn test_nodata_excluded_from_statistics() {
        let mut r = uniform(3, 3, 6.0);
        r.set_nodata(Some(-999.0));
        r.set(1, 1, -999.0).unwrap();
        let out = kernel_features(
            &r,
            3,
            EdgePolicy::Crop,
            &[KernelFeature::Mean, KernelFeature::Var, KernelFeature::DiffMean],
        )
        .unwrap();
        let (_, mean) = &out[0];
        let (_, var) = &out[1];
        let (_, diff) = &out[2];
        // 8 valid neighbors of 6.0; the nodata center is excluded
        assert_relative_eq!(mean.get(0, 0).unwrap(), 6.0);
        assert_relative_eq!(var.get(0, 0).unwrap(), 0.0);
        // diffmean needs a valid center
        assert!(diff.get(0, 0).unwrap() == -999.0);
    }

    #[test]
    fn test_diffmean_is_center_minus_mean() {
        let values: Vec<f64> = (0..9).map(|v| v as f64).collect();
        let r = raster_from(3, 3, &values);
        let out = kernel_features(&r, 3, EdgePolicy::Crop, &[KernelFeature::DiffMean]).unwrap();
        let (_, diff) = &out[0];
        // Center 4.0, mean of 0..=8 is 4.0
        assert_relative_eq!(diff.get(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_var_matches_sample_variance() {
        let values: Vec<f64> = (0..9).map(|v| v as f64).collect();
        let r = raster_from(3, 3, &values);
        let out = kernel_features(&r, 3, EdgePolicy::Crop, &[KernelFeature::Var]).unwrap();
        let (_, var) = &out[0];
        // Sample variance of 0..=8 is 7.5
        assert_relative_eq!(var.get(0, 0).unwrap(), 7.5, epsilon = 1e-9);
    }

    #[test]
    fn test_all_nodata_neighborhood_is_nodata() {
        let mut r = uniform(3, 3, -999.0);
        r.set_nodata(Some(-999.0));
        let out = kernel_features(&r, 3, EdgePolicy::Crop, &[KernelFeature::Mean]).unwrap();
        let (_, mean) = &out[0];
        assert!(mean.is_nodata(mean.get(0, 0).unwrap()));
    }

    #[test]
    fn test_rolling_matches_naive_on_gradient() {
        // 6x6 gradient with some nodata holes; compare the rolling pass
        // against a direct per-cell computation
        let mut r = raster_from(
            6,
            6,
            &(0..36).map(|v| (v * 7 % 11) as f64).collect::<Vec<_>>(),
        );
        r.set_nodata(Some(-999.0));
        r.set(2, 3, -999.0).unwrap();
        r.set(4, 1, -999.0).unwrap();

        let out = kernel_features(&r, 3, EdgePolicy::Crop, &[KernelFeature::Mean]).unwrap();
        let (_, mean) = &out[0];

        for out_row in 0..4 {
            for out_col in 0..4 {
                let mut sum = 0.0;
                let mut cnt = 0;
                for dr in 0..3 {
                    for dc in 0..3 {
                        let v = r.get(out_row + dr, out_col + dc).unwrap();
                        if v != -999.0 {
                            sum += v;
                            cnt += 1;
                        }
                    }
                }
                let expected = sum / cnt as f64;
                assert_relative_eq!(
                    mean.get(out_row, out_col).unwrap(),
                    expected,
                    epsilon = 1e-9
                );
            }
        }
    }
}
