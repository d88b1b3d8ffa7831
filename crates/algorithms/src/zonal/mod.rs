//! Zonal class counting
//!
//! For each polygon feature, counts the classified raster cells whose
//! center lies inside the polygon, one attribute per class code plus a
//! total. Cell membership is a point-in-polygon test on cell centers, not
//! area overlap, so every cell is attributed to at most one polygon of a
//! non-overlapping coverage.

mod clip;

pub use clip::{clip_multi_polygon, clip_polygon};

use crate::maybe_rayon::*;
use geo::{BoundingRect, Contains};
use geo_types::{Geometry, MultiPolygon, Point};
use log::debug;
use terraclass_core::geometry::{Bbox, Window};
use terraclass_core::raster::Raster;
use terraclass_core::vector::{AttributeValue, Feature, FeatureCollection};
use terraclass_core::{Error, Result};

/// Parameters for zonal class counting.
#[derive(Debug, Clone)]
pub struct ClassCounter {
    /// Inclusive class code range reported as individual attributes
    pub class_range: (u8, u8),
    /// Clip polygons to the raster extent before testing. With clipping, a
    /// polygon entirely outside the raster yields all-zero counts instead
    /// of an error.
    pub clip: bool,
}

impl ClassCounter {
    pub fn new(class_min: u8, class_max: u8) -> Self {
        Self {
            class_range: (class_min, class_max),
            clip: false,
        }
    }

    pub fn with_clip(mut self, clip: bool) -> Self {
        self.clip = clip;
        self
    }

    /// Count classes per feature and return a new collection carrying the
    /// original attributes plus `class_<n>` counts and `total_count`.
    pub fn count(
        &self,
        raster: &Raster<u8>,
        features: &FeatureCollection,
    ) -> Result<FeatureCollection> {
        let indices: Vec<usize> = (0..features.len()).collect();
        let counted: Vec<Feature> = indices
            .into_par_iter()
            .map(|i| self.count_feature(raster, &features.features[i]))
            .collect::<Result<Vec<_>>>()?;
        debug!("counted classes for {} features", counted.len());
        Ok(counted.into_iter().collect())
    }

    fn count_feature(&self, raster: &Raster<u8>, feature: &Feature) -> Result<Feature> {
        let (class_min, class_max) = self.class_range;
        let size = (class_max - class_min) as usize + 1;

        let polygons = match &feature.geometry {
            None => return Ok(self.attach_counts(feature, &vec![0; size], 0)),
            Some(Geometry::Polygon(p)) => MultiPolygon(vec![p.clone()]),
            Some(Geometry::MultiPolygon(mp)) => mp.clone(),
            Some(_) => {
                return Err(Error::Other(
                    "zonal counting requires polygon geometries".to_string(),
                ))
            }
        };

        let raster_bbox = raster.bbox();
        let test_geom = if self.clip {
            match clip_multi_polygon(&polygons, &raster_bbox) {
                Some(clipped) => clipped,
                // Clip produced empty-but-valid output
                None => return Ok(self.attach_counts(feature, &vec![0; size], 0)),
            }
        } else {
            let rect = polygons
                .bounding_rect()
                .ok_or_else(|| Error::Other("feature geometry has no extent".to_string()))?;
            let geom_bbox = Bbox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
                .map_err(|_| Error::NoOverlap)?;
            if !geom_bbox.intersects(&raster_bbox) {
                return Err(Error::NoOverlap);
            }
            polygons
        };

        let mut counts = vec![0u64; size];
        let mut total = 0u64;

        if let Some(rect) = test_geom.bounding_rect() {
            let geom_bbox =
                Bbox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y).ok();
            let bounds = geom_bbox.and_then(|b| b.intersection(&raster_bbox));
            if let Some(bounds) = bounds {
                let window = raster.transform().bbox_to_window(&bounds);
                let full = Window::new(0, 0, raster.cols(), raster.rows());
                if let Some(window) = window.intersect(&full) {
                    self.count_window(raster, &test_geom, &window, &mut counts, &mut total);
                }
            }
        }

        Ok(self.attach_counts(feature, &counts, total))
    }

    fn count_window(
        &self,
        raster: &Raster<u8>,
        geometry: &MultiPolygon<f64>,
        window: &Window,
        counts: &mut [u64],
        total: &mut u64,
    ) {
        let (class_min, class_max) = self.class_range;
        let row0 = window.row as usize;
        let col0 = window.col as usize;

        for row in row0..row0 + window.rows {
            for col in col0..col0 + window.cols {
                let (x, y) = raster.cell_center(row, col);
                if !geometry.contains(&Point::new(x, y)) {
                    continue;
                }
                let value = unsafe { raster.get_unchecked(row, col) };
                if raster.is_nodata(value) {
                    continue;
                }
                if value < class_min || value > class_max {
                    continue;
                }
                counts[(value - class_min) as usize] += 1;
                *total += 1;
            }
        }
    }

    fn attach_counts(&self, feature: &Feature, counts: &[u64], total: u64) -> Feature {
        let (class_min, _) = self.class_range;
        let mut out = feature.clone();
        for (offset, &count) in counts.iter().enumerate() {
            let class_id = class_min as usize + offset;
            out.set_property(
                format!("class_{}", class_id),
                AttributeValue::Int(count as i64),
            );
        }
        out.set_property("total_count", AttributeValue::Int(total as i64));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, Polygon};
    use terraclass_core::raster::GeoTransform;

    /// 4x4 raster over (0,0)-(4,4): class 1 in the left half, class 2 in
    /// the right half, one nodata cell at (0,0).
    fn class_raster() -> Raster<u8> {
        let mut r: Raster<u8> = Raster::new(4, 4);
        r.set_transform(GeoTransform::north_up(0.0, 4.0, 1.0));
        r.set_nodata(Some(255));
        for row in 0..4 {
            for col in 0..4 {
                r.set(row, col, if col < 2 { 1 } else { 2 }).unwrap();
            }
        }
        r.set(0, 0, 255).unwrap();
        r
    }

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ]),
            vec![],
        )
    }

    fn int_property(feature: &Feature, key: &str) -> i64 {
        match feature.get_property(key) {
            Some(AttributeValue::Int(v)) => *v,
            other => panic!("expected Int for {}, got {:?}", key, other),
        }
    }

    #[test]
    fn test_counts_and_total() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        // Covers the whole raster
        features.push(Feature::new(Geometry::Polygon(square(0.0, 0.0, 4.0))));

        let counter = ClassCounter::new(1, 2);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];

        // 8 left cells minus 1 nodata, 8 right cells
        assert_eq!(int_property(f, "class_1"), 7);
        assert_eq!(int_property(f, "class_2"), 8);
        assert_eq!(int_property(f, "total_count"), 15);
    }

    #[test]
    fn test_total_is_sum_of_class_counts() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        features.push(Feature::new(Geometry::Polygon(square(0.5, 0.5, 3.0))));

        let counter = ClassCounter::new(1, 2);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        let sum = int_property(f, "class_1") + int_property(f, "class_2");
        assert_eq!(int_property(f, "total_count"), sum);
    }

    #[test]
    fn test_center_point_membership() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        // Covers only the center of cell (3, 0): centers are at *.5
        features.push(Feature::new(Geometry::Polygon(square(0.25, 0.25, 0.5))));

        let counter = ClassCounter::new(1, 2);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        assert_eq!(int_property(f, "class_1"), 1);
        assert_eq!(int_property(f, "class_2"), 0);
        assert_eq!(int_property(f, "total_count"), 1);
    }

    #[test]
    fn test_out_of_range_classes_excluded() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        features.push(Feature::new(Geometry::Polygon(square(0.0, 0.0, 4.0))));

        // Only class 2 is in range; class 1 cells do not count at all
        let counter = ClassCounter::new(2, 2);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        assert_eq!(int_property(f, "class_2"), 8);
        assert_eq!(int_property(f, "total_count"), 8);
        assert!(f.get_property("class_1").is_none());
    }

    #[test]
    fn test_disjoint_without_clip_fails() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        features.push(Feature::new(Geometry::Polygon(square(10.0, 10.0, 2.0))));

        let counter = ClassCounter::new(1, 2);
        let err = counter.count(&raster, &features).unwrap_err();
        assert!(matches!(err, Error::NoOverlap));
    }

    #[test]
    fn test_disjoint_with_clip_yields_zeros() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        features.push(Feature::new(Geometry::Polygon(square(10.0, 10.0, 2.0))));

        let counter = ClassCounter::new(1, 2).with_clip(true);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        assert_eq!(int_property(f, "class_1"), 0);
        assert_eq!(int_property(f, "class_2"), 0);
        assert_eq!(int_property(f, "total_count"), 0);
    }

    #[test]
    fn test_clip_restricts_to_raster_extent() {
        let raster = class_raster();
        let mut features = FeatureCollection::new();
        // Straddles the right edge of the raster
        features.push(Feature::new(Geometry::Polygon(square(2.0, 0.0, 10.0))));

        let counter = ClassCounter::new(1, 2).with_clip(true);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        assert_eq!(int_property(f, "class_2"), 8);
        assert_eq!(int_property(f, "class_1"), 0);
    }

    #[test]
    fn test_existing_attributes_preserved() {
        let raster = class_raster();
        let mut feature = Feature::new(Geometry::Polygon(square(0.0, 0.0, 4.0)));
        feature.set_property("name", AttributeValue::String("block-7".into()));
        let mut features = FeatureCollection::new();
        features.push(feature);

        let counter = ClassCounter::new(1, 2);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        assert_eq!(
            f.get_property("name"),
            Some(&AttributeValue::String("block-7".into()))
        );
        // Input collection is untouched
        assert!(features.features[0].get_property("total_count").is_none());
    }

    #[test]
    fn test_multipolygon_counts_all_parts() {
        let raster = class_raster();
        let mp = MultiPolygon(vec![square(0.25, 0.25, 0.5), square(3.25, 3.25, 0.5)]);
        let mut features = FeatureCollection::new();
        features.push(Feature::new(Geometry::MultiPolygon(mp)));

        let counter = ClassCounter::new(1, 2);
        let out = counter.count(&raster, &features).unwrap();
        let f = &out.features[0];
        assert_eq!(int_property(f, "class_1"), 1);
        assert_eq!(int_property(f, "class_2"), 1);
        assert_eq!(int_property(f, "total_count"), 2);
    }
}
