//! GeoJSON feature I/O
//!
//! Polygon and MultiPolygon geometries only; that is what zonal counting
//! consumes. Attributes map to [`AttributeValue`] and survive a write/read
//! round trip unchanged.

use super::{AttributeValue, Feature, FeatureCollection};
use crate::error::{Error, Result};
use geo_types::{Geometry, LineString, MultiPolygon, Polygon};
use log::debug;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Supported vector output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    GeoJson,
}

/// Read a feature collection from a GeoJSON file.
pub fn read_features(path: impl AsRef<Path>) -> Result<FeatureCollection> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let root: Value = serde_json::from_str(&text).map_err(|e| Error::read(path, e))?;

    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::read(path, "not a GeoJSON FeatureCollection"))?;

    let mut collection = FeatureCollection::new();
    for feature in features {
        collection.push(parse_feature(feature, path)?);
    }
    debug!("read {} features from '{}'", collection.len(), path.display());
    Ok(collection)
}

/// Write a feature collection to a file in the requested format.
pub fn write_features(
    path: impl AsRef<Path>,
    format: VectorFormat,
    collection: &FeatureCollection,
) -> Result<()> {
    let path = path.as_ref();
    match format {
        VectorFormat::GeoJson => {
            let features: Vec<Value> = collection.iter().map(feature_to_json).collect();
            let root = json!({
                "type": "FeatureCollection",
                "features": features,
            });
            let text =
                serde_json::to_string_pretty(&root).map_err(|e| Error::write(path, e))?;
            fs::write(path, text).map_err(|e| Error::write(path, e))?;
            debug!("wrote {} features to '{}'", collection.len(), path.display());
            Ok(())
        }
    }
}

fn parse_feature(value: &Value, path: &Path) -> Result<Feature> {
    let geometry = match value.get("geometry") {
        Some(Value::Null) | None => None,
        Some(geom) => Some(parse_geometry(geom, path)?),
    };

    let mut properties = HashMap::new();
    if let Some(props) = value.get("properties").and_then(Value::as_object) {
        for (key, val) in props {
            properties.insert(key.clone(), json_to_attribute(val));
        }
    }

    let id = match value.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(Feature {
        geometry,
        properties,
        id,
    })
}

fn parse_geometry(value: &Value, path: &Path) -> Result<Geometry<f64>> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::read(path, "geometry without type"))?;
    let coords = value
        .get("coordinates")
        .ok_or_else(|| Error::read(path, "geometry without coordinates"))?;

    match kind {
        "Polygon" => Ok(Geometry::Polygon(parse_polygon(coords, path)?)),
        "MultiPolygon" => {
            let parts = coords
                .as_array()
                .ok_or_else(|| Error::read(path, "malformed MultiPolygon"))?;
            let polygons = parts
                .iter()
                .map(|p| parse_polygon(p, path))
                .collect::<Result<Vec<_>>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
        }
        other => Err(Error::read(
            path,
            format!("unsupported geometry type '{}'", other),
        )),
    }
}

fn parse_polygon(coords: &Value, path: &Path) -> Result<Polygon<f64>> {
    let rings = coords
        .as_array()
        .ok_or_else(|| Error::read(path, "malformed Polygon"))?;
    let mut parsed: Vec<LineString<f64>> = Vec::with_capacity(rings.len());
    for ring in rings {
        let positions = ring
            .as_array()
            .ok_or_else(|| Error::read(path, "malformed ring"))?;
        let mut line: Vec<(f64, f64)> = Vec::with_capacity(positions.len());
        for pos in positions {
            let pair = pos
                .as_array()
                .filter(|p| p.len() >= 2)
                .ok_or_else(|| Error::read(path, "malformed position"))?;
            let x = pair[0]
                .as_f64()
                .ok_or_else(|| Error::read(path, "non-numeric coordinate"))?;
            let y = pair[1]
                .as_f64()
                .ok_or_else(|| Error::read(path, "non-numeric coordinate"))?;
            line.push((x, y));
        }
        parsed.push(LineString::from(line));
    }
    if parsed.is_empty() {
        return Err(Error::read(path, "polygon without rings"));
    }
    let exterior = parsed.remove(0);
    Ok(Polygon::new(exterior, parsed))
}

fn json_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttributeValue::Int(i)
            } else {
                AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => AttributeValue::String(s.clone()),
        other => AttributeValue::String(other.to_string()),
    }
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => json!(b),
        AttributeValue::Int(i) => json!(i),
        AttributeValue::Float(f) => json!(f),
        AttributeValue::String(s) => json!(s),
    }
}

fn feature_to_json(feature: &Feature) -> Value {
    let geometry = match &feature.geometry {
        Some(Geometry::Polygon(p)) => polygon_to_json(p),
        Some(Geometry::MultiPolygon(mp)) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(polygon_rings).collect::<Vec<_>>(),
        }),
        _ => Value::Null,
    };

    let mut properties = Map::new();
    let mut keys: Vec<&String> = feature.properties.keys().collect();
    keys.sort();
    for key in keys {
        properties.insert(key.clone(), attribute_to_json(&feature.properties[key]));
    }

    let mut out = Map::new();
    out.insert("type".into(), json!("Feature"));
    if let Some(id) = &feature.id {
        out.insert("id".into(), json!(id));
    }
    out.insert("geometry".into(), geometry);
    out.insert("properties".into(), Value::Object(properties));
    Value::Object(out)
}

fn polygon_rings(polygon: &Polygon<f64>) -> Value {
    let ring_to_json = |ring: &LineString<f64>| -> Value {
        Value::Array(
            ring.coords()
                .map(|c| json!([c.x, c.y]))
                .collect::<Vec<_>>(),
        )
    };
    let mut rings = vec![ring_to_json(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_to_json));
    Value::Array(rings)
}

fn polygon_to_json(polygon: &Polygon<f64>) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": polygon_rings(polygon),
    })
}
