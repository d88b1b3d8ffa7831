//! Rectangle clipping of polygons
//!
//! Sutherland-Hodgman against the four edges of a Bbox. Each ring is
//! clipped independently; a convex clip region keeps rings valid.

use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use terraclass_core::Bbox;

/// Edge of the clipping rectangle
#[derive(Debug, Clone, Copy)]
enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    fn is_inside(&self, p: &Coord<f64>, rect: &Bbox) -> bool {
        match self {
            Edge::Left => p.x >= rect.xmin,
            Edge::Right => p.x <= rect.xmax,
            Edge::Bottom => p.y >= rect.ymin,
            Edge::Top => p.y <= rect.ymax,
        }
    }

    fn intersect(&self, p: &Coord<f64>, q: &Coord<f64>, rect: &Bbox) -> Coord<f64> {
        let dx = q.x - p.x;
        let dy = q.y - p.y;
        match self {
            Edge::Left => {
                let t = (rect.xmin - p.x) / dx;
                Coord {
                    x: rect.xmin,
                    y: p.y + t * dy,
                }
            }
            Edge::Right => {
                let t = (rect.xmax - p.x) / dx;
                Coord {
                    x: rect.xmax,
                    y: p.y + t * dy,
                }
            }
            Edge::Bottom => {
                let t = (rect.ymin - p.y) / dy;
                Coord {
                    x: p.x + t * dx,
                    y: rect.ymin,
                }
            }
            Edge::Top => {
                let t = (rect.ymax - p.y) / dy;
                Coord {
                    x: p.x + t * dx,
                    y: rect.ymax,
                }
            }
        }
    }
}

/// One Sutherland-Hodgman pass of a ring against a single edge
fn clip_ring_edge(vertices: &[Coord<f64>], edge: Edge, rect: &Bbox) -> Vec<Coord<f64>> {
    if vertices.is_empty() {
        return Vec::new();
    }

    let mut output = Vec::new();
    let n = vertices.len();

    for i in 0..n {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % n];

        match (edge.is_inside(current, rect), edge.is_inside(next, rect)) {
            (true, true) => output.push(*next),
            (true, false) => output.push(edge.intersect(current, next, rect)),
            (false, true) => {
                output.push(edge.intersect(current, next, rect));
                output.push(*next);
            }
            (false, false) => {}
        }
    }

    output
}

fn clip_ring(ring: &LineString<f64>, rect: &Bbox) -> Option<LineString<f64>> {
    let mut vertices: Vec<Coord<f64>> = ring.0.to_vec();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    for edge in [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top] {
        vertices = clip_ring_edge(&vertices, edge, rect);
        if vertices.is_empty() {
            return None;
        }
    }
    if vertices.len() < 3 {
        return None;
    }

    vertices.push(vertices[0]);
    Some(LineString::new(vertices))
}

/// Clip a polygon to a Bbox, or `None` when it lies completely outside.
pub fn clip_polygon(polygon: &Polygon<f64>, rect: &Bbox) -> Option<Polygon<f64>> {
    let exterior = clip_ring(polygon.exterior(), rect)?;
    let interiors = polygon
        .interiors()
        .iter()
        .filter_map(|ring| clip_ring(ring, rect))
        .collect();
    Some(Polygon::new(exterior, interiors))
}

/// Clip every part of a multipolygon; `None` when nothing remains.
pub fn clip_multi_polygon(multi: &MultiPolygon<f64>, rect: &Bbox) -> Option<MultiPolygon<f64>> {
    let parts: Vec<Polygon<f64>> = multi
        .0
        .iter()
        .filter_map(|p| clip_polygon(p, rect))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(MultiPolygon(parts))
    }
}
