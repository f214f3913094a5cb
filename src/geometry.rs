//! Point-in-polygon classification.
//!
//! The containment convention is strict interior: points on a ring edge or
//! vertex are never contained. The `geo` crate's own `Contains` is not used
//! so that the boundary rule and the edge-crossing convention stay pinned
//! here rather than to a library default.

use geo::{Coord, LineString, MultiPolygon, Polygon};

/// True if `point` lies strictly inside any member polygon.
pub fn multi_polygon_contains(multi: &MultiPolygon<f64>, point: Coord<f64>) -> bool {
    multi.0.iter().any(|polygon| polygon_contains(polygon, point))
}

/// True if `point` lies strictly inside the outer ring and strictly outside
/// every hole. A point on a hole's edge sits on the polygon's boundary, so it
/// is excluded like any other boundary point.
pub fn polygon_contains(polygon: &Polygon<f64>, point: Coord<f64>) -> bool {
    if on_ring(polygon.exterior(), point) || !within_ring(polygon.exterior(), point) {
        return false;
    }
    for hole in polygon.interiors() {
        if on_ring(hole, point) || within_ring(hole, point) {
            return false;
        }
    }
    true
}

/// Crossing-number test: cast a ray from `point` toward +x and count edge
/// crossings; odd means inside. The half-open comparison `(a.y > y) != (b.y > y)`
/// counts each crossing through a shared vertex exactly once and skips
/// horizontal edges outright. Boundary points are resolved by `on_ring`
/// before this runs, never here.
fn within_ring(ring: &LineString<f64>, point: Coord<f64>) -> bool {
    let coords = &ring.0;
    if distinct_vertices(coords) < 3 {
        // Degenerate ring: encloses no area, contains nothing.
        return false;
    }

    let mut inside = false;
    let n = coords.len();
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        if (a.y > point.y) != (b.y > point.y) {
            let cross_x = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if point.x < cross_x {
                inside = !inside;
            }
        }
    }
    inside
}

/// True if `point` lies exactly on one of the ring's edges or vertices.
/// Exact f64 arithmetic: interchange coordinates compare bit-for-bit, which
/// is what makes the boundary classification deterministic.
fn on_ring(ring: &LineString<f64>, point: Coord<f64>) -> bool {
    let coords = &ring.0;
    let n = coords.len();
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        if on_segment(a, b, point) {
            return true;
        }
    }
    false
}

fn on_segment(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross != 0.0 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn distinct_vertices(coords: &[Coord<f64>]) -> usize {
    let mut seen: Vec<Coord<f64>> = Vec::new();
    for c in coords {
        if !seen.contains(c) {
            seen.push(*c);
        }
    }
    seen.len()
}
