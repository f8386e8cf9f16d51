//! Line and polygon primitives shared by the layout engines

use crate::types::{PlanError, PlanResult};
use geo::{
    Area, BooleanOps, BoundingRect, Centroid, Coord, EuclideanDistance, Intersects, Line, LineString,
    MultiPolygon, Polygon,
};

/// Stand-in for a zero run when a slope would be infinite
pub const NEAR_ZERO: f64 = 1e-18;

/// Supporting lines and extents of a polygon's bounding box at a given angle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedBounds {
    /// Slope of the sides parallel to the flight direction
    pub a_parallel: f64,
    /// Intercept of the parallel side strips start from
    pub b_parallel: f64,
    /// Slope of the sides perpendicular to the flight direction
    pub a_perpendicular: f64,
    /// Intercept of the perpendicular side photos start from
    pub b_perpendicular: f64,
    /// Span along the flight direction
    pub dx: f64,
    /// Span across the flight direction
    pub dy: f64,
}

/// Intersection of `y = a1·x + b1` and `y = a2·x + b2`
pub fn intersect(a1: f64, b1: f64, a2: f64, b2: f64) -> PlanResult<(f64, f64)> {
    if a1 == a2 {
        return Err(PlanError::DegenerateGeometry(format!(
            "parallel lines (slope {}) have no intersection",
            a1
        )));
    }
    let x = (b2 - b1) / (a1 - a2);
    let y = (b1 * a2 - b2 * a1) / (a2 - a1);
    Ok((x, y))
}

/// Slope and intercept of the line through (xa, ya) and (xb, yb)
///
/// Vertical lines get a huge finite slope instead of failing.
pub fn line_through(ya: f64, yb: f64, xa: f64, xb: f64) -> (f64, f64) {
    let dy = ya - yb;
    let dx = xa - xb;
    let a = if dx != 0.0 { dy / dx } else { dy / NEAR_ZERO };
    (a, ya - a * xa)
}

/// Bounding box of `polygon` whose sides run at `angle_deg` (counter-clockwise from east)
pub fn rotated_bounding_box(angle_deg: f64, polygon: &Polygon<f64>) -> PlanResult<RotatedBounds> {
    let vertices = &polygon.exterior().0;
    if vertices.len() < 3 || polygon.unsigned_area() <= 0.0 {
        return Err(PlanError::InvalidFlightParameters(
            "area polygon has zero area".to_string(),
        ));
    }

    if angle_deg == 90.0 || angle_deg == 270.0 {
        let rect = polygon.bounding_rect().ok_or_else(|| {
            PlanError::InvalidFlightParameters("area polygon is empty".to_string())
        })?;
        let (min, max) = (rect.min(), rect.max());
        let ((a_parallel, b_parallel), (a_perpendicular, b_perpendicular)) = if angle_deg == 270.0 {
            (
                line_through(max.y, min.y, max.x, max.x),
                line_through(max.y, max.y, min.x, max.x),
            )
        } else {
            (
                line_through(max.y, min.y, min.x, min.x),
                line_through(min.y, min.y, min.x, max.x),
            )
        };
        return Ok(RotatedBounds {
            a_parallel,
            b_parallel,
            a_perpendicular,
            b_perpendicular,
            dx: max.y - min.y,
            dy: max.x - min.x,
        });
    }

    let a_parallel = angle_deg.to_radians().tan();
    let a_perpendicular = if a_parallel != 0.0 {
        -1.0 / a_parallel
    } else {
        -1.0 / NEAR_ZERO
    };

    let centroid = polygon.centroid().ok_or_else(|| {
        PlanError::InvalidFlightParameters("area polygon has no centroid".to_string())
    })?;
    let (xc, yc) = (centroid.x(), centroid.y());

    let (b1_par, b2_par) = extreme_intercepts(vertices, a_parallel, yc - a_parallel * xc);
    let (b1_perp, b2_perp) =
        extreme_intercepts(vertices, a_perpendicular, yc - a_perpendicular * xc);

    let dy = (b1_par - b2_par).abs() / a_parallel.hypot(1.0);
    let dx = (b1_perp - b2_perp).abs() / a_perpendicular.hypot(1.0);

    let b_parallel = if angle_deg > 90.0 && angle_deg < 270.0 {
        b1_par.min(b2_par)
    } else {
        b1_par.max(b2_par)
    };
    let b_perpendicular = if (0.0..=180.0).contains(&angle_deg) {
        b1_perp.min(b2_perp)
    } else {
        b1_perp.max(b2_perp)
    };

    Ok(RotatedBounds {
        a_parallel,
        b_parallel,
        a_perpendicular,
        b_perpendicular,
        dx,
        dy,
    })
}

/// Intercepts of lines with slope `a` through the vertices farthest on either side
/// of `y = a·x + b`
fn extreme_intercepts(vertices: &[Coord<f64>], a: f64, b: f64) -> (f64, f64) {
    let norm = a.hypot(1.0);
    let mut max = (f64::NEG_INFINITY, vertices[0]);
    let mut min = (f64::INFINITY, vertices[0]);
    for v in vertices {
        let d = (a * v.x - v.y + b) / norm;
        if d > max.0 {
            max = (d, *v);
        }
        if d < min.0 {
            min = (d, *v);
        }
    }
    (max.1.y - a * max.1.x, min.1.y - a * min.1.x)
}

/// Signed distance of (x, y) from `y = a·x + b`, positive below the line
pub fn signed_distance(a: f64, b: f64, x: f64, y: f64) -> f64 {
    (a * x - y + b) / a.hypot(1.0)
}

/// Closed polygon through the given corners
pub fn polygon_from_points(points: &[(f64, f64)]) -> Polygon<f64> {
    Polygon::new(LineString::from(points.to_vec()), vec![])
}

/// Point `distance` away from (x, y) at `angle` radians
pub fn polar_offset(x: f64, y: f64, angle: f64, distance: f64) -> (f64, f64) {
    (x + angle.cos() * distance, y + angle.sin() * distance)
}

/// Clip `subject` to `clip`
pub fn clip_polygon(subject: &Polygon<f64>, clip: &Polygon<f64>) -> MultiPolygon<f64> {
    subject.intersection(clip)
}

/// Shortest distance between a segment and an area; zero when they touch
pub fn segment_to_area_distance(segment: &Line<f64>, area: &MultiPolygon<f64>) -> f64 {
    let mut best = f64::INFINITY;
    for polygon in area.iter() {
        if polygon.intersects(segment) {
            return 0.0;
        }
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors().iter());
        for ring in rings {
            for edge in ring.lines() {
                best = best.min(segment.euclidean_distance(&edge));
            }
        }
    }
    best
}

/// Horizontal distance between two points
pub fn distance2d(a: (f64, f64), b: (f64, f64)) -> f64 {
    (b.0 - a.0).hypot(b.1 - a.1)
}
