//! Flying-height policies applied to laid-out stations

use crate::core::corridor::CorridorSegment;
use crate::core::geometry::{clip_polygon, distance2d, polygon_from_points};
use crate::core::job::{JobControl, StageProgress};
use crate::io::dem::TerrainSampler;
use crate::types::{AltitudeMode, PhotoFootprint, PlanError, PlanResult, Station, StationKey, Waypoint};
use geo::{
    Area, BoundingRect, Coord, EuclideanDistance, Line, LineString, MultiPolygon, Point, Polygon,
};
use std::collections::HashMap;
use std::ops::Range;

/// Slack when testing whether a station lies between two waypoints
const BBOX_EPSILON: f64 = 1e-6;

/// One vertex of a terrain or flight profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ProfilePoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Height of the 3D segment `start`..`end` above (x, y)
///
/// The segment is parametrised along whichever of x or y spans more.
pub fn z_at_3d_line(point: (f64, f64), start: &ProfilePoint, end: &ProfilePoint) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let t = if dx.abs() >= dy.abs() && dx != 0.0 {
        (point.0 - start.x) / dx
    } else if dy != 0.0 {
        (point.1 - start.y) / dy
    } else {
        0.0
    };
    start.z + t * (end.z - start.z)
}

/// Douglas–Peucker on vertical deviation
///
/// Interior points are kept when their height differs from the chord by at
/// least `tolerance`. Endpoints are always kept.
pub fn simplify_profile(profile: &[ProfilePoint], tolerance: f64) -> Vec<ProfilePoint> {
    if profile.len() <= 2 {
        return profile.to_vec();
    }
    let first = profile[0];
    let last = profile[profile.len() - 1];

    let mut split = 0;
    let mut deviation = f64::NEG_INFINITY;
    for (i, p) in profile.iter().enumerate().take(profile.len() - 1).skip(1) {
        let d = (p.z - z_at_3d_line(p.xy(), &first, &last)).abs();
        if d > deviation {
            deviation = d;
            split = i;
        }
    }

    if deviation >= tolerance {
        let mut left = simplify_profile(&profile[..=split], tolerance);
        let right = simplify_profile(&profile[split..], tolerance);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

/// Index ranges of consecutive stations sharing a strip number
///
/// Stations must be sorted by key.
pub fn strip_ranges(stations: &[Station]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=stations.len() {
        if i == stations.len() || stations[i].key.strip != stations[start].key.strip {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges
}

/// First and last station of every strip, numbered from 1
pub fn strip_waypoints(stations: &[Station]) -> Vec<Waypoint> {
    let mut waypoints = Vec::new();
    for range in strip_ranges(stations) {
        let mut ends = vec![range.start];
        if range.end - 1 > range.start {
            ends.push(range.end - 1);
        }
        for station in ends.into_iter().map(|i| &stations[i]) {
            waypoints.push(Waypoint {
                number: waypoints.len() as u32 + 1,
                x: station.x,
                y: station.y,
                altitude_asl: station.altitude_asl,
                altitude_agl: station.altitude_agl,
            });
        }
    }
    waypoints
}

/// Ordered 3D polyline through all waypoints
pub fn flight_line(waypoints: &[Waypoint]) -> Vec<[f64; 3]> {
    waypoints.iter().map(|w| [w.x, w.y, w.altitude_asl]).collect()
}

/// Geometry strips are clipped to before terrain statistics
#[derive(Debug, Clone, Copy)]
pub enum ClipArea<'a> {
    Block(&'a Polygon<f64>),
    Corridor(&'a [CorridorSegment]),
}

impl<'a> ClipArea<'a> {
    /// Polygon a station was planned over
    pub fn for_station(&self, station: &Station) -> Option<&'a Polygon<f64>> {
        match *self {
            ClipArea::Block(polygon) => Some(polygon),
            ClipArea::Corridor(segments) => station
                .segment
                .and_then(|id| segments.iter().find(|s| s.id == id))
                .map(|s| &s.buffer),
        }
    }

    pub fn polygons(&self) -> Vec<&'a Polygon<f64>> {
        match *self {
            ClipArea::Block(polygon) => vec![polygon],
            ClipArea::Corridor(segments) => segments.iter().map(|s| &s.buffer).collect(),
        }
    }
}

/// Terrain min/max over every polygon of the planning area
pub fn reference_heights(terrain: &TerrainSampler<'_>, clip: &ClipArea<'_>) -> PlanResult<(f64, f64)> {
    let mut range: Option<(f64, f64)> = None;
    for polygon in clip.polygons() {
        let (lo, hi) = terrain.zonal_min_max(polygon)?;
        range = Some(match range {
            Some((a, b)) => (a.min(lo), b.max(hi)),
            None => (lo, hi),
        });
    }
    range.ok_or_else(|| PlanError::MissingInput("planning area has no polygon".to_string()))
}

/// Assigns ASL/AGL to stations and produces the mission waypoints
pub trait AltitudePolicy {
    fn mode(&self) -> AltitudeMode;

    /// `stations` must be sorted by key; progress ticks once per strip
    fn assign(
        &self,
        stations: &mut [Station],
        footprints: &[PhotoFootprint],
        control: &JobControl,
        progress: &StageProgress<'_>,
    ) -> PlanResult<Vec<Waypoint>>;
}

/// One altitude ASL for the whole mission
pub struct SingleAltitude<'a> {
    pub agl: f64,
    /// Terrain (min, max) the altitude is referenced to
    pub ground: (f64, f64),
    pub terrain: Option<&'a TerrainSampler<'a>>,
}

impl SingleAltitude<'_> {
    pub fn altitude_asl(&self) -> f64 {
        self.agl + (self.ground.0 + self.ground.1) / 2.0
    }
}

impl AltitudePolicy for SingleAltitude<'_> {
    fn mode(&self) -> AltitudeMode {
        AltitudeMode::Single
    }

    fn assign(
        &self,
        stations: &mut [Station],
        _footprints: &[PhotoFootprint],
        control: &JobControl,
        progress: &StageProgress<'_>,
    ) -> PlanResult<Vec<Waypoint>> {
        let asl = self.altitude_asl();
        log::info!("Single altitude: {:.2} m ASL ({:.2} m AGL)", asl, self.agl);

        for range in strip_ranges(stations) {
            control.checkpoint()?;
            for station in &mut stations[range] {
                station.altitude_asl = asl;
                station.altitude_agl = Some(match self.terrain {
                    Some(terrain) => asl - terrain.height_at(station.x, station.y)?,
                    None => asl - (self.ground.0 + self.ground.1) / 2.0,
                });
            }
            progress.tick();
        }
        Ok(strip_waypoints(stations))
    }
}

/// One altitude ASL per strip, biased toward the strip's high terrain
pub struct SeparateStripAltitude<'a> {
    pub agl: f64,
    pub terrain: &'a TerrainSampler<'a>,
    pub clip: ClipArea<'a>,
}

/// ASL for a strip whose terrain spans `low..high`
pub fn strip_altitude(agl: f64, low: f64, high: f64) -> f64 {
    agl + high - (high - low) / 3.0
}

fn is_axis_aligned(kappa: f64) -> bool {
    let r = kappa.rem_euclid(90.0);
    r < 1e-9 || 90.0 - r < 1e-9
}

/// Quadrilateral spanned by the first and last photo of a strip
pub fn strip_polygon(first: &Polygon<f64>, last: &Polygon<f64>, kappa: f64) -> PlanResult<Polygon<f64>> {
    let points: Vec<Coord<f64>> = first
        .exterior()
        .coords()
        .chain(last.exterior().coords())
        .copied()
        .collect();
    if points.is_empty() {
        return Err(PlanError::DegenerateGeometry(
            "strip footprints have no vertices".to_string(),
        ));
    }

    if is_axis_aligned(kappa) {
        let rect = LineString::from(points).bounding_rect().ok_or_else(|| {
            PlanError::DegenerateGeometry("strip footprints have no extent".to_string())
        })?;
        return Ok(rect.to_polygon());
    }

    let pick = |better: fn(&Coord<f64>, &Coord<f64>) -> bool| {
        points
            .iter()
            .fold(points[0], |best, p| if better(p, &best) { *p } else { best })
    };
    let west = pick(|p, b| p.x < b.x);
    let south = pick(|p, b| p.y < b.y);
    let east = pick(|p, b| p.x > b.x);
    let north = pick(|p, b| p.y > b.y);
    Ok(polygon_from_points(&[
        west.x_y(),
        south.x_y(),
        east.x_y(),
        north.x_y(),
    ]))
}

impl AltitudePolicy for SeparateStripAltitude<'_> {
    fn mode(&self) -> AltitudeMode {
        AltitudeMode::SeparateStrips
    }

    fn assign(
        &self,
        stations: &mut [Station],
        footprints: &[PhotoFootprint],
        control: &JobControl,
        progress: &StageProgress<'_>,
    ) -> PlanResult<Vec<Waypoint>> {
        let by_key: HashMap<StationKey, &Polygon<f64>> =
            footprints.iter().map(|f| (f.key, &f.polygon)).collect();
        let footprint = |key: StationKey| {
            by_key.get(&key).copied().ok_or_else(|| {
                PlanError::MissingInput(format!("no photo footprint for station {}", key))
            })
        };

        for range in strip_ranges(stations) {
            control.checkpoint()?;
            let strip = &mut stations[range];
            let (first, last) = match (strip.first(), strip.last()) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            let strip_number = first.key.strip;
            let outline = strip_polygon(footprint(first.key)?, footprint(last.key)?, first.kappa)?;

            let clipped = match self.clip.for_station(first) {
                Some(area) => clip_polygon(&outline, area),
                None => MultiPolygon::new(vec![outline.clone()]),
            };
            let zones = if clipped.unsigned_area() > 0.0 {
                clipped.0
            } else {
                log::warn!(
                    "Strip {} does not intersect the planning area, using its full outline",
                    strip_number
                );
                vec![outline]
            };

            let mut range: Option<(f64, f64)> = None;
            for zone in &zones {
                let (lo, hi) = self.terrain.zonal_min_max(zone)?;
                range = Some(match range {
                    Some((a, b)) => (a.min(lo), b.max(hi)),
                    None => (lo, hi),
                });
            }
            let (low, high) = range.ok_or_else(|| {
                PlanError::DegenerateGeometry(format!("strip {} has no terrain zone", strip_number))
            })?;
            let asl = strip_altitude(self.agl, low, high);
            log::debug!(
                "Strip {}: terrain {:.1}..{:.1} m, altitude {:.2} m ASL",
                strip_number,
                low,
                high,
                asl
            );

            for station in strip.iter_mut() {
                station.altitude_asl = asl;
                station.altitude_agl = Some(asl - self.terrain.height_at(station.x, station.y)?);
            }
            progress.tick();
        }
        Ok(strip_waypoints(stations))
    }
}

/// Waypoints follow the simplified terrain profile of each strip
pub struct TerrainFollowing<'a> {
    pub agl: f64,
    /// Vertical tolerance of profile simplification (m)
    pub tolerance: f64,
    pub terrain: &'a TerrainSampler<'a>,
}

impl TerrainFollowing<'_> {
    /// Terrain profile between two planning-CRS points, one sample per pixel crossed
    pub fn terrain_profile(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        pixel: (f64, f64),
    ) -> PlanResult<Vec<ProfilePoint>> {
        let (pix_w, pix_h) = pixel;
        let length = distance2d(start, end);
        if length == 0.0 {
            let z = self.terrain.height_at(start.0, start.1)?;
            return Ok(vec![ProfilePoint::new(start.0, start.1, z)]);
        }

        let dx = end.0 - start.0;
        let dy = end.1 - start.1;
        let direction = if dx == 0.0 {
            90.0
        } else {
            (dy / dx).atan().to_degrees().abs()
        };
        let diagonal = (pix_h / pix_w).atan().to_degrees();
        let step = if direction < diagonal {
            pix_w / direction.to_radians().cos()
        } else {
            pix_h / direction.to_radians().sin()
        };

        let count = ((length / step).ceil() as usize).max(2);
        (0..count)
            .map(|i| {
                let t = i as f64 / (count - 1) as f64;
                let (x, y) = (start.0 + t * dx, start.1 + t * dy);
                Ok(ProfilePoint::new(x, y, self.terrain.height_at(x, y)?))
            })
            .collect()
    }
}

/// Flight altitude at (x, y) from the waypoint segment whose extent contains it
fn altitude_between_waypoints(nodes: &[ProfilePoint], x: f64, y: f64) -> f64 {
    if nodes.len() == 1 {
        return nodes[0].z;
    }
    let inside = |a: &ProfilePoint, b: &ProfilePoint| {
        a.x.min(b.x) - BBOX_EPSILON <= x
            && x <= a.x.max(b.x) + BBOX_EPSILON
            && a.y.min(b.y) - BBOX_EPSILON <= y
            && y <= a.y.max(b.y) + BBOX_EPSILON
    };
    if let Some(pair) = nodes.windows(2).find(|w| inside(&w[0], &w[1])) {
        return z_at_3d_line((x, y), &pair[0], &pair[1]);
    }

    let point = Point::new(x, y);
    let nearest = nodes.windows(2).min_by(|a, b| {
        let da = point.euclidean_distance(&Line::new(a[0].xy(), a[1].xy()));
        let db = point.euclidean_distance(&Line::new(b[0].xy(), b[1].xy()));
        da.total_cmp(&db)
    });
    match nearest {
        Some(pair) => z_at_3d_line((x, y), &pair[0], &pair[1]),
        None => nodes[0].z,
    }
}

impl AltitudePolicy for TerrainFollowing<'_> {
    fn mode(&self) -> AltitudeMode {
        AltitudeMode::TerrainFollowing
    }

    fn assign(
        &self,
        stations: &mut [Station],
        _footprints: &[PhotoFootprint],
        control: &JobControl,
        progress: &StageProgress<'_>,
    ) -> PlanResult<Vec<Waypoint>> {
        let pixel = self.terrain.planning_pixel_size()?;
        let mut waypoints = Vec::new();

        for range in strip_ranges(stations) {
            control.checkpoint()?;
            let strip = &mut stations[range];
            let (start, end) = match (strip.first(), strip.last()) {
                (Some(a), Some(b)) => ((a.x, a.y), (b.x, b.y)),
                _ => continue,
            };

            let profile = self.terrain_profile(start, end, pixel)?;
            let nodes: Vec<ProfilePoint> = simplify_profile(&profile, self.tolerance)
                .into_iter()
                .map(|p| ProfilePoint::new(p.x, p.y, p.z + self.agl))
                .collect();
            log::debug!(
                "Strip {}: profile of {} samples simplified to {} waypoints",
                strip[0].key.strip,
                profile.len(),
                nodes.len()
            );

            for station in strip.iter_mut() {
                let ground = self.terrain.height_at(station.x, station.y)?;
                station.altitude_asl = altitude_between_waypoints(&nodes, station.x, station.y);
                station.altitude_agl = Some(station.altitude_asl - ground);
            }
            for node in &nodes {
                waypoints.push(Waypoint {
                    number: waypoints.len() as u32 + 1,
                    x: node.x,
                    y: node.y,
                    altitude_asl: node.z,
                    altitude_agl: Some(self.agl),
                });
            }
            progress.tick();
        }
        Ok(waypoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::dem::TerrainModel;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use geo::polygon;
    use ndarray::Array2;

    /// 100x100 cells of 10 m over (0..1000, 0..1000), elevation = 100 + col
    fn slope() -> TerrainModel {
        let elevation = Array2::from_shape_fn((100, 100), |(_, c)| 100.0 + c as f32);
        TerrainModel::new(elevation, GeoTransform::north_up(0.0, 1000.0, 10.0, -10.0), None, None)
    }

    fn flat(z: f32) -> TerrainModel {
        let elevation = Array2::from_elem((100, 100), z);
        TerrainModel::new(elevation, GeoTransform::north_up(0.0, 1000.0, 10.0, -10.0), None, None)
    }

    fn station(strip: u32, photo: u32, x: f64, y: f64) -> Station {
        Station {
            key: StationKey::new(strip, photo),
            x,
            y,
            altitude_asl: 0.0,
            altitude_agl: None,
            omega: 0.0,
            phi: 0.0,
            kappa: 0.0,
            segment: None,
        }
    }

    /// Two strips of five stations flying east at y = 700 and back west at y = 300
    fn two_strips() -> Vec<Station> {
        let mut stations = Vec::new();
        for i in 0..5 {
            stations.push(station(1, i + 1, 100.0 + 200.0 * i as f64, 700.0));
        }
        for i in 0..5 {
            let mut s = station(2, i + 6, 900.0 - 200.0 * i as f64, 300.0);
            s.kappa = 180.0;
            stations.push(s);
        }
        stations
    }

    fn footprints(stations: &[Station]) -> Vec<PhotoFootprint> {
        stations
            .iter()
            .map(|s| PhotoFootprint {
                key: s.key,
                polygon: polygon_from_points(&[
                    (s.x - 60.0, s.y - 40.0),
                    (s.x + 60.0, s.y - 40.0),
                    (s.x + 60.0, s.y + 40.0),
                    (s.x - 60.0, s.y + 40.0),
                ]),
            })
            .collect()
    }

    #[test]
    fn test_z_at_3d_line_uses_longer_axis() {
        let a = ProfilePoint::new(0.0, 0.0, 10.0);
        let b = ProfilePoint::new(100.0, 10.0, 20.0);
        assert_relative_eq!(z_at_3d_line((50.0, 5.0), &a, &b), 15.0);
        let c = ProfilePoint::new(0.0, 200.0, 30.0);
        assert_relative_eq!(z_at_3d_line((0.0, 50.0), &a, &c), 15.0);
        assert_relative_eq!(z_at_3d_line((3.0, 3.0), &a, &a), 10.0);
    }

    #[test]
    fn test_simplify_keeps_endpoints() {
        let flat: Vec<ProfilePoint> = (0..10).map(|i| ProfilePoint::new(i as f64, 0.0, 5.0)).collect();
        let simplified = simplify_profile(&flat, 1.0);
        assert_eq!(simplified, vec![flat[0], flat[9]]);
        assert!(simplify_profile(&[], 1.0).is_empty());
    }

    #[test]
    fn test_simplify_keeps_peak_above_tolerance() {
        let profile: Vec<ProfilePoint> = (0..=10)
            .map(|i| ProfilePoint::new(i as f64 * 10.0, 0.0, 10.0 - (i as f64 - 5.0).abs() * 2.0))
            .collect();
        let kept = simplify_profile(&profile, 5.0);
        assert_eq!(kept.len(), 3);
        assert_relative_eq!(kept[1].z, 10.0);
        assert_eq!(simplify_profile(&profile, 20.0).len(), 2);
    }

    #[test]
    fn test_simplify_discarded_points_within_tolerance() {
        let profile: Vec<ProfilePoint> = (0..200)
            .map(|i| {
                let x = i as f64 * 5.0;
                ProfilePoint::new(x, 0.5 * x, 30.0 * (x / 80.0).sin() + 0.01 * x)
            })
            .collect();
        let tolerance = 3.0;
        let kept = simplify_profile(&profile, tolerance);
        assert_eq!(kept.first(), profile.first());
        assert_eq!(kept.last(), profile.last());
        for p in &profile {
            let pair = kept
                .windows(2)
                .find(|w| w[0].x <= p.x && p.x <= w[1].x)
                .unwrap();
            let deviation = (p.z - z_at_3d_line((p.x, p.y), &pair[0], &pair[1])).abs();
            assert!(deviation < tolerance + 1e-9);
        }
    }

    #[test]
    fn test_strip_ranges_and_waypoints() {
        let stations = two_strips();
        assert_eq!(strip_ranges(&stations), vec![0..5, 5..10]);
        let waypoints = strip_waypoints(&stations);
        assert_eq!(waypoints.len(), 4);
        assert_eq!(waypoints.iter().map(|w| w.number).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_relative_eq!(waypoints[1].x, 900.0);
        assert_relative_eq!(waypoints[2].x, 900.0);
        assert_eq!(flight_line(&waypoints).len(), 4);
    }

    #[test]
    fn test_single_altitude_without_terrain() {
        let mut stations = two_strips();
        let policy = SingleAltitude {
            agl: 250.0,
            ground: (100.0, 200.0),
            terrain: None,
        };
        let control = JobControl::detached();
        let stage = control.stage(0, 100, 2);
        policy.assign(&mut stations, &[], &control, &stage).unwrap();
        for s in &stations {
            assert_relative_eq!(s.altitude_asl, 400.0);
            assert_relative_eq!(s.altitude_agl.unwrap(), 250.0);
        }
    }

    #[test]
    fn test_single_altitude_against_terrain() {
        let dem = slope();
        let sampler = TerrainSampler::identity(&dem);
        let square = polygon![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0)];
        let ground = reference_heights(&sampler, &ClipArea::Block(&square)).unwrap();
        assert_eq!(ground, (100.0, 199.0));

        let mut stations = two_strips();
        let policy = SingleAltitude {
            agl: 200.0,
            ground,
            terrain: Some(&sampler),
        };
        let control = JobControl::detached();
        let stage = control.stage(0, 100, 2);
        policy.assign(&mut stations, &[], &control, &stage).unwrap();
        let asl = 200.0 + 149.5;
        for s in &stations {
            assert_relative_eq!(s.altitude_asl, asl);
            let ground = 100.0 + (s.x / 10.0).floor();
            assert_relative_eq!(s.altitude_agl.unwrap(), asl - ground, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_strip_polygon_axis_aligned_uses_bounds() {
        let a = polygon_from_points(&[(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (0.0, 5.0)]);
        let b = polygon_from_points(&[(90.0, 0.0), (100.0, 0.0), (100.0, 5.0), (90.0, 5.0)]);
        let outline = strip_polygon(&a, &b, 180.0).unwrap();
        assert_relative_eq!(outline.unsigned_area(), 500.0);
        assert_eq!(outline.bounding_rect().unwrap().max(), Coord { x: 100.0, y: 5.0 });
    }

    #[test]
    fn test_strip_polygon_rotated_uses_extremes() {
        // Two diamonds along the 45° diagonal
        let a = polygon_from_points(&[(0.0, -1.0), (1.0, 0.0), (0.0, 1.0), (-1.0, 0.0)]);
        let b = polygon_from_points(&[(10.0, 9.0), (11.0, 10.0), (10.0, 11.0), (9.0, 10.0)]);
        let outline = strip_polygon(&a, &b, 45.0).unwrap();
        assert_eq!(outline.exterior().0.len(), 5);
        let expected = 2.0f64.sqrt() * (10.0 * 2.0f64.sqrt() + 2.0f64.sqrt());
        assert_relative_eq!(outline.unsigned_area(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_separate_strip_altitude_bias() {
        let dem = slope();
        let sampler = TerrainSampler::identity(&dem);
        let square = polygon![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0)];
        let mut stations = two_strips();
        let prints = footprints(&stations);
        let policy = SeparateStripAltitude {
            agl: 150.0,
            terrain: &sampler,
            clip: ClipArea::Block(&square),
        };
        let control = JobControl::detached();
        let stage = control.stage(40, 100, 2);
        let waypoints = policy.assign(&mut stations, &prints, &control, &stage).unwrap();

        // Strip outline spans x 40..960, cell centres 45..955 → columns 4..95
        let expected = strip_altitude(150.0, 104.0, 195.0);
        assert_relative_eq!(expected, 150.0 + 195.0 - 91.0 / 3.0);
        for s in &stations {
            assert_relative_eq!(s.altitude_asl, expected, epsilon = 1e-9);
            let ground = 100.0 + (s.x / 10.0).floor();
            assert_relative_eq!(s.altitude_agl.unwrap(), expected - ground, epsilon = 1e-9);
        }
        assert_eq!(waypoints.len(), 4);
    }

    #[test]
    fn test_separate_strip_needs_footprints() {
        let dem = flat(10.0);
        let sampler = TerrainSampler::identity(&dem);
        let square = polygon![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0)];
        let mut stations = two_strips();
        let policy = SeparateStripAltitude {
            agl: 150.0,
            terrain: &sampler,
            clip: ClipArea::Block(&square),
        };
        let control = JobControl::detached();
        let stage = control.stage(0, 100, 2);
        assert!(matches!(
            policy.assign(&mut stations, &[], &control, &stage),
            Err(PlanError::MissingInput(_))
        ));
    }

    #[test]
    fn test_terrain_following_flat() {
        let dem = flat(50.0);
        let sampler = TerrainSampler::identity(&dem);
        let mut stations = two_strips();
        let policy = TerrainFollowing {
            agl: 120.0,
            tolerance: 1.0,
            terrain: &sampler,
        };
        let control = JobControl::detached();
        let stage = control.stage(0, 100, 2);
        let waypoints = policy.assign(&mut stations, &[], &control, &stage).unwrap();

        assert_eq!(waypoints.len(), 4);
        assert!(waypoints.iter().all(|w| (w.altitude_asl - 170.0).abs() < 1e-9));
        for s in &stations {
            assert_relative_eq!(s.altitude_asl, 170.0, epsilon = 1e-9);
            assert_relative_eq!(s.altitude_agl.unwrap(), 120.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_terrain_following_tracks_slope() {
        let dem = slope();
        let sampler = TerrainSampler::identity(&dem);
        let mut stations = two_strips();
        let tolerance = 2.0;
        let policy = TerrainFollowing {
            agl: 100.0,
            tolerance,
            terrain: &sampler,
        };
        let control = JobControl::detached();
        let stage = control.stage(0, 100, 2);
        let waypoints = policy.assign(&mut stations, &[], &control, &stage).unwrap();

        assert!(waypoints.len() >= 4);
        let numbers: Vec<u32> = waypoints.iter().map(|w| w.number).collect();
        assert_eq!(numbers, (1..=waypoints.len() as u32).collect::<Vec<_>>());
        for s in &stations {
            let agl = s.altitude_agl.unwrap();
            assert!((agl - 100.0).abs() < tolerance + 1.0 + 1e-9, "AGL {} too far from target", agl);
        }
    }

    #[test]
    fn test_profile_step_follows_pixel_size() {
        let dem = flat(0.0);
        let sampler = TerrainSampler::identity(&dem);
        let policy = TerrainFollowing {
            agl: 100.0,
            tolerance: 1.0,
            terrain: &sampler,
        };
        let profile = policy.terrain_profile((5.0, 500.0), (805.0, 500.0), (10.0, 10.0)).unwrap();
        assert_eq!(profile.len(), 80);
        // Steep lines step one pixel height per sample: 895 m of northing
        let steep = policy.terrain_profile((5.0, 5.0), (505.0, 900.0), (10.0, 10.0)).unwrap();
        assert_eq!(steep.len(), 90);
    }

    #[test]
    fn test_out_of_bounds_station_fails() {
        let dem = flat(0.0);
        let sampler = TerrainSampler::identity(&dem);
        let mut stations = vec![station(1, 1, 100.0, 500.0), station(1, 2, 1500.0, 500.0)];
        let policy = TerrainFollowing {
            agl: 100.0,
            tolerance: 1.0,
            terrain: &sampler,
        };
        let control = JobControl::detached();
        let stage = control.stage(0, 100, 1);
        assert!(matches!(
            policy.assign(&mut stations, &[], &control, &stage),
            Err(PlanError::TerrainSampleOutOfBounds { .. })
        ));
    }
}
