//! Corridor planning: one rotated grid per straight segment of a line,
//! numbered as a single continuous flight

use crate::core::geometry::{distance2d, polar_offset, polygon_from_points};
use crate::core::grid_layout::{place_stations, LayoutCounters, LayoutParams};
use crate::core::job::{JobControl, StageProgress};
use crate::types::{PhotoFootprint, PlanError, PlanResult, Station, StationKey};
use geo::{Line, LineString, Polygon};
use std::f64::consts::FRAC_PI_2;

/// One straight piece of a corridor and the area flown along it
#[derive(Debug, Clone, PartialEq)]
pub struct CorridorSegment {
    /// 1-based segment number
    pub id: usize,
    pub line: Line<f64>,
    /// Degrees counter-clockwise from east
    pub heading: f64,
    pub buffer: Polygon<f64>,
}

/// Stations of a whole corridor with their segments
#[derive(Debug, Clone, Default)]
pub struct CorridorLayout {
    pub stations: Vec<Station>,
    pub footprints: Vec<PhotoFootprint>,
    pub segments: Vec<CorridorSegment>,
}

/// Split a polyline into its non-degenerate straight segments
pub fn explode(line: &LineString<f64>) -> PlanResult<Vec<Line<f64>>> {
    let mut segments = Vec::new();
    for (i, segment) in line.lines().enumerate() {
        if distance2d(segment.start.x_y(), segment.end.x_y()) == 0.0 {
            log::warn!("Skipping zero-length corridor segment {}", i + 1);
            continue;
        }
        segments.push(segment);
    }
    if segments.is_empty() {
        return Err(PlanError::DegenerateGeometry(
            "corridor line has no segment of non-zero length".to_string(),
        ));
    }
    Ok(segments)
}

/// Direction of travel from `start` to `end`, degrees counter-clockwise from east in [0, 360)
pub fn segment_heading(segment: &Line<f64>) -> f64 {
    let dx = segment.end.x - segment.start.x;
    let dy = segment.end.y - segment.start.y;
    if dx == 0.0 {
        return if dy >= 0.0 { 90.0 } else { 270.0 };
    }
    if dy == 0.0 {
        return if dx > 0.0 { 0.0 } else { 180.0 };
    }
    let heading = dy.atan2(dx).to_degrees().rem_euclid(360.0);
    if heading >= 360.0 {
        heading - 360.0
    } else {
        heading
    }
}

/// Flat-capped buffer of `width` on both sides of the segment
pub fn buffer_segment(segment: &Line<f64>, width: f64) -> Polygon<f64> {
    let direction = segment_heading(segment).to_radians();
    let (sx, sy) = segment.start.x_y();
    let (ex, ey) = segment.end.x_y();
    polygon_from_points(&[
        polar_offset(sx, sy, direction - FRAC_PI_2, width),
        polar_offset(ex, ey, direction - FRAC_PI_2, width),
        polar_offset(ex, ey, direction + FRAC_PI_2, width),
        polar_offset(sx, sy, direction + FRAC_PI_2, width),
    ])
}

/// Buffer width that still covers at least one terrain sample
pub fn effective_buffer(requested: f64, pixel_diagonal: Option<f64>) -> f64 {
    match pixel_diagonal {
        Some(diagonal) if requested < diagonal / 2.0 => {
            log::warn!(
                "Corridor buffer {:.2} m raised to half the terrain pixel diagonal ({:.2} m)",
                requested,
                diagonal / 2.0
            );
            diagonal / 2.0
        }
        _ => requested,
    }
}

/// Strip and photo keys for every (segment, row) cell of a corridor
///
/// `counts[segment][row]` is the number of photos in that cell. Even rows
/// visit segments in order with ascending photo numbers; odd rows come back
/// through the segments in reverse with descending numbers. Keys are returned
/// in position order, so the first key of an odd-row cell holds its highest
/// photo number. Empty cells use no strip number.
pub fn corridor_flight_numbering(counts: &[Vec<usize>]) -> Vec<Vec<Vec<StationKey>>> {
    let rows = counts.iter().map(Vec::len).max().unwrap_or(0);
    let mut plan: Vec<Vec<Vec<StationKey>>> =
        counts.iter().map(|c| vec![Vec::new(); c.len()]).collect();

    let mut strip = 1u32;
    let mut photo = 1u32;
    for row in 0..rows {
        let forward = row % 2 == 0;
        let order: Vec<usize> = if forward {
            (0..counts.len()).collect()
        } else {
            (0..counts.len()).rev().collect()
        };
        for segment in order {
            let n = counts[segment].get(row).copied().unwrap_or(0);
            if n == 0 {
                continue;
            }
            let mut keys: Vec<StationKey> =
                (0..n as u32).map(|i| StationKey::new(strip, photo + i)).collect();
            if !forward {
                keys.reverse();
            }
            plan[segment][row] = keys;
            strip += 1;
            photo += n as u32;
        }
    }
    plan
}

/// Lay out and number stations along every segment of `line`
///
/// `params.alpha` is replaced by each segment's heading. Stations are tagged
/// with their segment id.
pub fn plan_corridor(
    line: &LineString<f64>,
    params: &LayoutParams,
    buffer: f64,
    control: &JobControl,
    progress: Option<&StageProgress<'_>>,
) -> PlanResult<CorridorLayout> {
    if !(buffer > 0.0) {
        return Err(PlanError::InvalidFlightParameters(format!(
            "corridor buffer must be positive, got {}",
            buffer
        )));
    }
    let lines = explode(line)?;
    log::info!("Corridor with {} segments, buffer {:.1} m", lines.len(), buffer);

    let mut layout = CorridorLayout::default();
    let mut counters = LayoutCounters::default();
    let mut per_segment = Vec::with_capacity(lines.len());

    for (i, segment_line) in lines.into_iter().enumerate() {
        control.checkpoint()?;
        let heading = segment_heading(&segment_line);
        let segment = CorridorSegment {
            id: i + 1,
            line: segment_line,
            heading,
            buffer: buffer_segment(&segment_line, buffer),
        };
        let segment_params = LayoutParams {
            alpha: heading,
            ..*params
        };
        let grid = place_stations(&segment.buffer, &segment_params, counters, control, None)?;
        log::debug!(
            "Segment {} at {:.1}°: {} stations in {} rows",
            segment.id,
            heading,
            grid.stations.len(),
            grid.rows.len()
        );
        counters = grid.counters;
        per_segment.push(grid);
        layout.segments.push(segment);
        if let Some(progress) = progress {
            progress.tick();
        }
    }

    let counts: Vec<Vec<usize>> = per_segment
        .iter()
        .map(|grid| grid.rows.iter().map(|r| r.len()).collect())
        .collect();
    let plan = corridor_flight_numbering(&counts);

    for ((grid, keys), segment) in per_segment.into_iter().zip(plan).zip(&layout.segments) {
        let mut stations = grid.stations;
        let mut footprints = grid.footprints;
        for (range, row_keys) in grid.rows.iter().zip(keys) {
            for (index, key) in range.clone().zip(row_keys) {
                stations[index].key = key;
                stations[index].segment = Some(segment.id);
                footprints[index].key = key;
            }
        }
        layout.stations.extend(stations);
        layout.footprints.extend(footprints);
    }

    Ok(layout)
}
