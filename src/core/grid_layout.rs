//! Rotated station grid over a polygon, flown boustrophedon

use crate::core::geometry::{
    clip_polygon, intersect, polar_offset, polygon_from_points, rotated_bounding_box,
    segment_to_area_distance, RotatedBounds,
};
use crate::core::job::{JobControl, StageProgress};
use crate::types::{PhotoFootprint, PlanError, PlanResult, Station, StationKey};
use geo::{Area, Line, Polygon};
use std::f64::consts::{FRAC_PI_2, PI};
use std::ops::Range;

/// Slack for photos whose central line just touches the flown area
const TOUCH_TOLERANCE: f64 = 1e-6;

/// Spacing and photo size for one layout run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    /// Flight direction in degrees counter-clockwise from east
    pub alpha: f64,
    /// Station spacing along a strip (Bx)
    pub base_along: f64,
    /// Strip spacing (By)
    pub base_across: f64,
    /// Ground footprint along track (Lx)
    pub photo_along: f64,
    /// Ground footprint across track (Ly)
    pub photo_across: f64,
    /// How far extreme strips reach past the area, percent of Ly
    pub margin_percent: f64,
    /// Extra bases flown before and after every strip
    pub multiple_base: u32,
    /// Provisional altitude given to every station
    pub altitude_asl: f64,
}

impl LayoutParams {
    pub fn validate(&self) -> PlanResult<()> {
        if !(self.base_along > 0.0) || !(self.base_across > 0.0) {
            return Err(PlanError::InvalidFlightParameters(format!(
                "station spacing must be positive (Bx = {}, By = {})",
                self.base_along, self.base_across
            )));
        }
        if !(self.photo_along > 0.0) || !(self.photo_across > 0.0) {
            return Err(PlanError::InvalidFlightParameters(format!(
                "photo footprint must be positive (Lx = {}, Ly = {})",
                self.photo_along, self.photo_across
            )));
        }
        if !self.alpha.is_finite() {
            return Err(PlanError::InvalidFlightParameters(
                "flight direction is not a number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Grid start point and step vectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOrigin {
    /// Candidate photos per strip (Nx)
    pub photos_per_strip: usize,
    /// Number of strips (Ny)
    pub strips: usize,
    pub x0: f64,
    pub y0: f64,
    /// Step between stations of a strip
    pub along: (f64, f64),
    /// Step between strips
    pub across: (f64, f64),
}

/// Running strip and photo numbers, continued across corridor segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutCounters {
    pub strip: u32,
    pub photo: u32,
}

/// Stations and nominal footprints produced by one layout run
#[derive(Debug, Clone, Default)]
pub struct GridLayout {
    pub stations: Vec<Station>,
    /// Nominal photo rectangles, index-aligned with `stations`
    pub footprints: Vec<PhotoFootprint>,
    /// Station index range of every strip window, in grid order
    pub rows: Vec<Range<usize>>,
    pub counters: LayoutCounters,
}

/// Photos per strip (Nx) and strip count (Ny) for an area of extent `dx` × `dy`
pub fn strip_and_photo_counts(
    dx: f64,
    dy: f64,
    bx: f64,
    by: f64,
    ly: f64,
    margin_percent: f64,
    extra_bases: u32,
) -> PlanResult<(usize, usize)> {
    if !(bx > 0.0) || !(by > 0.0) {
        return Err(PlanError::InvalidFlightParameters(format!(
            "station spacing must be positive (Bx = {}, By = {})",
            bx, by
        )));
    }
    if !(dx >= 0.0) || !(dy >= 0.0) {
        return Err(PlanError::InvalidFlightParameters(format!(
            "area extent must be non-negative (Dx = {}, Dy = {})",
            dx, dy
        )));
    }
    let dy_flown = (dy - 2.0 * (0.5 - margin_percent / 100.0) * ly).max(0.0);
    let ny = (dy_flown / by).ceil() as usize + 1;
    let nx = (dx / bx).ceil() as usize + 2 * extra_bases as usize + 1;
    Ok((nx, ny))
}

/// First station position and the along/across step vectors
pub fn grid_origin_and_steps(bounds: &RotatedBounds, params: &LayoutParams) -> PlanResult<GridOrigin> {
    let (bx, by, ly) = (params.base_along, params.base_across, params.photo_across);
    let (nx, ny) = strip_and_photo_counts(
        bounds.dx,
        bounds.dy,
        bx,
        by,
        ly,
        params.margin_percent,
        params.multiple_base,
    )?;

    let inset = 0.5 - params.margin_percent / 100.0;
    let dy_flown = (bounds.dy - 2.0 * inset * ly).max(0.0);
    let by_flown = if ny > 1 { dy_flown / (ny - 1) as f64 } else { 0.0 };

    let alpha = params.alpha;
    let sign = if alpha > 90.0 && alpha <= 270.0 { 1.0 } else { -1.0 };
    let offset = if ny == 1 { bounds.dy / 2.0 } else { inset * ly };
    let b_first_strip = bounds.b_parallel + sign * offset * bounds.a_parallel.hypot(1.0);

    let overhang = ((bounds.dx / bx).ceil() * bx - bounds.dx) / 2.0;
    let sign_perp = if (0.0..=180.0).contains(&alpha) { -1.0 } else { 1.0 };
    let b_first_photo =
        bounds.b_perpendicular + sign_perp * overhang * bounds.a_perpendicular.hypot(1.0);

    let (x0, y0) = intersect(
        bounds.a_parallel,
        b_first_strip,
        bounds.a_perpendicular,
        b_first_photo,
    )?;

    let a = alpha.to_radians();
    Ok(GridOrigin {
        photos_per_strip: nx,
        strips: ny,
        x0,
        y0,
        along: (a.cos() * bx, a.sin() * bx),
        across: ((a - FRAC_PI_2).cos() * by_flown, (a - FRAC_PI_2).sin() * by_flown),
    })
}

/// Rectangle around the segment start..end, `half_diagonal` from each end at ±`theta`
fn rectangle_between(
    start: (f64, f64),
    end: (f64, f64),
    alpha: f64,
    theta: f64,
    half_diagonal: f64,
) -> Polygon<f64> {
    polygon_from_points(&[
        polar_offset(start.0, start.1, alpha + theta - PI, half_diagonal),
        polar_offset(start.0, start.1, alpha - theta + PI, half_diagonal),
        polar_offset(end.0, end.1, alpha + theta, half_diagonal),
        polar_offset(end.0, end.1, alpha - theta, half_diagonal),
    ])
}

/// Lay out stations for every strip of `area`
///
/// Numbering continues from `counters`. Odd strip windows fly the reverse
/// heading and are renumbered so numbers follow the flight order.
pub fn place_stations(
    area: &Polygon<f64>,
    params: &LayoutParams,
    counters: LayoutCounters,
    control: &JobControl,
    progress: Option<&StageProgress<'_>>,
) -> PlanResult<GridLayout> {
    params.validate()?;
    let bounds = rotated_bounding_box(params.alpha, area)?;
    let grid = grid_origin_and_steps(&bounds, params)?;

    log::info!(
        "Grid at {:.1}°: {} strips x {} candidate photos (Dx {:.1} m, Dy {:.1} m)",
        params.alpha,
        grid.strips,
        grid.photos_per_strip,
        bounds.dx,
        bounds.dy
    );

    let alpha = params.alpha.to_radians();
    let half_along = params.photo_along / 2.0;
    let half_across = params.photo_across / 2.0;
    let half_diagonal = half_along.hypot(half_across);
    let theta = half_across.atan2(half_along).abs();
    let m = params.multiple_base as i64;
    let nx = grid.photos_per_strip as i64;
    let reach = params.multiple_base as f64 * params.base_along + TOUCH_TOLERANCE;

    let mut layout = GridLayout {
        counters,
        ..Default::default()
    };
    let (mut x0, mut y0) = (grid.x0, grid.y0);
    let at = |x0: f64, y0: f64, n: i64| {
        (
            x0 + n as f64 * grid.along.0,
            y0 + n as f64 * grid.along.1,
        )
    };

    for k in 0..grid.strips {
        control.checkpoint()?;

        let window = rectangle_between(at(x0, y0, -m), at(x0, y0, nx - m - 1), alpha, theta, half_diagonal);
        let flown = clip_polygon(&window, area);
        let reverse = k % 2 == 1;
        let kappa = if reverse {
            (params.alpha + 180.0) % 360.0
        } else {
            params.alpha
        };
        let row_start = layout.stations.len();

        if flown.unsigned_area() > 0.0 {
            let mut previous: Option<i64> = None;
            for n in -m..(nx - m) {
                let (xi, yi) = at(x0, y0, n);
                let central = Line::new(
                    polar_offset(xi, yi, alpha + FRAC_PI_2, half_across),
                    polar_offset(xi, yi, alpha - FRAC_PI_2, half_across),
                );
                if segment_to_area_distance(&central, &flown) > reach {
                    continue;
                }

                layout.counters.photo += 1;
                if previous.map_or(true, |p| n - p != 1) {
                    layout.counters.strip += 1;
                }
                previous = Some(n);

                let key = StationKey::new(layout.counters.strip, layout.counters.photo);
                layout.stations.push(Station {
                    key,
                    x: xi,
                    y: yi,
                    altitude_asl: params.altitude_asl,
                    altitude_agl: None,
                    omega: 0.0,
                    phi: 0.0,
                    kappa,
                    segment: None,
                });
                layout.footprints.push(PhotoFootprint {
                    key,
                    polygon: rectangle_between((xi, yi), (xi, yi), alpha, theta, half_diagonal),
                });
            }
        } else {
            log::debug!("Strip window {} does not cross the area", k + 1);
        }

        if reverse {
            renumber_zigzag(&mut layout.stations[row_start..]);
            for (footprint, station) in layout.footprints[row_start..]
                .iter_mut()
                .zip(&layout.stations[row_start..])
            {
                footprint.key = station.key;
            }
        }
        log::debug!(
            "Strip window {}: {} stations, kappa {:.1}°",
            k + 1,
            layout.stations.len() - row_start,
            kappa
        );
        layout.rows.push(row_start..layout.stations.len());

        x0 += grid.across.0;
        y0 += grid.across.1;
        if let Some(progress) = progress {
            progress.tick();
        }
    }

    Ok(layout)
}

/// Renumber one reverse-flown strip window so numbers follow the flight order
///
/// Photo numbers are reassigned in descending position order and the runs of
/// a split window swap their strip numbers, both reusing the window's range.
pub fn renumber_zigzag(stations: &mut [Station]) {
    let Some(first_photo) = stations.iter().map(|s| s.key.photo).min() else {
        return;
    };
    let first_strip = stations
        .iter()
        .map(|s| s.key.strip)
        .fold(u32::MAX, u32::min);

    let mut photo = first_photo;
    let mut strip = first_strip;
    let mut previous: Option<u32> = None;
    for station in stations.iter_mut().rev() {
        if previous.is_some_and(|p| p != station.key.strip) {
            strip += 1;
        }
        previous = Some(station.key.strip);
        station.key = StationKey::new(strip, photo);
        photo += 1;
    }
}
