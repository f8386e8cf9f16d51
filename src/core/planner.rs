//! Planning runs: request validation, flight parameters, mission design and quality control

use crate::core::altitude::{
    flight_line, reference_heights, strip_ranges, AltitudePolicy, ClipArea, SeparateStripAltitude,
    SingleAltitude, TerrainFollowing,
};
use crate::core::corridor::{effective_buffer, explode, plan_corridor};
use crate::core::footprint::FootprintProjector;
use crate::core::geometry::rotated_bounding_box;
use crate::core::grid_layout::{grid_origin_and_steps, place_stations, LayoutCounters, LayoutParams};
use crate::core::job::{CancellationToken, EventSink, JobControl, JobEvent, JobHandle, JobSlot};
use crate::core::quality::aggregate;
use crate::io::crs::{resolve_crs, transform_pair};
use crate::io::dem::{TerrainModel, TerrainSampler};
use crate::types::{
    AltitudeMode, AltitudeTarget, AreaGeometry, Camera, Crs, GeoTransform, PhotoFootprint,
    PlanError, PlanResult, PlanningArea, Station, Waypoint, GSD_NODATA, OVERLAP_NODATA,
};
use chrono::{DateTime, Utc};
use geo::{Area, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// User-facing mission parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightParams {
    /// Flight direction in degrees clockwise from north
    pub direction: f64,
    /// Along-track overlap in percent
    pub overlap: f64,
    /// Across-track overlap in percent
    pub sidelap: f64,
    /// How far the extreme strips reach beyond the area, percent of the photo width
    pub margin: f64,
    /// Extra bases added at both ends of every strip
    pub multiple_base: u32,
    /// Corridor buffer distance in meters
    pub buffer: f64,
    /// Terrain-following vertical tolerance in meters
    pub tolerance: f64,
    /// CRS assumed for inputs that carry none
    pub fallback_crs: Option<Crs>,
    /// User-supplied (min, max) terrain height for single-altitude missions
    pub terrain_heights: Option<(f64, f64)>,
}

impl Default for FlightParams {
    fn default() -> Self {
        Self {
            direction: 0.0,
            overlap: 60.0,
            sidelap: 30.0,
            margin: 20.0,
            multiple_base: 1,
            buffer: 50.0,
            tolerance: 5.0,
            fallback_crs: None,
            terrain_heights: None,
        }
    }
}

impl FlightParams {
    pub fn validate(&self) -> PlanResult<()> {
        let percent = |name: &str, value: f64| {
            if (0.0..100.0).contains(&value) {
                Ok(())
            } else {
                Err(PlanError::InvalidFlightParameters(format!(
                    "{} must be in [0, 100), got {}",
                    name, value
                )))
            }
        };
        percent("overlap", self.overlap)?;
        percent("sidelap", self.sidelap)?;
        if !self.direction.is_finite() || !self.margin.is_finite() {
            return Err(PlanError::InvalidFlightParameters(
                "direction and margin must be finite".to_string(),
            ));
        }
        if !(self.tolerance >= 0.0) {
            return Err(PlanError::InvalidFlightParameters(format!(
                "terrain-following tolerance must not be negative, got {}",
                self.tolerance
            )));
        }
        if let Some((low, high)) = self.terrain_heights {
            if !(low <= high) {
                return Err(PlanError::InvalidFlightParameters(format!(
                    "terrain height range {}..{} is inverted",
                    low, high
                )));
            }
        }
        Ok(())
    }
}

/// Everything a design run needs
#[derive(Debug, Clone)]
pub struct FlightPlanRequest {
    pub camera: Camera,
    pub area: PlanningArea,
    /// Terrain model in any CRS the planning area can be transformed to
    ///
    /// Required by the separate-strip and terrain-following modes. A
    /// single-altitude mission without terrain uses
    /// `FlightParams::terrain_heights`, or failing that a 0 m reference, so
    /// altitudes are then relative to the vertical datum rather than the ground.
    pub terrain: Option<Arc<TerrainModel>>,
    pub params: FlightParams,
    pub altitude: AltitudeTarget,
    pub mode: AltitudeMode,
}

/// Photo and base dimensions derived from the camera and altitude target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlightParameters {
    pub altitude_agl: f64,
    pub gsd: f64,
    pub photo_along: f64,
    pub photo_across: f64,
    pub base_along: f64,
    pub base_across: f64,
}

/// Bookkeeping of a finished design run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: AltitudeMode,
    pub strips: usize,
    pub photos: usize,
    pub flight: FlightParameters,
    pub processed_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone)]
pub struct FlightPlanResult {
    /// Stations sorted by (strip, photo)
    pub stations: Vec<Station>,
    /// Nominal photo rectangles, same order as `stations`
    pub footprints: Vec<PhotoFootprint>,
    pub waypoints: Vec<Waypoint>,
    pub flight_line: Vec<[f64; 3]>,
    pub crs: Option<Crs>,
    pub summary: RunSummary,
}

/// Convert a heading clockwise from north into the counter-clockwise-from-east planning angle
pub fn direction_to_alpha(direction: f64) -> f64 {
    (90.0 - direction).rem_euclid(360.0)
}

/// Photo size and base lengths for the requested altitude
pub fn flight_parameters(
    camera: &Camera,
    altitude: AltitudeTarget,
    overlap: f64,
    sidelap: f64,
) -> PlanResult<FlightParameters> {
    camera.validate()?;
    let altitude_agl = match altitude {
        AltitudeTarget::Gsd(gsd) => camera.altitude_for_gsd(gsd),
        AltitudeTarget::Agl(agl) => agl,
    };
    if !(altitude_agl > 0.0) || !altitude_agl.is_finite() {
        return Err(PlanError::InvalidFlightParameters(format!(
            "flying height must be positive, got {:?}",
            altitude
        )));
    }
    let (photo_along, photo_across) = camera.ground_footprint(altitude_agl);
    Ok(FlightParameters {
        altitude_agl,
        gsd: camera.gsd_at(altitude_agl),
        photo_along,
        photo_across,
        base_along: photo_along * (1.0 - overlap / 100.0),
        base_across: photo_across * (1.0 - sidelap / 100.0),
    })
}

/// Reject a request before any work starts
pub fn validate(request: &FlightPlanRequest) -> PlanResult<()> {
    request.camera.validate()?;
    request.params.validate()?;
    flight_parameters(
        &request.camera,
        request.altitude,
        request.params.overlap,
        request.params.sidelap,
    )?;

    if request.mode.requires_terrain() && request.terrain.is_none() {
        return Err(PlanError::MissingInput(format!(
            "{:?} altitude mode needs a terrain model",
            request.mode
        )));
    }

    match &request.area.geometry {
        AreaGeometry::Block(polygon) => {
            if polygon.exterior().0.len() < 4 || !(polygon.unsigned_area() > 0.0) {
                return Err(PlanError::InvalidFlightParameters(
                    "area of interest is empty".to_string(),
                ));
            }
        }
        AreaGeometry::Corridor(line) => {
            if line.0.len() < 2 {
                return Err(PlanError::MissingInput(
                    "corridor line needs at least two vertices".to_string(),
                ));
            }
            if !(request.params.buffer > 0.0) {
                return Err(PlanError::InvalidFlightParameters(format!(
                    "corridor buffer must be positive, got {}",
                    request.params.buffer
                )));
            }
        }
    }
    Ok(())
}

/// Sampler relating planning coordinates to the terrain raster
fn terrain_sampler<'a>(
    input: &str,
    input_crs: Option<&Crs>,
    terrain: &'a TerrainModel,
    fallback: Option<&Crs>,
) -> PlanResult<TerrainSampler<'a>> {
    let planning = resolve_crs(input, input_crs, fallback)?;
    let raster = resolve_crs("terrain model", terrain.crs.as_ref(), fallback)?;
    let (to_raster, to_planning) = transform_pair(&planning, &raster)?;
    Ok(TerrainSampler::new(terrain, to_raster, to_planning))
}

fn ensure_covered(sampler: &TerrainSampler<'_>, polygons: &[&Polygon<f64>]) -> PlanResult<()> {
    for polygon in polygons {
        if !sampler.covers(polygon)? {
            return Err(PlanError::InvalidFlightParameters(
                "planning area extends beyond the terrain model".to_string(),
            ));
        }
    }
    Ok(())
}

/// Run a complete mission design under `control`
///
/// Layout reports progress 0..40, altitude assignment 40..100.
pub fn design_flight(request: &FlightPlanRequest, control: &JobControl) -> PlanResult<FlightPlanResult> {
    let started = Utc::now();
    validate(request)?;
    let params = &request.params;
    let flight = flight_parameters(&request.camera, request.altitude, params.overlap, params.sidelap)?;
    let alpha = direction_to_alpha(params.direction);
    log::info!(
        "Designing {:?} mission: {:.2} m AGL, GSD {:.2} cm, bases {:.1} x {:.1} m",
        request.mode,
        flight.altitude_agl,
        flight.gsd,
        flight.base_along,
        flight.base_across
    );

    let sampler = match &request.terrain {
        Some(terrain) => Some(terrain_sampler(
            "planning area",
            request.area.crs.as_ref(),
            terrain,
            params.fallback_crs.as_ref(),
        )?),
        None => None,
    };

    // Flying heights are set by the altitude policy once stations exist
    let layout_params = LayoutParams {
        alpha,
        base_along: flight.base_along,
        base_across: flight.base_across,
        photo_along: flight.photo_along,
        photo_across: flight.photo_across,
        margin_percent: params.margin,
        multiple_base: params.multiple_base,
        altitude_asl: flight.altitude_agl,
    };

    // Corridor buffers must exist before terrain statistics can be taken
    let corridor_lines = match &request.area.geometry {
        AreaGeometry::Corridor(line) => Some(explode(line)?),
        AreaGeometry::Block(_) => None,
    };
    let buffer = effective_buffer(
        params.buffer,
        match &sampler {
            Some(s) => {
                let (w, h) = s.planning_pixel_size()?;
                Some(w.hypot(h))
            }
            None => None,
        },
    );

    let single_ground = match (request.mode, params.terrain_heights, &sampler) {
        (AltitudeMode::Single, Some(heights), _) => Some(heights),
        (AltitudeMode::Single, None, None) => {
            log::warn!("No terrain heights given, single altitude referenced to 0 m");
            Some((0.0, 0.0))
        }
        _ => None,
    };

    control.checkpoint()?;
    let (mut stations, mut footprints, segments, block) = match &request.area.geometry {
        AreaGeometry::Block(polygon) => {
            if let Some(sampler) = &sampler {
                ensure_covered(sampler, &[polygon])?;
            }
            let bounds = rotated_bounding_box(alpha, polygon)?;
            let strips = grid_origin_and_steps(&bounds, &layout_params)?.strips;
            let progress = control.stage(0, 40, strips);
            let grid = place_stations(polygon, &layout_params, LayoutCounters::default(), control, Some(&progress))?;
            progress.finish();
            (grid.stations, grid.footprints, Vec::new(), Some(polygon))
        }
        AreaGeometry::Corridor(line) => {
            let segment_count = corridor_lines.as_ref().map_or(0, |l| l.len());
            let progress = control.stage(0, 40, segment_count);
            let corridor = plan_corridor(line, &layout_params, buffer, control, Some(&progress))?;
            progress.finish();
            (corridor.stations, corridor.footprints, corridor.segments, None)
        }
    };

    let mut order: Vec<usize> = (0..stations.len()).collect();
    order.sort_by_key(|&i| stations[i].key);
    stations = order.iter().map(|&i| stations[i].clone()).collect();
    footprints = order.iter().map(|&i| footprints[i].clone()).collect();
    if stations.is_empty() {
        log::warn!("Layout produced no stations");
    }

    let clip = match block {
        Some(polygon) => ClipArea::Block(polygon),
        None => ClipArea::Corridor(&segments),
    };
    if let (Some(sampler), None) = (&sampler, block) {
        ensure_covered(sampler, &clip.polygons())?;
    }

    let policy = altitude_policy(request, &flight, single_ground, sampler.as_ref(), clip)?;
    let progress = control.stage(40, 100, strip_ranges(&stations).len());
    let waypoints = policy.assign(&mut stations, &footprints, control, &progress)?;
    progress.finish();

    for station in &mut stations {
        station.segment = None;
    }

    let strips = strip_ranges(&stations).len();
    let finished = Utc::now();
    log::info!(
        "Mission designed: {} stations in {} strips, {} waypoints",
        stations.len(),
        strips,
        waypoints.len()
    );

    Ok(FlightPlanResult {
        flight_line: flight_line(&waypoints),
        crs: request.area.crs.clone().or_else(|| params.fallback_crs.clone()),
        summary: RunSummary {
            mode: request.mode,
            strips,
            photos: stations.len(),
            flight,
            processed_at: finished,
            elapsed_ms: (finished - started).num_milliseconds(),
        },
        stations,
        footprints,
        waypoints,
    })
}

fn altitude_policy<'a>(
    request: &FlightPlanRequest,
    flight: &FlightParameters,
    single_ground: Option<(f64, f64)>,
    sampler: Option<&'a TerrainSampler<'a>>,
    clip: ClipArea<'a>,
) -> PlanResult<Box<dyn AltitudePolicy + 'a>> {
    let agl = flight.altitude_agl;
    let needs_terrain = || {
        sampler.ok_or_else(|| PlanError::MissingInput("terrain model not loaded".to_string()))
    };
    Ok(match request.mode {
        AltitudeMode::Single => {
            let ground = match (single_ground, sampler) {
                (Some(ground), _) => ground,
                (None, Some(sampler)) => reference_heights(sampler, &clip)?,
                (None, None) => (0.0, 0.0),
            };
            Box::new(SingleAltitude {
                agl,
                ground,
                terrain: sampler,
            })
        }
        AltitudeMode::SeparateStrips => Box::new(SeparateStripAltitude {
            agl,
            terrain: needs_terrain()?,
            clip,
        }),
        AltitudeMode::TerrainFollowing => Box::new(TerrainFollowing {
            agl,
            tolerance: request.params.tolerance,
            terrain: needs_terrain()?,
        }),
    })
}

/// Which table value holds a station's flying height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeightReference {
    /// `Station::altitude_asl`
    SeaLevel,
    /// `Station::altitude_agl`, terrain height is added
    Ground,
}

/// Quality-control settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    /// Footprint iteration stops once no vertex moves this far (meters)
    pub threshold: f64,
    pub footprints: bool,
    pub gsd: bool,
    pub overlap: bool,
    pub height_reference: HeightReference,
    pub fallback_crs: Option<Crs>,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            footprints: true,
            gsd: true,
            overlap: true,
            height_reference: HeightReference::SeaLevel,
            fallback_crs: None,
        }
    }
}

/// Stations with known orientation to check against a terrain model
#[derive(Debug, Clone)]
pub struct QualityRequest {
    pub camera: Camera,
    pub stations: Vec<Station>,
    pub stations_crs: Option<Crs>,
    pub terrain: Arc<TerrainModel>,
    pub params: QualityParams,
}

/// One output raster with its georeferencing
#[derive(Debug, Clone, PartialEq)]
pub struct QualityRaster {
    pub data: Array2<f32>,
    pub transform: GeoTransform,
    pub nodata: f32,
    pub crs: Option<Crs>,
}

#[derive(Debug, Clone)]
pub struct QualityResult {
    /// Terrain-projected footprints in the stations' CRS
    pub footprints: Vec<PhotoFootprint>,
    /// Best GSD per terrain cell (cm/px)
    pub gsd: Option<QualityRaster>,
    /// Number of photos per terrain cell
    pub overlap: Option<QualityRaster>,
    /// Photos whose footprint hit the iteration cap
    pub unconverged: usize,
    pub processed_at: DateTime<Utc>,
}

/// Project every station onto the terrain and build the requested quality outputs
///
/// Projection reports progress 0..80 (0..100 without rasters), aggregation 80..100.
pub fn run_quality_control(request: &QualityRequest, control: &JobControl) -> PlanResult<QualityResult> {
    let params = &request.params;
    request.camera.validate()?;
    if request.stations.is_empty() {
        return Err(PlanError::MissingInput("no projection centres to check".to_string()));
    }
    if !(params.footprints || params.gsd || params.overlap) {
        return Err(PlanError::InvalidFlightParameters(
            "quality control has no output selected".to_string(),
        ));
    }

    let sampler = terrain_sampler(
        "projection centres",
        request.stations_crs.as_ref(),
        &request.terrain,
        params.fallback_crs.as_ref(),
    )?;
    let rasters = params.gsd || params.overlap;
    let mut projector = FootprintProjector::new(request.camera, params.threshold, &sampler)?;
    if !rasters {
        projector = projector.footprints_only();
    }
    log::info!("Quality control of {} photos", request.stations.len());

    let progress = control.stage(0, if rasters { 80 } else { 100 }, request.stations.len());
    let mut footprints = Vec::new();
    let mut contributions = Vec::new();
    let mut unconverged = 0;

    for station in &request.stations {
        control.checkpoint()?;
        let mut station = station.clone();
        if params.height_reference == HeightReference::Ground {
            let agl = station.altitude_agl.ok_or_else(|| {
                PlanError::MissingInput(format!("station {} has no height above ground", station.key))
            })?;
            station.altitude_asl = agl + sampler.height_at(station.x, station.y)?;
        }

        let projection = projector.project(&station)?;
        log::debug!("Photo {} projected", station.key);
        if !projection.converged {
            unconverged += 1;
        }
        if params.footprints {
            footprints.push(projection.footprint);
        }
        if let Some(contribution) = projection.contribution {
            contributions.push(contribution);
        }
        progress.tick();
    }
    progress.finish();
    if unconverged > 0 {
        log::warn!("{} footprints did not converge", unconverged);
    }

    let (mut gsd, mut overlap) = (None, None);
    if rasters {
        let progress = control.stage(80, 100, contributions.len());
        if let Some(merged) = aggregate(&contributions, control, Some(&progress))? {
            let crs = request.terrain.crs.clone().or_else(|| params.fallback_crs.clone());
            if params.gsd {
                gsd = Some(QualityRaster {
                    data: merged.gsd,
                    transform: merged.transform,
                    nodata: GSD_NODATA,
                    crs: crs.clone(),
                });
            }
            if params.overlap {
                overlap = Some(QualityRaster {
                    data: merged.overlap,
                    transform: merged.transform,
                    nodata: OVERLAP_NODATA,
                    crs,
                });
            }
        } else {
            log::warn!("No photo covers any terrain cell, quality rasters skipped");
        }
        progress.finish();
    }

    Ok(QualityResult {
        footprints,
        gsd,
        overlap,
        unconverged,
        processed_at: Utc::now(),
    })
}

/// Runs design and quality-control jobs in the background, one of each at a time
#[derive(Debug, Clone)]
pub struct PlanningSession {
    design: JobSlot,
    quality: JobSlot,
}

impl Default for PlanningSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanningSession {
    pub fn new() -> Self {
        Self {
            design: JobSlot::new("design"),
            quality: JobSlot::new("quality control"),
        }
    }

    pub fn is_designing(&self) -> bool {
        self.design.is_busy()
    }

    pub fn is_checking_quality(&self) -> bool {
        self.quality.is_busy()
    }

    /// Validate `request` and design the mission on a worker thread
    pub fn start_design(
        &self,
        request: FlightPlanRequest,
        token: CancellationToken,
        sink: Option<EventSink>,
    ) -> PlanResult<JobHandle<FlightPlanResult>> {
        validate(&request)?;
        self.design
            .spawn(token, sink, move |control| design_flight(&request, control))
    }

    pub fn start_quality_control(
        &self,
        request: QualityRequest,
        token: CancellationToken,
        sink: Option<EventSink>,
    ) -> PlanResult<JobHandle<QualityResult>> {
        self.quality
            .spawn(token, sink, move |control| run_quality_control(&request, control))
    }

    /// `start_design` reporting through a fresh channel
    pub fn design_with_events(
        &self,
        request: FlightPlanRequest,
    ) -> PlanResult<(JobHandle<FlightPlanResult>, Receiver<JobEvent>)> {
        let (sender, receiver) = mpsc::channel();
        let sink: EventSink = Box::new(move |event| {
            let _ = sender.send(event);
        });
        let handle = self.start_design(request, CancellationToken::new(), Some(sink))?;
        Ok((handle, receiver))
    }

    pub fn quality_control_with_events(
        &self,
        request: QualityRequest,
    ) -> PlanResult<(JobHandle<QualityResult>, Receiver<JobEvent>)> {
        let (sender, receiver) = mpsc::channel();
        let sink: EventSink = Box::new(move |event| {
            let _ = sender.send(event);
        });
        let handle = self.start_quality_control(request, CancellationToken::new(), Some(sink))?;
        Ok((handle, receiver))
    }
}
