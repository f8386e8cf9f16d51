use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GSD value written to cells that no photo covers (cm/px)
pub const GSD_NODATA: f32 = 1000.0;

/// Overlap-count value for cells that no photo covers
pub const OVERLAP_NODATA: f32 = 0.0;

/// Metric camera model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub focal_length: f64,        // meters
    pub sensor_size: f64,         // pixel pitch in meters (square pixels)
    pub pixels_along_track: u32,
    pub pixels_across_track: u32,
}

impl Camera {
    /// Create a camera, rejecting non-physical parameters
    pub fn new(
        focal_length: f64,
        sensor_size: f64,
        pixels_along_track: u32,
        pixels_across_track: u32,
    ) -> PlanResult<Self> {
        let camera = Self {
            focal_length,
            sensor_size,
            pixels_along_track,
            pixels_across_track,
        };
        camera.validate()?;
        Ok(camera)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if !(self.focal_length > 0.0) || !(self.sensor_size > 0.0) {
            return Err(PlanError::InvalidFlightParameters(format!(
                "camera focal length ({}) and sensor size ({}) must be positive",
                self.focal_length, self.sensor_size
            )));
        }
        if self.pixels_along_track == 0 || self.pixels_across_track == 0 {
            return Err(PlanError::InvalidFlightParameters(
                "camera pixel counts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Image frame size along track in meters
    pub fn frame_along(&self) -> f64 {
        self.pixels_along_track as f64 * self.sensor_size
    }

    /// Image frame size across track in meters
    pub fn frame_across(&self) -> f64 {
        self.pixels_across_track as f64 * self.sensor_size
    }

    /// Ground footprint (along, across) of a vertical photo taken at `agl`
    pub fn ground_footprint(&self, agl: f64) -> (f64, f64) {
        let scale = agl / self.focal_length;
        (self.frame_along() * scale, self.frame_across() * scale)
    }

    /// Ground sample distance in cm/px at `agl`
    pub fn gsd_at(&self, agl: f64) -> f64 {
        agl * self.sensor_size / self.focal_length * 100.0
    }

    /// Flying height above ground that yields `gsd_cm`
    pub fn altitude_for_gsd(&self, gsd_cm: f64) -> f64 {
        gsd_cm / 100.0 / self.sensor_size * self.focal_length
    }
}

/// Coordinate reference system identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    Epsg(u32),
    Wkt(String),
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Wkt(wkt) => write!(f, "{}", wkt),
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// World coordinates of fractional pixel position (col, row)
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position (col, row) of a world coordinate
    pub fn world_to_pixel(&self, x: f64, y: f64) -> PlanResult<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return Err(PlanError::DegenerateGeometry(
                "geotransform is not invertible".to_string(),
            ));
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Ok((col, row))
    }

    /// Ground size of one pixel along its columns and rows
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.pixel_height.hypot(self.rotation_x),
        )
    }

    pub fn pixel_diagonal(&self) -> f64 {
        let (w, h) = self.pixel_size();
        w.hypot(h)
    }

    /// Same grid with its origin moved to pixel (col, row)
    pub fn shifted(&self, col: f64, row: f64) -> Self {
        let (x, y) = self.pixel_to_world(col, row);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }
}

/// Unique (strip, photo) key of a projection centre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationKey {
    pub strip: u32,
    pub photo: u32,
}

impl StationKey {
    pub fn new(strip: u32, photo: u32) -> Self {
        Self { strip, photo }
    }

    /// 4-digit zero-padded strip label
    pub fn strip_label(&self) -> String {
        format!("{:04}", self.strip)
    }

    /// 5-digit zero-padded photo label
    pub fn photo_label(&self) -> String {
        format!("{:05}", self.photo)
    }
}

impl fmt::Display for StationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strip_label(), self.photo_label())
    }
}

/// Camera exposure station (projection centre)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub key: StationKey,
    pub x: f64,
    pub y: f64,
    pub altitude_asl: f64,
    pub altitude_agl: Option<f64>,
    pub omega: f64,   // degrees
    pub phi: f64,     // degrees
    pub kappa: f64,   // degrees, counter-clockwise from east
    /// Corridor segment the station was laid out on (1-based), planning only
    #[serde(skip)]
    pub segment: Option<usize>,
}

impl Station {
    /// Heading in degrees clockwise from north
    pub fn heading(&self) -> f64 {
        (90.0 - self.kappa).rem_euclid(360.0)
    }
}

/// Ground footprint polygon of one photo
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoFootprint {
    pub key: StationKey,
    pub polygon: Polygon<f64>,
}

/// Point where altitude or flight direction changes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub number: u32,
    pub x: f64,
    pub y: f64,
    pub altitude_asl: f64,
    pub altitude_agl: Option<f64>,
}

/// Target area of a mission
#[derive(Debug, Clone, PartialEq)]
pub enum AreaGeometry {
    /// Polygon covered with parallel strips
    Block(Polygon<f64>),
    /// Linear feature flown segment by segment
    Corridor(LineString<f64>),
}

/// Area geometry together with its coordinate reference system
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningArea {
    pub geometry: AreaGeometry,
    pub crs: Option<Crs>,
}

impl PlanningArea {
    pub fn block(polygon: Polygon<f64>, crs: Option<Crs>) -> Self {
        Self {
            geometry: AreaGeometry::Block(polygon),
            crs,
        }
    }

    pub fn corridor(line: LineString<f64>, crs: Option<Crs>) -> Self {
        Self {
            geometry: AreaGeometry::Corridor(line),
            crs,
        }
    }
}

/// How flying heights are assigned to stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeMode {
    /// One altitude ASL for the whole mission
    Single,
    /// One altitude ASL per strip, biased toward high terrain
    SeparateStrips,
    /// Waypoints follow the simplified terrain profile
    TerrainFollowing,
}

impl AltitudeMode {
    pub fn requires_terrain(&self) -> bool {
        !matches!(self, AltitudeMode::Single)
    }
}

/// Flying height requirement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AltitudeTarget {
    /// Ground sample distance in cm/px
    Gsd(f64),
    /// Altitude above ground level in meters
    Agl(f64),
}

/// Error types for flight planning
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid flight parameters: {0}")]
    InvalidFlightParameters(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Unresolvable CRS mismatch: {0}")]
    CrsMismatchUnresolvable(String),

    #[error("Terrain sample out of bounds at ({x:.2}, {y:.2})")]
    TerrainSampleOutOfBounds { x: f64, y: f64 },

    #[error("Footprint did not converge after {iterations} iterations (last shift {max_shift:.3} m)")]
    ConvergenceFailure { iterations: usize, max_shift: f64 },

    #[error("Job cancelled")]
    Cancelled,

    #[error("A {0} job is already running")]
    JobInProgress(&'static str),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "gdal-io")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for planning operations
pub type PlanResult<T> = Result<T, PlanError>;
