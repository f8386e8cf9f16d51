//! photoplan: aerial photogrammetric flight planning
//!
//! Lays out camera stations over a block or along a corridor, assigns flying
//! heights against a terrain model and checks the resulting photo coverage
//! with footprint, GSD and overlap rasters.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AltitudeMode, AltitudeTarget, AreaGeometry, Camera, Crs, GeoTransform, PhotoFootprint,
    PlanError, PlanResult, PlanningArea, Station, StationKey, Waypoint,
};

pub use crate::core::{
    design_flight, run_quality_control, CancellationToken, FlightParams, FlightPlanRequest,
    FlightPlanResult, JobEvent, PlanningSession, QualityParams, QualityRequest, QualityResult,
};
pub use io::{TerrainModel, TerrainSampler};
