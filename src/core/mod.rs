//! Core flight-planning modules

pub mod geometry;
pub mod grid_layout;
pub mod corridor;
pub mod altitude;
pub mod footprint;
pub mod quality;
pub mod job;
pub mod planner;

// Re-export main types
pub use grid_layout::{place_stations, GridLayout, LayoutCounters, LayoutParams};
pub use corridor::{corridor_flight_numbering, plan_corridor, CorridorLayout, CorridorSegment};
pub use altitude::{AltitudePolicy, ProfilePoint, SeparateStripAltitude, SingleAltitude, TerrainFollowing};
pub use footprint::{FootprintProjector, GroundFootprint, PhotoProjection, RasterContribution};
pub use quality::{aggregate, QualityRasters};
pub use job::{CancellationToken, EventSink, JobControl, JobEvent, JobHandle};
pub use planner::{
    design_flight, run_quality_control, FlightParams, FlightPlanRequest, FlightPlanResult,
    HeightReference, PlanningSession, QualityParams, QualityRaster, QualityRequest, QualityResult,
};
