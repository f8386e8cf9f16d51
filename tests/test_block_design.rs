use approx::assert_relative_eq;
use geo::polygon;
use ndarray::Array2;
use photoplan::core::job::JobControl;
use photoplan::{
    design_flight, AltitudeMode, AltitudeTarget, Camera, Crs, FlightParams, FlightPlanRequest,
    GeoTransform, JobEvent, PlanningArea, PlanningSession, StationKey, TerrainModel,
};
use std::sync::Arc;

/// 500 x 200 m photos at 256 m AGL, bases of 200 x 150 m with the parameters below
fn camera() -> Camera {
    Camera::new(0.0625, 1.0 / 131072.0, 16000, 6400).unwrap()
}

fn params() -> FlightParams {
    FlightParams {
        direction: 90.0,
        overlap: 60.0,
        sidelap: 25.0,
        margin: 50.0,
        multiple_base: 0,
        ..FlightParams::default()
    }
}

fn square_request(mode: AltitudeMode, terrain: Option<Arc<TerrainModel>>) -> FlightPlanRequest {
    FlightPlanRequest {
        camera: camera(),
        area: PlanningArea::block(
            polygon![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0)],
            Some(Crs::Epsg(2180)),
        ),
        terrain,
        params: params(),
        altitude: AltitudeTarget::Agl(256.0),
        mode,
    }
}

fn flat_terrain(z: f32) -> Arc<TerrainModel> {
    Arc::new(TerrainModel::new(
        Array2::from_elem((200, 200), z),
        GeoTransform::north_up(-500.0, 1500.0, 10.0, -10.0),
        None,
        Some(Crs::Epsg(2180)),
    ))
}

#[test]
fn test_square_block_layout() {
    let _ = env_logger::builder().is_test(true).try_init();

    let result = design_flight(&square_request(AltitudeMode::Single, None), &JobControl::detached()).unwrap();

    assert_eq!(result.stations.len(), 48);
    assert_eq!(result.summary.strips, 8);
    assert_eq!(result.summary.photos, 48);
    assert_relative_eq!(result.summary.flight.base_along, 200.0, epsilon = 1e-9);
    assert_relative_eq!(result.summary.flight.base_across, 150.0, epsilon = 1e-9);

    // Sorted by key, photo numbers continue across strips
    let keys: Vec<StationKey> = result.stations.iter().map(|s| s.key).collect();
    let expected: Vec<StationKey> = (0..48u32).map(|i| StationKey::new(i / 6 + 1, i + 1)).collect();
    assert_eq!(keys, expected);

    for strip in result.stations.chunks(6) {
        let kappa = if strip[0].key.strip % 2 == 1 { 0.0 } else { 180.0 };
        assert!(strip.iter().all(|s| s.kappa == kappa));
        if kappa == 0.0 {
            assert!(strip.windows(2).all(|w| w[1].x > w[0].x));
        } else {
            assert!(strip.windows(2).all(|w| w[1].x < w[0].x));
        }
        let heading = if kappa == 0.0 { 90.0 } else { 270.0 };
        assert_relative_eq!(strip[0].heading(), heading);
    }

    // No terrain and no heights: flying height is relative to 0 m
    assert!(result.stations.iter().all(|s| (s.altitude_asl - 256.0).abs() < 1e-9));
    assert_eq!(result.waypoints.len(), 16);
    assert_eq!(result.crs, Some(Crs::Epsg(2180)));
    for (station, footprint) in result.stations.iter().zip(&result.footprints) {
        assert_eq!(station.key, footprint.key);
    }
}

#[test]
fn test_strip_labels_are_zero_padded() {
    let _ = env_logger::builder().is_test(true).try_init();

    let result = design_flight(&square_request(AltitudeMode::Single, None), &JobControl::detached()).unwrap();
    let last = result.stations.last().unwrap();
    assert_eq!(last.key.strip_label(), "0008");
    assert_eq!(last.key.photo_label(), "00048");
}

#[test]
fn test_separate_strips_over_flat_terrain() {
    let _ = env_logger::builder().is_test(true).try_init();

    let request = square_request(AltitudeMode::SeparateStrips, Some(flat_terrain(100.0)));
    let result = design_flight(&request, &JobControl::detached()).unwrap();

    assert_eq!(result.stations.len(), 48);
    for station in &result.stations {
        assert_relative_eq!(station.altitude_asl, 356.0, epsilon = 1e-6);
    }
    assert!(result.waypoints.iter().all(|w| (w.altitude_asl - 356.0).abs() < 1e-6));
}

#[test]
fn test_terrain_following_over_flat_terrain() {
    let _ = env_logger::builder().is_test(true).try_init();

    let request = square_request(AltitudeMode::TerrainFollowing, Some(flat_terrain(100.0)));
    let result = design_flight(&request, &JobControl::detached()).unwrap();

    assert_eq!(result.stations.len(), 48);
    for station in &result.stations {
        assert_relative_eq!(station.altitude_asl, 356.0, epsilon = 1e-6);
        assert_relative_eq!(station.altitude_agl.unwrap(), 256.0, epsilon = 1e-6);
    }
    assert!(!result.waypoints.is_empty());
}

#[test]
fn test_area_outside_terrain_is_rejected() {
    let _ = env_logger::builder().is_test(true).try_init();

    let small = Arc::new(TerrainModel::new(
        Array2::from_elem((20, 20), 100.0f32),
        GeoTransform::north_up(0.0, 200.0, 10.0, -10.0),
        None,
        Some(Crs::Epsg(2180)),
    ));
    let request = square_request(AltitudeMode::SeparateStrips, Some(small));
    assert!(design_flight(&request, &JobControl::detached()).is_err());
}

#[test]
fn test_design_progress_through_session() {
    let _ = env_logger::builder().is_test(true).try_init();

    let session = PlanningSession::new();
    let (handle, events) = session
        .design_with_events(square_request(AltitudeMode::Single, None))
        .unwrap();
    let result = handle.join().unwrap().unwrap();
    assert_eq!(result.stations.len(), 48);

    let events: Vec<JobEvent> = events.iter().collect();
    assert_eq!(events.first(), Some(&JobEvent::Enabled(false)));
    assert_eq!(events.last(), Some(&JobEvent::Enabled(true)));

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert!(!session.is_designing());
}
