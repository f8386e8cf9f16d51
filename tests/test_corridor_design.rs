use approx::assert_relative_eq;
use geo::line_string;
use ndarray::Array2;
use photoplan::core::job::JobControl;
use photoplan::{
    design_flight, AltitudeMode, AltitudeTarget, Camera, Crs, FlightParams, FlightPlanRequest,
    GeoTransform, PlanError, PlanningArea, TerrainModel,
};
use std::sync::Arc;

fn camera() -> Camera {
    Camera::new(0.05, 0.000006, 6000, 4000).unwrap()
}

fn l_shaped(mode: AltitudeMode, terrain: Option<Arc<TerrainModel>>) -> FlightPlanRequest {
    FlightPlanRequest {
        camera: camera(),
        area: PlanningArea::corridor(
            line_string![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 800.0)],
            Some(Crs::Epsg(2180)),
        ),
        terrain,
        params: FlightParams {
            buffer: 100.0,
            ..FlightParams::default()
        },
        altitude: AltitudeTarget::Gsd(3.0),
        mode,
    }
}

#[test]
fn test_l_shaped_corridor_numbering() {
    let _ = env_logger::builder().is_test(true).try_init();

    let result = design_flight(&l_shaped(AltitudeMode::Single, None), &JobControl::detached()).unwrap();
    assert!(!result.stations.is_empty());
    assert_eq!(result.stations.len(), result.footprints.len());

    // Segment tags are internal to the layout
    assert!(result.stations.iter().all(|s| s.segment.is_none()));

    // Photo numbers run 1..=N in key order
    let photos: Vec<u32> = result.stations.iter().map(|s| s.key.photo).collect();
    assert_eq!(photos, (1..=result.stations.len() as u32).collect::<Vec<_>>());
    assert!(result.stations.windows(2).all(|w| w[0].key.strip <= w[1].key.strip));

    // Strip 1 flies the eastward leg; each strip keeps one heading
    assert!(result.stations[0].kappa.rem_euclid(180.0).abs() < 1e-9);
    for strip in 1..=result.summary.strips as u32 {
        let kappas: Vec<f64> = result
            .stations
            .iter()
            .filter(|s| s.key.strip == strip)
            .map(|s| s.kappa)
            .collect();
        assert!(!kappas.is_empty(), "strip {} is missing", strip);
        assert!(kappas.iter().all(|k| *k == kappas[0]));
    }
    let northward = result
        .stations
        .iter()
        .filter(|s| (s.kappa.rem_euclid(180.0) - 90.0).abs() < 1e-9)
        .count();
    assert!(northward > 0 && northward < result.stations.len());
    assert!(result.stations.iter().all(|s| (s.altitude_asl - 250.0).abs() < 1e-9));
}

#[test]
fn test_corridor_with_terrain() {
    let _ = env_logger::builder().is_test(true).try_init();

    let terrain = Arc::new(TerrainModel::new(
        Array2::from_elem((200, 200), 50.0f32),
        GeoTransform::north_up(-500.0, 1500.0, 10.0, -10.0),
        None,
        Some(Crs::Epsg(2180)),
    ));
    let result = design_flight(
        &l_shaped(AltitudeMode::SeparateStrips, Some(terrain)),
        &JobControl::detached(),
    )
    .unwrap();
    for station in &result.stations {
        assert_relative_eq!(station.altitude_asl, 300.0, epsilon = 1e-6);
    }
}

#[test]
fn test_corridor_needs_two_vertices() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut request = l_shaped(AltitudeMode::Single, None);
    request.area = PlanningArea::corridor(line_string![(x: 0.0, y: 0.0)], None);
    assert!(matches!(
        design_flight(&request, &JobControl::detached()),
        Err(PlanError::MissingInput(_))
    ));
}
