//! Python bindings

use crate::core::footprint::{camera_axis_point, gsd, rotation_matrix};
use crate::core::job::JobControl;
use crate::core::planner::{design_flight, direction_to_alpha, FlightParams, FlightPlanRequest};
use crate::types::{
    AltitudeMode, AltitudeTarget, Camera, Crs, GeoTransform, PlanError, PlanningArea, Station,
};
use geo::{LineString, Polygon};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

fn to_py_err(e: PlanError) -> PyErr {
    match e {
        PlanError::InvalidFlightParameters(_) | PlanError::MissingInput(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyCamera>()?;
    m.add_function(wrap_pyfunction!(plan_block, m)?)?;
    m.add_function(wrap_pyfunction!(compute_gsd, m)?)?;
    m.add_function(wrap_pyfunction!(planning_angle, m)?)?;
    Ok(())
}

/// Python wrapper for Camera
#[pyclass(name = "Camera")]
#[derive(Clone)]
struct PyCamera {
    inner: Camera,
}

#[pymethods]
impl PyCamera {
    #[new]
    fn new(focal_length: f64, sensor_size: f64, pixels_along_track: u32, pixels_across_track: u32) -> PyResult<Self> {
        let inner = Camera::new(focal_length, sensor_size, pixels_along_track, pixels_across_track)
            .map_err(to_py_err)?;
        Ok(PyCamera { inner })
    }

    #[getter]
    fn focal_length(&self) -> f64 {
        self.inner.focal_length
    }

    #[getter]
    fn sensor_size(&self) -> f64 {
        self.inner.sensor_size
    }

    fn gsd_at(&self, agl: f64) -> f64 {
        self.inner.gsd_at(agl)
    }

    fn altitude_for_gsd(&self, gsd_cm: f64) -> f64 {
        self.inner.altitude_for_gsd(gsd_cm)
    }

    fn ground_footprint(&self, agl: f64) -> (f64, f64) {
        self.inner.ground_footprint(agl)
    }

    fn __repr__(&self) -> String {
        format!(
            "Camera(f={} m, pixel={} m, {}x{})",
            self.inner.focal_length,
            self.inner.sensor_size,
            self.inner.pixels_along_track,
            self.inner.pixels_across_track
        )
    }
}

/// Station row in the exported schema
type StationRow = (String, String, f64, f64, f64, Option<f64>, f64, f64, f64);

fn station_row(s: &Station) -> StationRow {
    (
        s.key.strip_label(),
        s.key.photo_label(),
        s.x,
        s.y,
        s.altitude_asl,
        s.altitude_agl,
        s.omega,
        s.phi,
        s.kappa,
    )
}

/// Single-altitude block design without terrain
#[pyfunction]
#[pyo3(signature = (camera, area, gsd, direction=0.0, overlap=60.0, sidelap=30.0, margin=20.0, multiple_base=1, epsg=None))]
#[allow(clippy::too_many_arguments)]
fn plan_block(
    py: Python<'_>,
    camera: &PyCamera,
    area: Vec<(f64, f64)>,
    gsd: f64,
    direction: f64,
    overlap: f64,
    sidelap: f64,
    margin: f64,
    multiple_base: u32,
    epsg: Option<u32>,
) -> PyResult<Vec<StationRow>> {
    let request = FlightPlanRequest {
        camera: camera.inner,
        area: PlanningArea::block(Polygon::new(LineString::from(area), vec![]), epsg.map(Crs::Epsg)),
        terrain: None,
        params: FlightParams {
            direction,
            overlap,
            sidelap,
            margin,
            multiple_base,
            ..FlightParams::default()
        },
        altitude: AltitudeTarget::Gsd(gsd),
        mode: AltitudeMode::Single,
    };
    let result = py
        .allow_threads(|| design_flight(&request, &JobControl::detached()))
        .map_err(to_py_err)?;
    Ok(result.stations.iter().map(station_row).collect())
}

/// Per-cell GSD (cm/px) of one photo over a DTM window
#[pyfunction]
#[allow(clippy::too_many_arguments)]
fn compute_gsd<'py>(
    py: Python<'py>,
    camera: &PyCamera,
    dtm: PyReadonlyArray2<'py, f32>,
    geotransform: [f64; 6],
    station: [f64; 3],
    omega: f64,
    phi: f64,
    kappa: f64,
) -> &'py PyArray2<f32> {
    let rotation = rotation_matrix(omega, phi, kappa);
    let axis = camera_axis_point(&rotation, station, camera.inner.focal_length);
    let values = gsd(
        dtm.as_array(),
        &GeoTransform::from_gdal(geotransform),
        station,
        axis,
        &camera.inner,
    );
    values.into_pyarray(py)
}

/// Planning angle (counter-clockwise from east) of a heading clockwise from north
#[pyfunction]
fn planning_angle(direction: f64) -> f64 {
    direction_to_alpha(direction)
}
