//! Projection of photo footprints onto terrain, per-photo GSD and coverage

use crate::core::geometry::{distance2d, polygon_from_points};
use crate::io::dem::{TerrainModel, TerrainSampler};
use crate::types::{
    Camera, GeoTransform, PhotoFootprint, PlanError, PlanResult, Station, GSD_NODATA,
};
use geo::{Contains, Coord};
use ndarray::{s, Array2, ArrayView2, Zip};

/// Iteration cap of the ray/terrain intersection
pub const MAX_ITERATIONS: usize = 100;

pub type RotationMatrix = [[f64; 3]; 3];

const VERTICAL: [f64; 3] = [0.0, 0.0, -1.0];

/// Omega-phi-kappa rotation from image to ground frame (angles in degrees)
pub fn rotation_matrix(omega: f64, phi: f64, kappa: f64) -> RotationMatrix {
    let (so, co) = omega.to_radians().sin_cos();
    let (sp, cp) = phi.to_radians().sin_cos();
    let (sk, ck) = kappa.to_radians().sin_cos();
    [
        [cp * ck, -cp * sk, sp],
        [so * sp * ck + co * sk, -so * sp * sk + co * ck, -so * cp],
        [-co * sp * ck + so * sk, co * sp * sk + so * ck, co * cp],
    ]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Angle between two vectors in degrees, 0 when either is null
fn angle_between(a: &[f64], b: &[f64]) -> f64 {
    let product: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let la = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let lb = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if la == 0.0 || lb == 0.0 {
        return 0.0;
    }
    (product / (la * lb)).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Image-frame corners (x along track, y across track, z = -f)
pub fn image_corners(camera: &Camera) -> [[f64; 3]; 4] {
    let ha = camera.frame_along() / 2.0;
    let hc = camera.frame_across() / 2.0;
    let f = -camera.focal_length;
    [[-ha, hc, f], [ha, hc, f], [ha, -hc, f], [-ha, -hc, f]]
}

/// Points along the four image edges, spaced to roughly one terrain cell on the ground
pub fn image_edge_points(
    camera: &Camera,
    terrain_z: f64,
    station_z: f64,
    mean_resolution: f64,
) -> PlanResult<Vec<[f64; 3]>> {
    let height = station_z - terrain_z;
    if !(height > 0.0) {
        return Err(PlanError::InvalidFlightParameters(format!(
            "station at {:.2} m is not above the terrain ({:.2} m)",
            station_z, terrain_z
        )));
    }
    if !(mean_resolution > 0.0) {
        return Err(PlanError::InvalidFlightParameters(format!(
            "terrain resolution must be positive, got {}",
            mean_resolution
        )));
    }

    let (ground_along, ground_across) = camera.ground_footprint(height);
    let along = ((ground_along / mean_resolution).ceil() as usize).max(1);
    let across = ((ground_across / mean_resolution).ceil() as usize).max(1);

    let corners = image_corners(camera);
    let mut points = Vec::with_capacity(2 * (along + across));
    for (i, start) in corners.iter().enumerate() {
        let end = corners[(i + 1) % corners.len()];
        let n = if i % 2 == 0 { along } else { across };
        for k in 0..n {
            let t = k as f64 / n as f64;
            points.push([
                start[0] + t * (end[0] - start[0]),
                start[1] + t * (end[1] - start[1]),
                start[2],
            ]);
        }
    }
    Ok(points)
}

/// Where the ray through `image` meets the horizontal plane at `z`
pub fn ground_point(
    rotation: &RotationMatrix,
    station: [f64; 3],
    image: &[f64; 3],
    z: f64,
) -> PlanResult<(f64, f64)> {
    let denominator = dot(&rotation[2], image);
    if denominator >= 0.0 {
        return Err(PlanError::DegenerateGeometry(
            "image ray does not point toward the ground".to_string(),
        ));
    }
    let scale = (z - station[2]) / denominator;
    Ok((
        station[0] + scale * dot(&rotation[0], image),
        station[1] + scale * dot(&rotation[1], image),
    ))
}

/// Outcome of the iterative ray/terrain intersection
#[derive(Debug, Clone, PartialEq)]
pub struct GroundFootprint {
    /// Ground points in the planning CRS, one per image edge point
    pub vertices: Vec<(f64, f64)>,
    pub iterations: usize,
    pub max_shift: f64,
    pub converged: bool,
}

/// Intersect every image-edge ray with the terrain
///
/// Each iteration re-samples the terrain under the current ground points and
/// re-projects. Stops once no point moves by `threshold` or more. After
/// `MAX_ITERATIONS` the last iterate is returned with a warning.
pub fn ground_edge_points(
    rotation: &RotationMatrix,
    z_start: f64,
    threshold: f64,
    image_points: &[[f64; 3]],
    station: [f64; 3],
    window: &TerrainModel,
    sampler: &TerrainSampler<'_>,
) -> PlanResult<GroundFootprint> {
    let mut heights = vec![z_start; image_points.len()];
    let mut current = image_points
        .iter()
        .map(|c| ground_point(rotation, station, c, z_start))
        .collect::<PlanResult<Vec<_>>>()?;

    let mut max_shift = f64::INFINITY;
    for iteration in 1..=MAX_ITERATIONS {
        max_shift = 0.0;
        for (i, image) in image_points.iter().enumerate() {
            let (x, y) = current[i];
            let (rx, ry) = sampler.to_raster(x, y)?;
            heights[i] = match window.sample_bilinear(rx, ry) {
                Ok(z) => z,
                Err(_) => {
                    log::debug!(
                        "Ground point ({:.2}, {:.2}) left the terrain window, sampling the full model",
                        x,
                        y
                    );
                    sampler
                        .terrain()
                        .sample_bilinear(rx, ry)
                        .map_err(|_| PlanError::TerrainSampleOutOfBounds { x, y })?
                }
            };
            let next = ground_point(rotation, station, image, heights[i])?;
            max_shift = max_shift.max(distance2d(current[i], next));
            current[i] = next;
        }
        if max_shift < threshold {
            log::debug!("Footprint converged after {} iterations", iteration);
            return Ok(GroundFootprint {
                vertices: current,
                iterations: iteration,
                max_shift,
                converged: true,
            });
        }
    }

    log::warn!(
        "{}",
        PlanError::ConvergenceFailure {
            iterations: MAX_ITERATIONS,
            max_shift
        }
    );
    Ok(GroundFootprint {
        vertices: current,
        iterations: MAX_ITERATIONS,
        max_shift,
        converged: false,
    })
}

/// Terrain sub-window surely containing the photo's footprint
///
/// Sized from the corners projected onto the lowest terrain height, so the
/// real footprint can only be smaller.
pub fn clip_terrain_window(
    camera: &Camera,
    rotation: &RotationMatrix,
    station: [f64; 3],
    z_min: f64,
    sampler: &TerrainSampler<'_>,
) -> PlanResult<TerrainModel> {
    let principal = [0.0, 0.0, -camera.focal_length];
    let centre = ground_point(rotation, station, &principal, z_min)?;
    let mut buffer: f64 = 0.0;
    for corner in image_corners(camera).iter() {
        let p = ground_point(rotation, station, corner, z_min)?;
        buffer = buffer.max(distance2d(centre, p));
    }

    let (cx, cy) = centre;
    let square = [
        (cx - buffer, cy + buffer),
        (cx - buffer, cy - buffer),
        (cx + buffer, cy - buffer),
        (cx + buffer, cy + buffer),
    ];
    let corners = square
        .iter()
        .map(|&(x, y)| sampler.to_raster(x, y))
        .collect::<PlanResult<Vec<_>>>()?;

    let terrain = sampler.terrain();
    let ((r0, c0), (r1, c1)) = terrain.pixel_window(&corners)?;
    if r0 >= r1 || c0 >= c1 {
        return Err(PlanError::TerrainSampleOutOfBounds {
            x: station[0],
            y: station[1],
        });
    }
    terrain.window(r0, c0, r1, c1)
}

/// Point on the camera axis one focal length from the station
pub fn camera_axis_point(rotation: &RotationMatrix, station: [f64; 3], focal_length: f64) -> [f64; 3] {
    let image = [0.0, 0.0, -focal_length];
    [
        station[0] + dot(&rotation[0], &image),
        station[1] + dot(&rotation[1], &image),
        station[2] + dot(&rotation[2], &image),
    ]
}

/// Cells of a terrain window covered by one photo
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapMask {
    /// Coverage trimmed to its bounding box
    pub mask: Array2<bool>,
    /// Georeferencing of `mask`
    pub transform: GeoTransform,
    pub row_offset: usize,
    pub col_offset: usize,
}

/// Cell-centre point-in-polygon coverage of `vertices` (raster CRS) over `window`
pub fn overlap_photo(vertices: &[(f64, f64)], window: &TerrainModel) -> Option<OverlapMask> {
    if vertices.len() < 3 {
        return None;
    }
    let footprint = polygon_from_points(vertices);
    let (rows, cols) = window.shape();
    let mut inside = Array2::from_elem((rows, cols), false);
    let mut bounds: Option<(usize, usize, usize, usize)> = None;

    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = window.cell_center(row, col);
            if footprint.contains(&Coord { x, y }) {
                inside[[row, col]] = true;
                bounds = Some(match bounds {
                    Some((r0, c0, r1, c1)) => (r0.min(row), c0.min(col), r1.max(row), c1.max(col)),
                    None => (row, col, row, col),
                });
            }
        }
    }

    bounds.map(|(r0, c0, r1, c1)| OverlapMask {
        mask: inside.slice(s![r0..=r1, c0..=c1]).to_owned(),
        transform: window.transform.shifted(c0 as f64, r0 as f64),
        row_offset: r0,
        col_offset: c0,
    })
}

/// GSD of one photo as a function of ground position
struct GsdModel {
    station: [f64; 3],
    axis: [f64; 3],
    tilt: f64,
    scale: f64,
}

impl GsdModel {
    fn new(station: [f64; 3], axis_point: [f64; 3], camera: &Camera) -> Self {
        let axis = [
            axis_point[0] - station[0],
            axis_point[1] - station[1],
            axis_point[2] - station[2],
        ];
        let tilt = if axis[0] == 0.0 && axis[1] == 0.0 {
            0.0
        } else {
            angle_between(&VERTICAL, &axis)
        };
        Self {
            station,
            axis,
            tilt,
            scale: camera.sensor_size / camera.focal_length * 100.0,
        }
    }

    /// cm/px at ground point (x, y, z)
    fn at(&self, x: f64, y: f64, z: f64) -> f64 {
        let [xs, ys, zs] = self.station;
        let height = zs - z;
        if self.tilt == 0.0 {
            return height * self.scale;
        }

        // Foot of the perpendicular from the cell onto the axis ground track
        let (ux, uy) = (self.axis[0], self.axis[1]);
        let t = ((x - xs) * ux + (y - ys) * uy) / (ux * ux + uy * uy);
        let foot = [t * ux, t * uy, z - zs];

        let beta = angle_between(&VERTICAL, &foot);
        let direction = angle_between(&[ux, uy], &foot[..2]);
        let beta = if direction >= 90.0 { -beta } else { beta };

        height * self.scale * (beta - self.tilt).to_radians().cos() / beta.to_radians().cos()
    }
}

/// GSD (cm/px) for every cell of `dtm`, corrected for camera tilt
///
/// `station` and `axis_point` are in the CRS of `transform`.
pub fn gsd(
    dtm: ArrayView2<f32>,
    transform: &GeoTransform,
    station: [f64; 3],
    axis_point: [f64; 3],
    camera: &Camera,
) -> Array2<f32> {
    #[cfg(feature = "parallel")]
    {
        gsd_parallel(dtm, transform, station, axis_point, camera)
    }
    #[cfg(not(feature = "parallel"))]
    {
        gsd_sequential(dtm, transform, station, axis_point, camera)
    }
}

pub fn gsd_sequential(
    dtm: ArrayView2<f32>,
    transform: &GeoTransform,
    station: [f64; 3],
    axis_point: [f64; 3],
    camera: &Camera,
) -> Array2<f32> {
    let model = GsdModel::new(station, axis_point, camera);
    Zip::indexed(dtm).map_collect(|(row, col), &z| {
        let (x, y) = transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
        model.at(x, y, z as f64) as f32
    })
}

#[cfg(feature = "parallel")]
pub fn gsd_parallel(
    dtm: ArrayView2<f32>,
    transform: &GeoTransform,
    station: [f64; 3],
    axis_point: [f64; 3],
    camera: &Camera,
) -> Array2<f32> {
    use rayon::prelude::*;

    let model = GsdModel::new(station, axis_point, camera);
    let (rows, cols) = dtm.dim();
    let mut values = Array2::<f32>::zeros((rows, cols));
    match values.as_slice_mut() {
        Some(slice) => slice
            .par_chunks_mut(cols.max(1))
            .enumerate()
            .for_each(|(row, line)| {
                for (col, value) in line.iter_mut().enumerate() {
                    let (x, y) = transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                    *value = model.at(x, y, dtm[[row, col]] as f64) as f32;
                }
            }),
        None => return gsd_sequential(dtm, transform, station, axis_point, camera),
    }
    values
}

/// GSD with uncovered cells set to `GSD_NODATA`
pub fn masked_gsd(gsd: &Array2<f32>, mask: &Array2<bool>) -> Array2<f32> {
    Zip::from(gsd).and(mask).map_collect(|&g, &covered| {
        let value = if covered { g } else { 0.0 };
        if value == 0.0 {
            GSD_NODATA
        } else {
            value
        }
    })
}

/// One photo's share of the quality rasters
#[derive(Debug, Clone, PartialEq)]
pub struct RasterContribution {
    pub gsd: Array2<f32>,
    pub mask: Array2<bool>,
    pub transform: GeoTransform,
}

/// Ground footprint of one photo and, optionally, its raster contribution
#[derive(Debug, Clone)]
pub struct PhotoProjection {
    pub footprint: PhotoFootprint,
    pub contribution: Option<RasterContribution>,
    pub converged: bool,
}

/// Projects photos of one camera onto a terrain model
pub struct FootprintProjector<'a> {
    camera: Camera,
    threshold: f64,
    mean_resolution: f64,
    z_min: f64,
    sampler: &'a TerrainSampler<'a>,
    with_rasters: bool,
}

impl<'a> FootprintProjector<'a> {
    pub fn new(camera: Camera, threshold: f64, sampler: &'a TerrainSampler<'a>) -> PlanResult<Self> {
        camera.validate()?;
        if !(threshold > 0.0) {
            return Err(PlanError::InvalidFlightParameters(format!(
                "footprint iteration threshold must be positive, got {}",
                threshold
            )));
        }
        let (z_min, _) = sampler.terrain().min_max()?;
        let (pix_w, pix_h) = sampler.planning_pixel_size()?;
        Ok(Self {
            camera,
            threshold,
            mean_resolution: (pix_w.abs() + pix_h.abs()) / 2.0,
            z_min,
            sampler,
            with_rasters: true,
        })
    }

    /// Skip GSD and coverage computation
    pub fn footprints_only(mut self) -> Self {
        self.with_rasters = false;
        self
    }

    pub fn project(&self, station: &Station) -> PlanResult<PhotoProjection> {
        let rotation = rotation_matrix(station.omega, station.phi, station.kappa);
        let centre = [station.x, station.y, station.altitude_asl];

        let window = clip_terrain_window(&self.camera, &rotation, centre, self.z_min, self.sampler)?;
        let (rx, ry) = self.sampler.to_raster(station.x, station.y)?;
        let z_under = window
            .sample_bilinear(rx, ry)
            .map_err(|_| PlanError::TerrainSampleOutOfBounds {
                x: station.x,
                y: station.y,
            })?;

        let image = image_edge_points(&self.camera, z_under, station.altitude_asl, self.mean_resolution)?;
        let ground = ground_edge_points(
            &rotation,
            z_under,
            self.threshold,
            &image,
            centre,
            &window,
            self.sampler,
        )?;

        let footprint = PhotoFootprint {
            key: station.key,
            polygon: polygon_from_points(&ground.vertices),
        };
        let contribution = if self.with_rasters {
            self.contribution(&ground.vertices, &window, &rotation, centre, (rx, ry))?
        } else {
            None
        };

        Ok(PhotoProjection {
            footprint,
            contribution,
            converged: ground.converged,
        })
    }

    fn contribution(
        &self,
        vertices: &[(f64, f64)],
        window: &TerrainModel,
        rotation: &RotationMatrix,
        centre: [f64; 3],
        station_raster: (f64, f64),
    ) -> PlanResult<Option<RasterContribution>> {
        let raster_vertices = vertices
            .iter()
            .map(|&(x, y)| self.sampler.to_raster(x, y))
            .collect::<PlanResult<Vec<_>>>()?;
        let coverage = match overlap_photo(&raster_vertices, window) {
            Some(coverage) => coverage,
            None => return Ok(None),
        };

        let (rows, cols) = coverage.mask.dim();
        let fitted = window.elevation.slice(s![
            coverage.row_offset..coverage.row_offset + rows,
            coverage.col_offset..coverage.col_offset + cols
        ]);

        let axis = camera_axis_point(rotation, centre, self.camera.focal_length);
        let (ax, ay) = self.sampler.to_raster(axis[0], axis[1])?;
        let mut values = gsd(
            fitted,
            &coverage.transform,
            [station_raster.0, station_raster.1, centre[2]],
            [ax, ay, axis[2]],
            &self.camera,
        );
        Zip::from(&mut values).and(fitted).for_each(|g, &z| {
            if !window.is_valid(z) {
                *g = GSD_NODATA;
            }
        });

        Ok(Some(RasterContribution {
            gsd: masked_gsd(&values, &coverage.mask),
            mask: coverage.mask,
            transform: coverage.transform,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StationKey;
    use approx::assert_relative_eq;
    use geo::Area;

    fn camera() -> Camera {
        Camera::new(0.05, 0.000006, 6000, 4000).unwrap()
    }

    /// 100x100 cells of 10 m over (0..1000, 0..1000) at constant height
    fn flat(z: f32) -> TerrainModel {
        TerrainModel::new(
            Array2::from_elem((100, 100), z),
            GeoTransform::north_up(0.0, 1000.0, 10.0, -10.0),
            None,
            None,
        )
    }

    fn station(x: f64, y: f64, asl: f64) -> Station {
        Station {
            key: StationKey::new(1, 1),
            x,
            y,
            altitude_asl: asl,
            altitude_agl: None,
            omega: 0.0,
            phi: 0.0,
            kappa: 0.0,
            segment: None,
        }
    }

    #[test]
    fn test_rotation_matrix_identity_and_orthonormal() {
        let r = rotation_matrix(0.0, 0.0, 0.0);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(r[i][j], if i == j { 1.0 } else { 0.0 });
            }
        }

        let r = rotation_matrix(3.5, -7.25, 131.0);
        for i in 0..3 {
            for j in 0..3 {
                let product = dot(&r[i], &r[j]);
                assert_relative_eq!(product, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_kappa_turns_image_x_along_heading() {
        let r = rotation_matrix(0.0, 0.0, 90.0);
        let along = [1.0, 0.0, 0.0];
        assert_relative_eq!(dot(&r[0], &along), 0.0, epsilon = 1e-12);
        assert_relative_eq!(dot(&r[1], &along), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_image_edge_points_spacing() {
        let points = image_edge_points(&camera(), 100.0, 350.0, 10.0).unwrap();
        // 180 m x 120 m on the ground at 10 m spacing
        assert_eq!(points.len(), 2 * (18 + 12));
        assert!(points.iter().all(|p| p[2] == -0.05));
        assert_relative_eq!(points[0][0], -0.018, epsilon = 1e-12);
        assert_relative_eq!(points[0][1], 0.012, epsilon = 1e-12);
        assert!(image_edge_points(&camera(), 400.0, 350.0, 10.0).is_err());
    }

    #[test]
    fn test_principal_ray_hits_nadir() {
        let r = rotation_matrix(0.0, 0.0, 37.0);
        let (x, y) = ground_point(&r, [500.0, 400.0, 300.0], &[0.0, 0.0, -0.05], 100.0).unwrap();
        assert_relative_eq!(x, 500.0, epsilon = 1e-9);
        assert_relative_eq!(y, 400.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ground_edge_points_on_flat_terrain() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        let r = rotation_matrix(0.0, 0.0, 0.0);
        let image = image_edge_points(&camera(), 100.0, 350.0, 10.0).unwrap();
        let ground = ground_edge_points(&r, 100.0, 0.01, &image, [500.0, 500.0, 350.0], &dem, &sampler).unwrap();

        assert!(ground.converged);
        assert_eq!(ground.iterations, 1);
        let polygon = polygon_from_points(&ground.vertices);
        assert_relative_eq!(polygon.unsigned_area(), 180.0 * 120.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ground_edge_points_leave_small_window() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        // 100 x 100 m window, smaller than the 180 x 120 m footprint
        let window = dem.window(45, 45, 55, 55).unwrap();
        let r = rotation_matrix(0.0, 0.0, 0.0);
        let image = image_edge_points(&camera(), 100.0, 350.0, 10.0).unwrap();
        let ground = ground_edge_points(&r, 100.0, 0.01, &image, [500.0, 500.0, 350.0], &window, &sampler).unwrap();

        assert!(ground.converged);
        let polygon = polygon_from_points(&ground.vertices);
        assert_relative_eq!(polygon.unsigned_area(), 180.0 * 120.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ground_edge_points_off_terrain() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        let r = rotation_matrix(0.0, 0.0, 0.0);
        let image = image_edge_points(&camera(), 100.0, 350.0, 10.0).unwrap();
        // The footprint reaches 70 m west of the model
        assert!(matches!(
            ground_edge_points(&r, 100.0, 0.01, &image, [20.0, 500.0, 350.0], &dem, &sampler),
            Err(PlanError::TerrainSampleOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_ground_edge_points_iteration_cap() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        let r = rotation_matrix(0.0, 0.0, 0.0);
        let image = image_edge_points(&camera(), 100.0, 350.0, 10.0).unwrap();
        // A zero threshold can never be undercut
        let ground = ground_edge_points(&r, 100.0, 0.0, &image, [500.0, 500.0, 350.0], &dem, &sampler).unwrap();
        assert!(!ground.converged);
        assert_eq!(ground.iterations, MAX_ITERATIONS);
        assert_eq!(ground.vertices.len(), image.len());
    }

    #[test]
    fn test_ground_edge_points_reach_sloped_terrain() {
        // Terrain rising 0.5 m per meter eastward from 0 at x = 0
        let elevation = Array2::from_shape_fn((100, 100), |(_, c)| (c as f32 * 10.0 + 5.0) * 0.5);
        let dem = TerrainModel::new(elevation, GeoTransform::north_up(0.0, 1000.0, 10.0, -10.0), None, None);
        let sampler = TerrainSampler::identity(&dem);
        let r = rotation_matrix(0.0, 0.0, 0.0);
        let z0 = dem.sample_bilinear(500.0, 500.0).unwrap();
        let image = image_edge_points(&camera(), z0, 600.0, 10.0).unwrap();
        let ground = ground_edge_points(&r, z0, 0.001, &image, [500.0, 500.0, 600.0], &dem, &sampler).unwrap();

        assert!(ground.converged);
        // Points end up on the terrain under their rays
        for (&(x, y), c) in ground.vertices.iter().zip(&image) {
            let z = dem.sample_bilinear(x, y).unwrap();
            let (px, py) = ground_point(&r, [500.0, 500.0, 600.0], c, z).unwrap();
            assert!(distance2d((x, y), (px, py)) < 0.01);
        }
    }

    #[test]
    fn test_clip_window_covers_footprint() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        let r = rotation_matrix(0.0, 0.0, 0.0);
        let window = clip_terrain_window(&camera(), &r, [500.0, 500.0, 350.0], 100.0, &sampler).unwrap();
        // Half diagonal of 180 x 120 m is 108.2 m: columns 39..=60
        assert_eq!(window.shape(), (22, 22));
        assert_relative_eq!(window.transform.top_left_x, 390.0);
        assert_relative_eq!(window.transform.top_left_y, 610.0);

        let edge = clip_terrain_window(&camera(), &r, [20.0, 500.0, 350.0], 100.0, &sampler).unwrap();
        assert_relative_eq!(edge.transform.top_left_x, 0.0);

        assert!(clip_terrain_window(&camera(), &r, [5000.0, 500.0, 350.0], 100.0, &sampler).is_err());
    }

    #[test]
    fn test_overlap_photo_trims_to_coverage() {
        let dem = flat(0.0);
        let vertices = [(200.0, 800.0), (300.0, 800.0), (300.0, 700.0), (200.0, 700.0)];
        let coverage = overlap_photo(&vertices, &dem).unwrap();
        assert_eq!(coverage.mask.dim(), (10, 10));
        assert!(coverage.mask.iter().all(|&c| c));
        assert_eq!((coverage.row_offset, coverage.col_offset), (20, 20));
        assert_relative_eq!(coverage.transform.top_left_x, 200.0);
        assert_relative_eq!(coverage.transform.top_left_y, 800.0);

        let outside = [(2000.0, 800.0), (2100.0, 800.0), (2100.0, 700.0)];
        assert!(overlap_photo(&outside, &dem).is_none());
    }

    #[test]
    fn test_vertical_gsd_literal() {
        let dtm = Array2::<f32>::zeros((3, 3));
        let gt = GeoTransform::north_up(0.0, 3.0, 1.0, -1.0);
        let values = gsd(dtm.view(), &gt, [1.5, 1.5, 100.0], [1.5, 1.5, 99.95], &camera());
        for v in values.iter() {
            assert_relative_eq!(*v as f64, 100.0 * 0.000006 / 0.05 * 100.0, epsilon = 1e-5);
        }
        let sequential = gsd_sequential(dtm.view(), &gt, [1.5, 1.5, 100.0], [1.5, 1.5, 99.95], &camera());
        assert_eq!(values, sequential);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_gsd_matches_sequential() {
        let dtm = Array2::from_shape_fn((7, 5), |(r, c)| (r * 3 + c) as f32 * 1.5);
        let gt = GeoTransform::north_up(100.0, 200.0, 2.0, -2.0);
        let station = [104.0, 193.0, 300.0];
        let axis = camera_axis_point(&rotation_matrix(2.0, -5.0, 30.0), station, 0.05);
        let parallel = gsd_parallel(dtm.view(), &gt, station, axis, &camera());
        let sequential = gsd_sequential(dtm.view(), &gt, station, axis, &camera());
        assert_eq!(parallel.dim(), (7, 5));
        assert_eq!(parallel, sequential);
    }

    /// GSD of a single cell centred at (x, 0) on flat ground at z = 0
    fn oblique_gsd_at(x: f64, phi: f64) -> f64 {
        let dtm = Array2::<f32>::zeros((1, 1));
        let gt = GeoTransform::north_up(x - 0.5, 0.5, 1.0, -1.0);
        let r = rotation_matrix(0.0, phi, 0.0);
        let station = [0.0, 0.0, 100.0];
        let axis = camera_axis_point(&r, station, 0.05);
        gsd(dtm.view(), &gt, station, axis, &camera())[[0, 0]] as f64
    }

    #[test]
    fn test_oblique_gsd_correction() {
        let tilt = 20.0f64;
        let nominal = 100.0 * 0.000006 / 0.05 * 100.0;
        let offset = 100.0 * tilt.to_radians().tan();

        // Positive phi tilts the axis toward -x
        let ahead = oblique_gsd_at(-offset, tilt);
        assert_relative_eq!(ahead, nominal / tilt.to_radians().cos(), epsilon = 1e-4);

        let behind = oblique_gsd_at(offset, tilt);
        let expected = nominal * (2.0 * tilt).to_radians().cos() / tilt.to_radians().cos();
        assert_relative_eq!(behind, expected, epsilon = 1e-4);
        assert!(ahead > behind);
    }

    #[test]
    fn test_masked_gsd_uses_sentinel() {
        let values = Array2::from_elem((2, 2), 3.0f32);
        let mask = ndarray::arr2(&[[true, false], [false, true]]);
        let masked = masked_gsd(&values, &mask);
        assert_eq!(masked, ndarray::arr2(&[[3.0, GSD_NODATA], [GSD_NODATA, 3.0]]));
    }

    #[test]
    fn test_projector_on_flat_terrain() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        let projector = FootprintProjector::new(camera(), 0.01, &sampler).unwrap();
        let projection = projector.project(&station(500.0, 500.0, 350.0)).unwrap();

        assert!(projection.converged);
        assert_relative_eq!(projection.footprint.polygon.unsigned_area(), 21600.0, epsilon = 1e-6);

        let contribution = projection.contribution.unwrap();
        let covered = contribution.mask.iter().filter(|&&c| c).count();
        // 18 x 12 cell centres fall strictly inside the 180 x 120 m rectangle
        assert_eq!(covered, 18 * 12);
        for (g, covered) in contribution.gsd.iter().zip(contribution.mask.iter()) {
            if *covered {
                assert_relative_eq!(*g as f64, 3.0, epsilon = 1e-4);
            } else {
                assert_eq!(*g, GSD_NODATA);
            }
        }
    }

    #[test]
    fn test_projector_rejects_bad_threshold() {
        let dem = flat(100.0);
        let sampler = TerrainSampler::identity(&dem);
        assert!(FootprintProjector::new(camera(), 0.0, &sampler).is_err());
    }
}
