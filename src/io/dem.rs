use crate::io::crs::{Identity, PointTransform};
use crate::types::{Crs, GeoTransform, PlanError, PlanResult};
use geo::{BoundingRect, Centroid, Contains, Coord, LineString, Polygon};
use ndarray::{s, Array2};
#[cfg(feature = "gdal-io")]
use std::path::Path;

/// Digital terrain model held in memory
#[derive(Debug, Clone)]
pub struct TerrainModel {
    /// Elevations in meters, indexed [row, col]
    pub elevation: Array2<f32>,
    pub transform: GeoTransform,
    pub nodata: Option<f32>,
    pub crs: Option<Crs>,
}

impl TerrainModel {
    pub fn new(
        elevation: Array2<f32>,
        transform: GeoTransform,
        nodata: Option<f32>,
        crs: Option<Crs>,
    ) -> Self {
        Self {
            elevation,
            transform,
            nodata,
            crs,
        }
    }

    /// Load the first band of any GDAL-readable raster
    #[cfg(feature = "gdal-io")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        log::info!("Loading terrain model: {}", path.as_ref().display());

        let dataset = gdal::Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let elevation = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| PlanError::Processing(format!("Failed to reshape terrain data: {}", e)))?;

        let crs = match dataset.spatial_ref() {
            Ok(srs) => match srs.auth_code() {
                Ok(code) => Some(Crs::Epsg(code as u32)),
                Err(_) => srs.to_wkt().ok().map(Crs::Wkt),
            },
            Err(_) => {
                log::warn!("Terrain model has no spatial reference");
                None
            }
        };

        log::debug!("Terrain size: {}x{}, nodata {:?}, crs {:?}", width, height, nodata, crs);

        Ok(Self::new(
            elevation,
            GeoTransform::from_gdal(geo_transform),
            nodata,
            crs,
        ))
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.elevation.dim()
    }

    pub fn is_valid(&self, value: f32) -> bool {
        value.is_finite() && self.nodata.map_or(true, |nd| value != nd)
    }

    /// Elevation of a cell, `None` outside the grid or on nodata
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        self.elevation
            .get((row, col))
            .copied()
            .filter(|v| self.is_valid(*v))
            .map(f64::from)
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    fn pixel_of(&self, x: f64, y: f64) -> PlanResult<(f64, f64)> {
        let (col, row) = self.transform.world_to_pixel(x, y)?;
        let (rows, cols) = self.shape();
        if !(col >= 0.0 && row >= 0.0 && col < cols as f64 && row < rows as f64) {
            return Err(PlanError::TerrainSampleOutOfBounds { x, y });
        }
        Ok((col, row))
    }

    /// Elevation of the cell containing (x, y)
    pub fn sample_nearest(&self, x: f64, y: f64) -> PlanResult<f64> {
        let (col, row) = self.pixel_of(x, y)?;
        self.value_at(row as usize, col as usize)
            .ok_or(PlanError::TerrainSampleOutOfBounds { x, y })
    }

    /// Bilinear interpolation between cell centres
    pub fn sample_bilinear(&self, x: f64, y: f64) -> PlanResult<f64> {
        let (col, row) = self.pixel_of(x, y)?;
        let (rows, cols) = self.shape();

        let u = (col - 0.5).clamp(0.0, (cols - 1) as f64);
        let v = (row - 0.5).clamp(0.0, (rows - 1) as f64);
        let x1 = u.floor() as usize;
        let y1 = v.floor() as usize;
        let x2 = (x1 + 1).min(cols - 1);
        let y2 = (y1 + 1).min(rows - 1);
        let dx = u - x1 as f64;
        let dy = v - y1 as f64;

        match (
            self.value_at(y1, x1),
            self.value_at(y2, x1),
            self.value_at(y1, x2),
            self.value_at(y2, x2),
        ) {
            (Some(v11), Some(v12), Some(v21), Some(v22)) => Ok(v11 * (1.0 - dx) * (1.0 - dy)
                + v21 * dx * (1.0 - dy)
                + v12 * (1.0 - dx) * dy
                + v22 * dx * dy),
            // Next to voids use the containing cell only
            _ => self.sample_nearest(x, y),
        }
    }

    /// Lowest and highest valid elevation in the model
    pub fn min_max(&self) -> PlanResult<(f64, f64)> {
        let mut range: Option<(f32, f32)> = None;
        for &v in self.elevation.iter().filter(|v| self.is_valid(**v)) {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
                None => (v, v),
            });
        }
        range
            .map(|(lo, hi)| (lo as f64, hi as f64))
            .ok_or_else(|| PlanError::MissingInput("terrain model has no valid cells".to_string()))
    }

    /// Min/max elevation of cells whose centres fall inside `zone` (raster CRS)
    pub fn zonal_min_max(&self, zone: &Polygon<f64>) -> PlanResult<(f64, f64)> {
        let rect = zone.bounding_rect().ok_or_else(|| {
            PlanError::DegenerateGeometry("zone polygon is empty".to_string())
        })?;
        let ((r0, c0), (r1, c1)) = self.pixel_window(&[
            (rect.min().x, rect.min().y),
            (rect.min().x, rect.max().y),
            (rect.max().x, rect.min().y),
            (rect.max().x, rect.max().y),
        ])?;

        let mut range: Option<(f64, f64)> = None;
        for row in r0..r1 {
            for col in c0..c1 {
                let (x, y) = self.cell_center(row, col);
                if !zone.contains(&Coord { x, y }) {
                    continue;
                }
                if let Some(v) = self.value_at(row, col) {
                    range = Some(match range {
                        Some((lo, hi)) => (lo.min(v), hi.max(v)),
                        None => (v, v),
                    });
                }
            }
        }

        match range {
            Some(range) => Ok(range),
            None => {
                // Zones smaller than a cell
                let centre = zone.centroid().ok_or_else(|| {
                    PlanError::DegenerateGeometry("zone polygon has no centroid".to_string())
                })?;
                let z = self.sample_nearest(centre.x(), centre.y())?;
                Ok((z, z))
            }
        }
    }

    /// Pixel rows/cols (half-open, clamped) covering the given world points
    pub fn pixel_window(
        &self,
        corners: &[(f64, f64)],
    ) -> PlanResult<((usize, usize), (usize, usize))> {
        let (rows, cols) = self.shape();
        let mut col_min = f64::INFINITY;
        let mut col_max = f64::NEG_INFINITY;
        let mut row_min = f64::INFINITY;
        let mut row_max = f64::NEG_INFINITY;
        for &(x, y) in corners {
            let (c, r) = self.transform.world_to_pixel(x, y)?;
            col_min = col_min.min(c);
            col_max = col_max.max(c);
            row_min = row_min.min(r);
            row_max = row_max.max(r);
        }
        let clamp = |v: f64, hi: usize| (v.max(0.0) as usize).min(hi);
        let r0 = clamp(row_min.floor(), rows);
        let c0 = clamp(col_min.floor(), cols);
        let r1 = clamp(row_max.floor() + 1.0, rows);
        let c1 = clamp(col_max.floor() + 1.0, cols);
        Ok(((r0, c0), (r1, c1)))
    }

    /// Copy of the cells in rows `r0..r1`, cols `c0..c1`
    pub fn window(&self, r0: usize, c0: usize, r1: usize, c1: usize) -> PlanResult<TerrainModel> {
        let (rows, cols) = self.shape();
        if r0 >= r1 || c0 >= c1 || r1 > rows || c1 > cols {
            return Err(PlanError::Processing(format!(
                "terrain window rows {}..{} cols {}..{} outside {}x{} raster",
                r0, r1, c0, c1, rows, cols
            )));
        }
        Ok(TerrainModel {
            elevation: self.elevation.slice(s![r0..r1, c0..c1]).to_owned(),
            transform: self.transform.shifted(c0 as f64, r0 as f64),
            nodata: self.nodata,
            crs: self.crs.clone(),
        })
    }

    /// Raster outline in its own CRS
    pub fn extent(&self) -> Polygon<f64> {
        let (rows, cols) = self.shape();
        let corners = [
            self.transform.pixel_to_world(0.0, 0.0),
            self.transform.pixel_to_world(cols as f64, 0.0),
            self.transform.pixel_to_world(cols as f64, rows as f64),
            self.transform.pixel_to_world(0.0, rows as f64),
        ];
        Polygon::new(LineString::from(corners.to_vec()), vec![])
    }
}

/// Samples a terrain model with coordinates given in the planning CRS
pub struct TerrainSampler<'a> {
    terrain: &'a TerrainModel,
    to_raster: Box<dyn PointTransform + 'a>,
    to_planning: Box<dyn PointTransform + 'a>,
}

impl<'a> TerrainSampler<'a> {
    pub fn new(
        terrain: &'a TerrainModel,
        to_raster: Box<dyn PointTransform + 'a>,
        to_planning: Box<dyn PointTransform + 'a>,
    ) -> Self {
        Self {
            terrain,
            to_raster,
            to_planning,
        }
    }

    /// Sampler for a terrain model already in the planning CRS
    pub fn identity(terrain: &'a TerrainModel) -> Self {
        Self::new(terrain, Box::new(Identity), Box::new(Identity))
    }

    pub fn terrain(&self) -> &TerrainModel {
        self.terrain
    }

    pub fn shares_crs(&self) -> bool {
        self.to_raster.is_identity()
    }

    pub fn to_raster(&self, x: f64, y: f64) -> PlanResult<(f64, f64)> {
        self.to_raster.transform(x, y)
    }

    pub fn to_planning(&self, x: f64, y: f64) -> PlanResult<(f64, f64)> {
        self.to_planning.transform(x, y)
    }

    /// Elevation of the cell under a planning-CRS point
    pub fn height_at(&self, x: f64, y: f64) -> PlanResult<f64> {
        let (rx, ry) = self.to_raster(x, y)?;
        self.terrain
            .sample_nearest(rx, ry)
            .map_err(|_| PlanError::TerrainSampleOutOfBounds { x, y })
    }

    /// Interpolated elevation under a planning-CRS point
    pub fn height_bilinear(&self, x: f64, y: f64) -> PlanResult<f64> {
        let (rx, ry) = self.to_raster(x, y)?;
        self.terrain
            .sample_bilinear(rx, ry)
            .map_err(|_| PlanError::TerrainSampleOutOfBounds { x, y })
    }

    pub fn polygon_to_raster(&self, polygon: &Polygon<f64>) -> PlanResult<Polygon<f64>> {
        if self.shares_crs() {
            return Ok(polygon.clone());
        }
        let exterior = transform_ring(polygon.exterior(), self.to_raster.as_ref())?;
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| transform_ring(ring, self.to_raster.as_ref()))
            .collect::<PlanResult<Vec<_>>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    /// Min/max elevation inside a planning-CRS polygon
    pub fn zonal_min_max(&self, zone: &Polygon<f64>) -> PlanResult<(f64, f64)> {
        let zone = self.polygon_to_raster(zone)?;
        self.terrain.zonal_min_max(&zone)
    }

    /// Whether `polygon` lies entirely inside the raster extent
    pub fn covers(&self, polygon: &Polygon<f64>) -> PlanResult<bool> {
        let zone = self.polygon_to_raster(polygon)?;
        Ok(self.terrain.extent().contains(&zone))
    }

    /// Pixel (width, height) measured in planning-CRS units
    pub fn planning_pixel_size(&self) -> PlanResult<(f64, f64)> {
        if self.shares_crs() {
            return Ok(self.terrain.transform.pixel_size());
        }
        let gt = &self.terrain.transform;
        let (x0, y0) = self.to_planning(gt.top_left_x, gt.top_left_y)?;
        let (x1, y1) = self.to_planning(
            gt.top_left_x + gt.pixel_width,
            gt.top_left_y + gt.pixel_height,
        )?;
        Ok(((x1 - x0).abs(), (y1 - y0).abs()))
    }
}

fn transform_ring(ring: &LineString<f64>, transform: &dyn PointTransform) -> PlanResult<LineString<f64>> {
    ring.coords()
        .map(|c| transform.transform(c.x, c.y).map(|(x, y)| Coord { x, y }))
        .collect::<PlanResult<Vec<_>>>()
        .map(LineString::new)
}
