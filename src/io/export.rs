//! GeoTIFF export of quality rasters

use crate::core::planner::QualityRaster;
use crate::io::crs::spatial_ref;
use crate::types::{Crs, GeoTransform, PlanResult, GSD_NODATA, OVERLAP_NODATA};
use gdal::raster::RasterCreationOption;
use gdal::DriverManager;
use ndarray::Array2;
use std::path::Path;

/// Write a single-band float GeoTIFF
pub fn save_geotiff<P: AsRef<Path>>(
    path: P,
    data: &Array2<f32>,
    transform: &GeoTransform,
    nodata: f32,
    crs: Option<&Crs>,
    compression: Option<&str>,
) -> PlanResult<()> {
    log::info!("Saving GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = data.dim();

    let options: Vec<RasterCreationOption> = compression
        .map(|value| RasterCreationOption { key: "COMPRESS", value })
        .into_iter()
        .collect();
    let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
        &options,
    )?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    match crs {
        Some(crs) => dataset.set_spatial_ref(&spatial_ref(crs)?)?,
        None => log::warn!("Raster {} written without a CRS", path.as_ref().display()),
    }

    let mut band = dataset.rasterband(1)?;
    let flat: Vec<f32> = data.iter().cloned().collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat);
    band.write((0, 0), (width, height), &buffer)?;
    band.set_no_data_value(Some(nodata as f64))?;

    log::debug!("Wrote {}x{} raster", height, width);
    Ok(())
}

fn save_quality_raster<P: AsRef<Path>>(path: P, raster: &QualityRaster, nodata: f32) -> PlanResult<()> {
    save_geotiff(
        path,
        &raster.data,
        &raster.transform,
        nodata,
        raster.crs.as_ref(),
        Some("DEFLATE"),
    )
}

/// GSD map, never-photographed cells flagged as nodata
pub fn save_gsd<P: AsRef<Path>>(path: P, raster: &QualityRaster) -> PlanResult<()> {
    save_quality_raster(path, raster, GSD_NODATA)
}

/// Photo-count map, uncovered cells flagged as nodata
pub fn save_overlap<P: AsRef<Path>>(path: P, raster: &QualityRaster) -> PlanResult<()> {
    save_quality_raster(path, raster, OVERLAP_NODATA)
}
