//! Coordinate reference system resolution and point transforms

use crate::types::{Crs, PlanError, PlanResult};

/// Maps planar coordinates from one CRS into another
pub trait PointTransform {
    fn transform(&self, x: f64, y: f64) -> PlanResult<(f64, f64)>;

    fn is_identity(&self) -> bool {
        false
    }
}

/// Used when both sides share a CRS
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PointTransform for Identity {
    fn transform(&self, x: f64, y: f64) -> PlanResult<(f64, f64)> {
        Ok((x, y))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// OGR coordinate transformation, always in x/y (easting/northing) order
#[cfg(feature = "gdal-io")]
pub struct GdalTransform {
    inner: gdal::spatial_ref::CoordTransform,
}

#[cfg(feature = "gdal-io")]
impl GdalTransform {
    pub fn new(source: &Crs, target: &Crs) -> PlanResult<Self> {
        let source_ref = spatial_ref(source)?;
        let target_ref = spatial_ref(target)?;
        let inner = gdal::spatial_ref::CoordTransform::new(&source_ref, &target_ref)?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "gdal-io")]
impl PointTransform for GdalTransform {
    fn transform(&self, x: f64, y: f64) -> PlanResult<(f64, f64)> {
        let mut xs = [x];
        let mut ys = [y];
        let mut zs = [0.0];
        self.inner.transform_coords(&mut xs, &mut ys, &mut zs)?;
        Ok((xs[0], ys[0]))
    }
}

#[cfg(feature = "gdal-io")]
pub(crate) fn spatial_ref(crs: &Crs) -> PlanResult<gdal::spatial_ref::SpatialRef> {
    #[allow(unused_mut)]
    let mut srs = match crs {
        Crs::Epsg(code) => gdal::spatial_ref::SpatialRef::from_epsg(*code)?,
        Crs::Wkt(wkt) => gdal::spatial_ref::SpatialRef::from_wkt(wkt)?,
    };
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// CRS of an input, falling back to `fallback` with a warning
pub fn resolve_crs(input: &str, crs: Option<&Crs>, fallback: Option<&Crs>) -> PlanResult<Crs> {
    match (crs, fallback) {
        (Some(crs), _) => Ok(crs.clone()),
        (None, Some(fallback)) => {
            log::warn!("{} has no valid CRS, {} assumed", input, fallback);
            Ok(fallback.clone())
        }
        (None, None) => Err(PlanError::CrsMismatchUnresolvable(format!(
            "{} has no CRS and no fallback CRS is configured",
            input
        ))),
    }
}

/// Forward and inverse transforms between `source` and `target`
pub fn transform_pair(
    source: &Crs,
    target: &Crs,
) -> PlanResult<(Box<dyn PointTransform>, Box<dyn PointTransform>)> {
    if source == target {
        return Ok((Box::new(Identity), Box::new(Identity)));
    }
    log::debug!("Transforming coordinates between {} and {}", source, target);
    gdal_pair(source, target)
}

#[cfg(feature = "gdal-io")]
fn gdal_pair(
    source: &Crs,
    target: &Crs,
) -> PlanResult<(Box<dyn PointTransform>, Box<dyn PointTransform>)> {
    Ok((
        Box::new(GdalTransform::new(source, target)?),
        Box::new(GdalTransform::new(target, source)?),
    ))
}

#[cfg(not(feature = "gdal-io"))]
fn gdal_pair(
    source: &Crs,
    target: &Crs,
) -> PlanResult<(Box<dyn PointTransform>, Box<dyn PointTransform>)> {
    Err(PlanError::CrsMismatchUnresolvable(format!(
        "cannot transform {} to {} without the gdal-io feature",
        source, target
    )))
}
