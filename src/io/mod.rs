//! Terrain models, coordinate systems and data exchange

pub mod attributes;
pub mod crs;
pub mod dem;
#[cfg(feature = "gdal-io")]
pub mod export;

pub use attributes::{find_matching_field, orientations_from_table, AttributeTable, OrientationFields};
pub use crs::{resolve_crs, PointTransform};
pub use dem::{TerrainModel, TerrainSampler};
#[cfg(feature = "gdal-io")]
pub use export::{save_geotiff, save_gsd, save_overlap};
