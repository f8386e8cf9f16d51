//! Merging per-photo contributions into mission-wide GSD and overlap rasters

use crate::core::footprint::RasterContribution;
use crate::core::job::{JobControl, StageProgress};
use crate::types::{GeoTransform, PlanResult, GSD_NODATA, OVERLAP_NODATA};
use ndarray::{s, Array2, Zip};

/// Rounding slack when converting an extent into whole cells
const CELL_EPSILON: f64 = 1e-9;

/// Union rasters over all contributions, on the terrain pixel grid
#[derive(Debug, Clone, PartialEq)]
pub struct QualityRasters {
    /// Best (smallest) GSD in cm/px, `GSD_NODATA` where never photographed
    pub gsd: Array2<f32>,
    /// Number of photos covering each cell
    pub overlap: Array2<f32>,
    pub transform: GeoTransform,
}

impl QualityRasters {
    pub fn shape(&self) -> (usize, usize) {
        self.gsd.dim()
    }

    /// Cells photographed at least once
    pub fn covered_cells(&self) -> usize {
        self.overlap.iter().filter(|&&n| n > OVERLAP_NODATA).count()
    }
}

/// World extent (ulx, uly, lrx, lry) of one contribution
fn contribution_extent(contribution: &RasterContribution) -> (f64, f64, f64, f64) {
    let (rows, cols) = contribution.gsd.dim();
    let gt = &contribution.transform;
    let (rows, cols) = (rows as f64, cols as f64);
    (
        gt.top_left_x,
        gt.top_left_y,
        gt.top_left_x + cols * gt.pixel_width + rows * gt.rotation_x,
        gt.top_left_y + cols * gt.rotation_y + rows * gt.pixel_height,
    )
}

fn cell_count(span: f64, resolution: f64) -> usize {
    (span / resolution - CELL_EPSILON).ceil().max(0.0) as usize
}

/// Paste every contribution into rasters spanning their union
///
/// GSD merges by minimum, overlap by addition. Returns `None` when there is
/// nothing to merge.
pub fn aggregate(
    contributions: &[RasterContribution],
    control: &JobControl,
    progress: Option<&StageProgress<'_>>,
) -> PlanResult<Option<QualityRasters>> {
    let first = match contributions.first() {
        Some(first) => first,
        None => return Ok(None),
    };
    let (xres, yres) = (first.transform.pixel_width, first.transform.pixel_height);

    let (mut ulx, mut uly, mut lrx, mut lry) = contribution_extent(first);
    for contribution in &contributions[1..] {
        let (x0, y0, x1, y1) = contribution_extent(contribution);
        ulx = ulx.min(x0);
        uly = uly.max(y0);
        lrx = lrx.max(x1);
        lry = lry.min(y1);
    }

    let cols = cell_count(lrx - ulx, xres);
    let rows = cell_count(lry - uly, yres);
    let transform = GeoTransform::north_up(ulx, uly, xres, yres);
    log::info!(
        "Aggregating {} photo contributions into a {}x{} raster",
        contributions.len(),
        rows,
        cols
    );

    let mut gsd = Array2::from_elem((rows, cols), GSD_NODATA);
    let mut overlap = Array2::from_elem((rows, cols), OVERLAP_NODATA);

    for contribution in contributions {
        control.checkpoint()?;

        let gt = &contribution.transform;
        let (col, row) = transform.world_to_pixel(gt.top_left_x + xres / 2.0, gt.top_left_y + yres / 2.0)?;
        let (r0, c0) = (row.max(0.0) as usize, col.max(0.0) as usize);
        let (h, w) = contribution.gsd.dim();
        let h = h.min(rows.saturating_sub(r0));
        let w = w.min(cols.saturating_sub(c0));
        if h == 0 || w == 0 {
            log::warn!("Photo contribution at ({:.2}, {:.2}) lies outside the union grid", gt.top_left_x, gt.top_left_y);
            continue;
        }

        Zip::from(gsd.slice_mut(s![r0..r0 + h, c0..c0 + w]))
            .and(contribution.gsd.slice(s![..h, ..w]))
            .for_each(|best, &value| *best = best.min(value));
        Zip::from(overlap.slice_mut(s![r0..r0 + h, c0..c0 + w]))
            .and(contribution.mask.slice(s![..h, ..w]))
            .for_each(|count, &covered| {
                if covered {
                    *count += 1.0;
                }
            });

        if let Some(progress) = progress {
            progress.tick();
        }
    }

    Ok(Some(QualityRasters {
        gsd,
        overlap,
        transform,
    }))
}
