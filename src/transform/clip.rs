//! Clip a scene to a region's footprint.

use crate::crs::{self, ProjCache};
use crate::error::SceneError;
use crate::scene::{Region, Scene};
use ndarray::s;

/// Crop to the pixel window covering the region's bounding box and mask out
/// pixels whose centres fall outside the polygon.
///
/// Returns `Ok(None)` when the region does not overlap the scene.
pub fn clip_to_region(scene: &Scene, region: &Region) -> Result<Option<Scene>, SceneError> {
    let cache = ProjCache::new();
    let region_bounds = crs::transform_bounds(&region.bounds(), crs::codes::WGS84, scene.crs(), &cache, 16)
        .map_err(|e| SceneError::InvalidParameter {
            name: "crs",
            value: scene.crs().to_string(),
            reason: format!("{:#}", e),
        })?;

    let Some((row_range, col_range)) = pixel_window(scene, &region_bounds) else {
        return Ok(None);
    };

    let (r0, r1) = row_range;
    let (c0, c1) = col_range;
    let transform = scene.transform().offset(r0, c0);
    let shape = (r1 - r0, c1 - c0);

    let inside = region
        .pixel_mask(scene.crs(), &transform, shape)
        .map_err(|e| SceneError::InvalidParameter {
            name: "crs",
            value: scene.crs().to_string(),
            reason: format!("{:#}", e),
        })?;

    let mut mask = scene.mask().slice(s![r0..r1, c0..c1]).to_owned();
    mask.zip_mut_with(&inside, |m, &i| *m = *m && i);

    let bands = scene
        .bands()
        .map(|(name, grid)| (name.to_string(), grid.slice(s![r0..r1, c0..c1]).to_owned()))
        .collect();

    tracing::debug!(
        "{}: clipped to rows {}..{}, cols {}..{}",
        scene.id(),
        r0,
        r1,
        c0,
        c1
    );

    scene
        .regrid(scene.crs().to_string(), transform, bands, mask)
        .map(Some)
}

/// Row and column ranges `[start, end)` covering `bounds`, clamped to the grid.
fn pixel_window(scene: &Scene, bounds: &[f64; 4]) -> Option<((usize, usize), (usize, usize))> {
    let overlap = crs::intersect_bounds(&scene.bounds(), bounds)?;
    let (rows, cols) = scene.shape();
    let gt = scene.transform();

    let (col_a, row_a) = gt.world_to_pixel(overlap[0], overlap[3]);
    let (col_b, row_b) = gt.world_to_pixel(overlap[2], overlap[1]);

    let clamp = |v: f64, max: usize| v.max(0.0).min(max as f64) as usize;
    let r0 = clamp(row_a.min(row_b).floor(), rows);
    let r1 = clamp(row_a.max(row_b).ceil(), rows);
    let c0 = clamp(col_a.min(col_b).floor(), cols);
    let c1 = clamp(col_a.max(col_b).ceil(), cols);

    if r0 >= r1 || c0 >= c1 {
        return None;
    }
    Some(((r0, r1), (c0, c1)))
}
