//! Nearest-neighbour resampling onto a north-up grid in a target CRS.

use crate::crs::{self, ProjCache};
use crate::error::SceneError;
use crate::scene::{GeoTransform, Grid, Mask, Scene};
use ndarray::Array2;

/// Output grid requested for exports.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleTarget {
    /// Target CRS (e.g. "EPSG:4326")
    pub crs: String,

    /// Ground sample distance in target CRS units
    pub resolution: f64,
}

impl ResampleTarget {
    pub fn new(crs: impl Into<String>, resolution: f64) -> Result<Self, SceneError> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(SceneError::InvalidParameter {
                name: "resolution",
                value: resolution.to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        Ok(Self {
            crs: crs.into(),
            resolution,
        })
    }

    /// Whether `scene` already sits on a grid with this CRS and resolution.
    pub fn matches(&self, scene: &Scene) -> bool {
        let gt = scene.transform();
        crs::same_crs(scene.crs(), &self.crs)
            && gt.b == 0.0
            && gt.d == 0.0
            && (gt.a.abs() - self.resolution).abs() <= self.resolution * 1e-9
            && (gt.e.abs() - self.resolution).abs() <= self.resolution * 1e-9
    }
}

/// Resample every band and the mask onto `target`.
///
/// Output pixels whose centres map outside the source grid are NaN and
/// masked invalid. A scene already on the target grid is returned as is.
pub fn resample(scene: &Scene, target: &ResampleTarget) -> Result<Scene, SceneError> {
    if target.matches(scene) {
        return Ok(scene.clone());
    }

    let crs_error = |e: anyhow::Error| SceneError::InvalidParameter {
        name: "crs",
        value: target.crs.clone(),
        reason: format!("{:#}", e),
    };

    let cache = ProjCache::new();
    let dst_bounds =
        crs::transform_bounds(&scene.bounds(), scene.crs(), &target.crs, &cache, 16).map_err(crs_error)?;

    let res = target.resolution;
    let cols = (((dst_bounds[2] - dst_bounds[0]) / res).ceil() as usize).max(1);
    let rows = (((dst_bounds[3] - dst_bounds[1]) / res).ceil() as usize).max(1);
    let dst_transform = GeoTransform::north_up(dst_bounds[0], dst_bounds[3], res, res);

    // Source pixel index for every destination pixel, or None when outside
    let lookup = source_indices(scene, &target.crs, &dst_transform, (rows, cols), &cache).map_err(crs_error)?;

    let mut mask: Mask = Array2::from_elem((rows, cols), false);
    for (dst, src) in mask.iter_mut().zip(lookup.iter()) {
        if let Some(idx) = src {
            *dst = scene.mask()[*idx];
        }
    }

    let bands: Vec<(String, Grid)> = scene
        .bands()
        .map(|(name, grid)| {
            let mut out: Grid = Array2::from_elem((rows, cols), f32::NAN);
            for (dst, src) in out.iter_mut().zip(lookup.iter()) {
                if let Some(idx) = src {
                    *dst = grid[*idx];
                }
            }
            (name.to_string(), out)
        })
        .collect();

    tracing::debug!(
        "{}: resampled {:?} {} -> {:?} {} at {}",
        scene.id(),
        scene.shape(),
        scene.crs(),
        (rows, cols),
        target.crs,
        res
    );

    scene.regrid(target.crs.clone(), dst_transform, bands, mask)
}

fn source_indices(
    scene: &Scene,
    dst_crs: &str,
    dst_transform: &GeoTransform,
    shape: (usize, usize),
    cache: &ProjCache,
) -> anyhow::Result<Array2<Option<[usize; 2]>>> {
    let (src_rows, src_cols) = scene.shape();
    let src_transform = scene.transform();

    let proj = if crs::same_crs(dst_crs, scene.crs()) {
        None
    } else {
        Some(cache.get(dst_crs, scene.crs())?)
    };

    let mut lookup = Array2::from_elem(shape, None);
    for ((row, col), slot) in lookup.indexed_iter_mut() {
        let (x, y) = dst_transform.pixel_center(row, col);
        let (sx, sy) = match &proj {
            Some(p) => match p.convert((x, y)) {
                Ok(pt) => pt,
                Err(_) => continue,
            },
            None => (x, y),
        };

        let (src_col, src_row) = src_transform.world_to_pixel(sx, sy);
        if src_col < 0.0 || src_row < 0.0 {
            continue;
        }
        let (r, c) = (src_row.floor() as usize, src_col.floor() as usize);
        if r < src_rows && c < src_cols {
            *slot = Some([r, c]);
        }
    }

    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn scene() -> Scene {
        let values = Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c) as f32);
        Scene::new(
            "2010_02_01",
            Utc.with_ymd_and_hms(2010, 2, 1, 0, 0, 0).unwrap(),
            crs::codes::WGS84,
            GeoTransform::north_up(80.0, 23.0, 0.5, 0.5),
            (2, 2),
        )
        .with_band("NDVI", values)
        .unwrap()
    }

    #[test]
    fn test_invalid_resolution() {
        assert!(ResampleTarget::new("EPSG:4326", 0.0).is_err());
        assert!(ResampleTarget::new("EPSG:4326", f64::NAN).is_err());
    }

    #[test]
    fn test_matching_grid_is_identity() {
        let target = ResampleTarget::new("EPSG:4326", 0.5).unwrap();
        let s = scene();
        let out = resample(&s, &target).unwrap();
        assert_eq!(out.shape(), (2, 2));
        assert_eq!(out.band("NDVI").unwrap(), s.band("NDVI").unwrap());
    }

    #[test]
    fn test_upsample_same_crs() {
        let target = ResampleTarget::new("EPSG:4326", 0.25).unwrap();
        let out = resample(&scene(), &target).unwrap();

        assert_eq!(out.shape(), (4, 4));
        assert_eq!(out.bounds(), [80.0, 22.0, 81.0, 23.0]);
        let ndvi = out.band("NDVI").unwrap();
        assert_eq!(ndvi[[0, 0]], 0.0);
        assert_eq!(ndvi[[0, 3]], 1.0);
        assert_eq!(ndvi[[3, 0]], 2.0);
        assert_eq!(ndvi[[3, 3]], 3.0);
        assert_eq!(out.valid_count(), 16);
    }

    #[test]
    fn test_mask_follows_source() {
        let mut prior = Array2::from_elem((2, 2), true);
        prior[[0, 0]] = false;
        let s = scene().with_mask_and(&prior).unwrap();

        let target = ResampleTarget::new("EPSG:4326", 0.25).unwrap();
        let out = resample(&s, &target).unwrap();
        assert_eq!(out.valid_count(), 12);
        assert!(!out.mask()[[1, 1]]);
    }

    #[test]
    fn test_reproject_to_utm() {
        let target = ResampleTarget::new("EPSG:32644", 5000.0).unwrap();
        let out = resample(&scene(), &target).unwrap();

        assert_eq!(out.crs(), "EPSG:32644");
        assert!(out.shape().0 > 1 && out.shape().1 > 1);
        assert!(out.valid_count() > 0);
    }
}
