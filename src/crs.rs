//! Coordinate Reference System utilities.
//!
//! Regions are always expressed in WGS84 (lon, lat). Scenes carry their own
//! CRS; exports may be resampled into a caller-chosen CRS.
//!
//! Bounds arrays are `[min_x, min_y, max_x, max_y]` = `[west, south, east, north]`.

/// CRS codes referenced by defaults and tests.
pub mod codes {
    /// WGS84 geographic coordinate system (lon/lat in degrees).
    pub const WGS84: &str = "EPSG:4326";
}

use anyhow::{Context, Result};
use proj::Proj;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Bounds in a specific CRS: [min_x, min_y, max_x, max_y]
pub type Bounds = [f64; 4];

/// Whether `crs` names WGS84 geographic coordinates.
pub fn is_wgs84(crs: &str) -> bool {
    let crs = crs.trim();
    crs.eq_ignore_ascii_case(codes::WGS84)
        || crs.eq_ignore_ascii_case("WGS84")
        || crs.eq_ignore_ascii_case("OGC:CRS84")
}

/// Whether two CRS identifiers denote the same system without asking PROJ.
pub fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim()) || (is_wgs84(a) && is_wgs84(b))
}

/// Thread-safe cache for Proj transformations, keyed by (source, target).
#[derive(Default)]
pub struct ProjCache {
    cache: RwLock<HashMap<(String, String), Arc<Proj>>>,
}

impl ProjCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a Proj transformation between two CRS.
    pub fn get(&self, from_crs: &str, to_crs: &str) -> Result<Arc<Proj>> {
        let key = (from_crs.to_string(), to_crs.to_string());

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(proj) = cache.get(&key) {
                return Ok(proj.clone());
            }
        }

        let proj = Proj::new_known_crs(from_crs, to_crs, None)
            .with_context(|| format!("Failed to create projection from {} to {}", from_crs, to_crs))?;
        let proj = Arc::new(proj);

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, proj.clone());

        Ok(proj)
    }
}

/// Transform bounds by sampling `n_samples` points along every edge.
///
/// Points that fail to project are skipped; an error is returned only when
/// none of them project.
pub fn transform_bounds(
    bounds: &Bounds,
    from_crs: &str,
    to_crs: &str,
    cache: &ProjCache,
    n_samples: usize,
) -> Result<Bounds> {
    if same_crs(from_crs, to_crs) {
        return Ok(*bounds);
    }

    let proj = cache.get(from_crs, to_crs)?;
    let n = n_samples.max(1);

    let mut out = [f64::MAX, f64::MAX, f64::MIN, f64::MIN];
    let mut hits = 0usize;
    let mut extend = |(tx, ty): (f64, f64)| {
        if tx.is_finite() && ty.is_finite() {
            out[0] = out[0].min(tx);
            out[1] = out[1].min(ty);
            out[2] = out[2].max(tx);
            out[3] = out[3].max(ty);
            hits += 1;
        }
    };

    for i in 0..=n {
        let t = i as f64 / n as f64;
        let x = bounds[0] + t * (bounds[2] - bounds[0]);
        let y = bounds[1] + t * (bounds[3] - bounds[1]);

        for point in [(x, bounds[1]), (x, bounds[3]), (bounds[0], y), (bounds[2], y)] {
            if let Ok(p) = proj.convert(point) {
                extend(p);
            }
        }
    }

    if hits == 0 {
        anyhow::bail!(
            "None of the sampled points of {:?} could be transformed from {} to {}",
            bounds,
            from_crs,
            to_crs
        );
    }

    Ok(out)
}

/// Compute the intersection of two bounds, or None if they do not overlap.
pub fn intersect_bounds(a: &Bounds, b: &Bounds) -> Option<Bounds> {
    let min_x = a[0].max(b[0]);
    let min_y = a[1].max(b[1]);
    let max_x = a[2].min(b[2]);
    let max_y = a[3].min(b[3]);

    if min_x < max_x && min_y < max_y {
        Some([min_x, min_y, max_x, max_y])
    } else {
        None
    }
}
