//! Scene data model: timestamped multi-band grids with a validity mask.

mod geotransform;
mod region;
mod time_range;

pub use geotransform::GeoTransform;
pub use region::Region;
pub use time_range::TimeRange;

use crate::error::SceneError;
use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use std::sync::Arc;

/// Reflectance or derived values for one band.
pub type Grid = Array2<f32>;

/// Per-pixel usability flags.
pub type Mask = Array2<bool>;

/// One timestamped raster observation.
///
/// Band grids are shared behind `Arc`, so deriving a new scene never copies or
/// aliases mutable pixel data. Every grid and the mask have the same shape.
#[derive(Debug, Clone)]
pub struct Scene {
    id: String,
    acquired: DateTime<Utc>,
    crs: String,
    transform: GeoTransform,
    shape: (usize, usize),
    bands: Vec<(String, Arc<Grid>)>,
    mask: Arc<Mask>,
}

impl Scene {
    /// Create an empty scene with an all-valid mask.
    pub fn new(
        id: impl Into<String>,
        acquired: DateTime<Utc>,
        crs: impl Into<String>,
        transform: GeoTransform,
        shape: (usize, usize),
    ) -> Self {
        Self {
            id: id.into(),
            acquired,
            crs: crs.into(),
            transform,
            shape,
            bands: Vec::new(),
            mask: Arc::new(Array2::from_elem(shape, true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn acquired(&self) -> DateTime<Utc> {
        self.acquired
    }

    /// Acquisition calendar date (UTC).
    pub fn date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Grid shape (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// World bounds in the scene CRS.
    pub fn bounds(&self) -> [f64; 4] {
        self.transform.bounds(self.shape.0, self.shape.1)
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Number of pixels currently marked valid.
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    /// Band names in insertion order.
    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|(n, _)| n == name)
    }

    /// Look up a band grid.
    pub fn band(&self, name: &str) -> Result<&Grid, SceneError> {
        self.bands
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, grid)| grid.as_ref())
            .ok_or_else(|| SceneError::MissingBand {
                scene_id: self.id.clone(),
                band: name.to_string(),
            })
    }

    /// Return a new scene with `grid` appended under `name`.
    pub fn with_band(&self, name: impl Into<String>, grid: Grid) -> Result<Self, SceneError> {
        let name = name.into();
        if self.has_band(&name) {
            return Err(SceneError::DuplicateBand {
                scene_id: self.id.clone(),
                band: name,
            });
        }
        self.check_shape(grid.dim())?;

        let mut next = self.clone();
        next.bands.push((name, Arc::new(grid)));
        Ok(next)
    }

    /// Return a new scene whose mask is the AND of the current mask and `other`.
    pub fn with_mask_and(&self, other: &Mask) -> Result<Self, SceneError> {
        self.check_shape(other.dim())?;

        let mut combined = (*self.mask).clone();
        combined.zip_mut_with(other, |a, &b| *a = *a && b);

        let mut next = self.clone();
        next.mask = Arc::new(combined);
        Ok(next)
    }

    /// Return a new scene with only the named bands, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Self, SceneError> {
        let mut bands = Vec::with_capacity(names.len());
        for name in names {
            let grid = self
                .bands
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, g)| g.clone())
                .ok_or_else(|| SceneError::MissingBand {
                    scene_id: self.id.clone(),
                    band: name.clone(),
                })?;
            bands.push((name.clone(), grid));
        }

        let mut next = self.clone();
        next.bands = bands;
        Ok(next)
    }

    /// Replace all grids at once (used by clipping and resampling).
    pub(crate) fn regrid(
        &self,
        crs: String,
        transform: GeoTransform,
        bands: Vec<(String, Grid)>,
        mask: Mask,
    ) -> Result<Self, SceneError> {
        let shape = mask.dim();
        for (name, grid) in &bands {
            if grid.dim() != shape {
                return Err(SceneError::ShapeMismatch {
                    scene_id: format!("{}:{}", self.id, name),
                    expected: shape,
                    actual: grid.dim(),
                });
            }
        }

        Ok(Self {
            id: self.id.clone(),
            acquired: self.acquired,
            crs,
            transform,
            shape,
            bands: bands.into_iter().map(|(n, g)| (n, Arc::new(g))).collect(),
            mask: Arc::new(mask),
        })
    }

    /// Same pixels under a different identity.
    pub fn renamed(&self, id: impl Into<String>, acquired: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.id = id.into();
        next.acquired = acquired;
        next
    }

    /// Iterate bands as (name, grid).
    pub fn bands(&self) -> impl Iterator<Item = (&str, &Grid)> {
        self.bands.iter().map(|(n, g)| (n.as_str(), g.as_ref()))
    }

    fn check_shape(&self, actual: (usize, usize)) -> Result<(), SceneError> {
        if actual != self.shape {
            return Err(SceneError::ShapeMismatch {
                scene_id: self.id.clone(),
                expected: self.shape,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_scene() -> Scene {
        Scene::new(
            "MOD09A1_2010_02_01",
            Utc.with_ymd_and_hms(2010, 2, 1, 0, 0, 0).unwrap(),
            "EPSG:4326",
            GeoTransform::north_up(80.0, 23.0, 0.5, 0.5),
            (2, 3),
        )
    }

    #[test]
    fn test_new_scene_all_valid() {
        let scene = make_scene();
        assert_eq!(scene.valid_count(), 6);
        assert_eq!(scene.date(), NaiveDate::from_ymd_opt(2010, 2, 1).unwrap());
        assert_eq!(scene.bounds(), [80.0, 22.0, 81.5, 23.0]);
    }

    #[test]
    fn test_with_band_returns_new_scene() {
        let scene = make_scene();
        let next = scene.with_band("red", Array2::zeros((2, 3))).unwrap();

        assert!(!scene.has_band("red"));
        assert!(next.has_band("red"));
    }

    #[test]
    fn test_duplicate_band() {
        let scene = make_scene().with_band("red", Array2::zeros((2, 3))).unwrap();
        let err = scene.with_band("red", Array2::zeros((2, 3))).unwrap_err();
        assert!(matches!(err, SceneError::DuplicateBand { .. }));
    }

    #[test]
    fn test_shape_mismatch() {
        let err = make_scene().with_band("red", Array2::zeros((3, 3))).unwrap_err();
        assert!(matches!(err, SceneError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_band() {
        let err = make_scene().band("nir").unwrap_err();
        assert!(matches!(err, SceneError::MissingBand { ref band, .. } if band == "nir"));
    }

    #[test]
    fn test_mask_is_cumulative() {
        let scene = make_scene();
        let mut first = Array2::from_elem((2, 3), true);
        first[[0, 0]] = false;
        let mut second = Array2::from_elem((2, 3), true);
        second[[1, 2]] = false;

        let masked = scene.with_mask_and(&first).unwrap().with_mask_and(&second).unwrap();
        assert_eq!(masked.valid_count(), 4);
        assert!(!masked.mask()[[0, 0]]);
        assert!(!masked.mask()[[1, 2]]);
        assert_eq!(scene.valid_count(), 6);
    }

    #[test]
    fn test_select_orders_bands() {
        let scene = make_scene()
            .with_band("a", Array2::zeros((2, 3)))
            .unwrap()
            .with_band("b", Array2::ones((2, 3)))
            .unwrap();

        let selected = scene.select(&["b".to_string()]).unwrap();
        assert_eq!(selected.band_names().collect::<Vec<_>>(), vec!["b"]);
        assert!(scene.select(&["c".to_string()]).is_err());
    }
}
