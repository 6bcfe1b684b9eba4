//! Per-scene transforms.
//!
//! Every transform is a pure `Scene -> Scene` function. A [`TransformSpec`]
//! chains them left to right; the first error aborts the chain for that scene.

mod clip;
mod index;
mod mask;
mod resample;

pub use clip::clip_to_region;
pub use index::{add_index, NormalizedDifference};
pub use mask::{apply_mask, QaMask};
pub use resample::{resample, ResampleTarget};

use crate::error::SceneError;
use crate::scene::Scene;
use std::fmt;
use std::sync::Arc;

/// A named pure function over scenes.
pub trait Transform: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn apply(&self, scene: &Scene) -> Result<Scene, SceneError>;
}

/// Ordered chain of transforms applied left to right.
#[derive(Debug, Clone, Default)]
pub struct TransformSpec {
    steps: Vec<Arc<dyn Transform>>,
}

impl TransformSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn then<T: Transform + 'static>(mut self, step: T) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in application order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Apply every step in order.
    pub fn apply(&self, scene: &Scene) -> Result<Scene, SceneError> {
        let mut current = scene.clone();
        for step in &self.steps {
            current = step.apply(&current)?;
            tracing::trace!("{}: applied {}", current.id(), step.name());
        }
        Ok(current)
    }
}

/// Keep only the listed bands, in the listed order.
#[derive(Debug, Clone)]
pub struct Select {
    bands: Vec<String>,
}

impl Select {
    pub fn new<I, S>(bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bands: bands.into_iter().map(Into::into).collect(),
        }
    }
}

impl Transform for Select {
    fn name(&self) -> &str {
        "select"
    }

    fn apply(&self, scene: &Scene) -> Result<Scene, SceneError> {
        scene.select(&self.bands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::GeoTransform;
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn modis_scene() -> Scene {
        let mut qa = Array2::zeros((2, 2));
        qa[[0, 0]] = 1.0; // cloudy
        Scene::new(
            "2010_02_01",
            Utc.with_ymd_and_hms(2010, 2, 1, 0, 0, 0).unwrap(),
            "EPSG:4326",
            GeoTransform::north_up(80.0, 23.0, 0.5, 0.5),
            (2, 2),
        )
        .with_band("sur_refl_b01", Array2::from_elem((2, 2), 1000.0))
        .unwrap()
        .with_band("sur_refl_b02", Array2::from_elem((2, 2), 3000.0))
        .unwrap()
        .with_band("StateQA", qa)
        .unwrap()
    }

    #[test]
    fn test_chain_mask_index_select() {
        let spec = TransformSpec::new()
            .then(QaMask::default())
            .then(NormalizedDifference::default())
            .then(Select::new(["NDVI"]));

        assert_eq!(spec.names(), vec!["qa_mask", "normalized_difference", "select"]);

        let input = modis_scene();
        let out = spec.apply(&input).unwrap();

        assert_eq!(out.band_names().collect::<Vec<_>>(), vec!["NDVI"]);
        assert_eq!(out.valid_count(), 3);
        assert!((out.band("NDVI").unwrap()[[1, 1]] - 0.5).abs() < 1e-6);

        // Input untouched
        assert_eq!(input.valid_count(), 4);
        assert!(!input.has_band("NDVI"));
    }

    #[test]
    fn test_chain_stops_at_first_error() {
        let spec = TransformSpec::new()
            .then(QaMask::new("QA_missing", 0b11, 0))
            .then(NormalizedDifference::default());

        let err = spec.apply(&modis_scene()).unwrap_err();
        assert!(matches!(err, SceneError::MissingBand { ref band, .. } if band == "QA_missing"));
    }

    #[test]
    fn test_empty_spec_is_identity() {
        let spec = TransformSpec::new();
        assert!(spec.is_empty());
        let out = spec.apply(&modis_scene()).unwrap();
        assert_eq!(out.band_names().count(), 3);
    }
}
