//! Normalized-difference spectral indices.

use super::Transform;
use crate::error::SceneError;
use crate::scene::{Grid, Scene};
use ndarray::Zip;

/// `(a - b) / (a + b)` appended as a new band.
///
/// Defaults to MODIS NDVI: NIR (`sur_refl_b02`) against red (`sur_refl_b01`).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDifference {
    pub band_a: String,
    pub band_b: String,
    pub output: String,
}

impl Default for NormalizedDifference {
    fn default() -> Self {
        Self::new("sur_refl_b02", "sur_refl_b01", "NDVI")
    }
}

impl NormalizedDifference {
    pub fn new(band_a: impl Into<String>, band_b: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            band_a: band_a.into(),
            band_b: band_b.into(),
            output: output.into(),
        }
    }
}

impl Transform for NormalizedDifference {
    fn name(&self) -> &str {
        "normalized_difference"
    }

    fn apply(&self, scene: &Scene) -> Result<Scene, SceneError> {
        add_index(scene, &self.band_a, &self.band_b, &self.output)
    }
}

/// Pixel-wise normalized difference. A zero denominator gives NaN.
#[inline]
pub fn normalized_difference(a: f32, b: f32) -> f32 {
    let sum = a + b;
    if sum == 0.0 {
        return f32::NAN;
    }
    (a - b) / sum
}

/// Append `output = (band_a - band_b) / (band_a + band_b)`.
///
/// The mask is neither read nor changed.
pub fn add_index(scene: &Scene, band_a: &str, band_b: &str, output: &str) -> Result<Scene, SceneError> {
    if scene.has_band(output) {
        return Err(SceneError::DuplicateBand {
            scene_id: scene.id().to_string(),
            band: output.to_string(),
        });
    }

    let a = scene.band(band_a)?;
    let b = scene.band(band_b)?;

    let index: Grid = Zip::from(a)
        .and(b)
        .par_map_collect(|&a, &b| normalized_difference(a, b));

    scene.with_band(output, index)
}
