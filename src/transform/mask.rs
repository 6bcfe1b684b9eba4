//! Quality-band cloud masking.

use super::Transform;
use crate::error::SceneError;
use crate::scene::{Mask, Scene};
use ndarray::Zip;

/// Marks pixels usable when `(qa & bit_mask) == clear_value`.
///
/// The default matches the MOD09A1 `StateQA` layout, where bits 0-1 hold the
/// cloud state and `00` means clear.
#[derive(Debug, Clone, PartialEq)]
pub struct QaMask {
    pub qa_band: String,
    pub bit_mask: u32,
    pub clear_value: u32,
}

impl Default for QaMask {
    fn default() -> Self {
        Self::new("StateQA", 0b11, 0)
    }
}

impl QaMask {
    pub fn new(qa_band: impl Into<String>, bit_mask: u32, clear_value: u32) -> Self {
        Self {
            qa_band: qa_band.into(),
            bit_mask,
            clear_value,
        }
    }

    /// Whether a single QA sample denotes a clear pixel.
    ///
    /// QA grids are stored as floats; NaN, negative and fractional samples are
    /// never clear.
    #[inline]
    pub fn is_clear(&self, qa: f32) -> bool {
        if !qa.is_finite() || qa < 0.0 || qa.fract() != 0.0 || qa > u32::MAX as f32 {
            return false;
        }
        (qa as u32 & self.bit_mask) == self.clear_value
    }
}

impl Transform for QaMask {
    fn name(&self) -> &str {
        "qa_mask"
    }

    fn apply(&self, scene: &Scene) -> Result<Scene, SceneError> {
        apply_mask(scene, self)
    }
}

/// Narrow the scene mask to clear pixels. Band values are left as they are.
pub fn apply_mask(scene: &Scene, mask: &QaMask) -> Result<Scene, SceneError> {
    let qa = scene.band(&mask.qa_band)?;

    let clear: Mask = Zip::from(qa).par_map_collect(|&v| mask.is_clear(v));
    let masked = scene.with_mask_and(&clear)?;

    tracing::debug!(
        "{}: {} of {} pixels clear after QA mask",
        scene.id(),
        masked.valid_count(),
        qa.len()
    );

    Ok(masked)
}
