//! Error taxonomy for scene processing.
//!
//! Domain errors are typed so that a run can report failures by kind.
//! Orchestration code wraps them in `anyhow` where the kind no longer matters.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by per-scene transforms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("band '{band}' not found in scene {scene_id}")]
    MissingBand { scene_id: String, band: String },

    #[error("band '{band}' already exists in scene {scene_id}")]
    DuplicateBand { scene_id: String, band: String },

    #[error("grid size mismatch in scene {scene_id}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        scene_id: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors raised when talking to a scene archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive unavailable: {0}")]
    Unavailable(String),

    #[error("archive call timed out after {0}s")]
    Timeout(u64),

    #[error("scene {scene_id} could not be loaded: {reason}")]
    Load { scene_id: String, reason: String },

    #[error("malformed catalog: {0}")]
    Catalog(String),
}

impl ArchiveError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::Unavailable(_) | ArchiveError::Timeout(_) | ArchiveError::Load { .. }
        )
    }
}

/// A per-scene export failure.
#[derive(Error, Debug)]
#[error("export of {destination} failed: {reason}")]
pub struct ExportError {
    pub destination: String,
    pub reason: String,
}

/// Failure categories reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FailureKind {
    ArchiveUnavailable,
    MissingBand,
    DuplicateBand,
    ShapeMismatch,
    InvalidParameter,
    ExportFailure,
    /// A worker task panicked
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::ArchiveUnavailable => "ArchiveUnavailable",
            FailureKind::MissingBand => "MissingBand",
            FailureKind::DuplicateBand => "DuplicateBand",
            FailureKind::ShapeMismatch => "ShapeMismatch",
            FailureKind::InvalidParameter => "InvalidParameter",
            FailureKind::ExportFailure => "ExportFailure",
            FailureKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl From<&SceneError> for FailureKind {
    fn from(e: &SceneError) -> Self {
        match e {
            SceneError::MissingBand { .. } => FailureKind::MissingBand,
            SceneError::DuplicateBand { .. } => FailureKind::DuplicateBand,
            SceneError::ShapeMismatch { .. } => FailureKind::ShapeMismatch,
            SceneError::InvalidParameter { .. } => FailureKind::InvalidParameter,
        }
    }
}

impl From<&ArchiveError> for FailureKind {
    fn from(_: &ArchiveError) -> Self {
        FailureKind::ArchiveUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        let missing = SceneError::MissingBand {
            scene_id: "s1".to_string(),
            band: "StateQA".to_string(),
        };
        assert_eq!(FailureKind::from(&missing), FailureKind::MissingBand);

        let duplicate = SceneError::DuplicateBand {
            scene_id: "s1".to_string(),
            band: "NDVI".to_string(),
        };
        assert_eq!(FailureKind::from(&duplicate), FailureKind::DuplicateBand);
    }

    #[test]
    fn test_retryable() {
        assert!(ArchiveError::Unavailable("down".to_string()).is_retryable());
        assert!(ArchiveError::Timeout(5).is_retryable());
        assert!(!ArchiveError::Catalog("bad column".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let e = SceneError::MissingBand {
            scene_id: "2010_02_01".to_string(),
            band: "sur_refl_b02".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("sur_refl_b02"));
        assert!(msg.contains("2010_02_01"));
        assert_eq!(FailureKind::ExportFailure.to_string(), "ExportFailure");
    }
}
