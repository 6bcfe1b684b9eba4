use crate::error::FailureKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A scene that did not produce a record or an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub scene_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(scene_id: impl Into<String>, kind: FailureKind, message: impl fmt::Display) -> Self {
        Self {
            scene_id: scene_id.into(),
            kind,
            message: message.to_string(),
        }
    }
}

/// Counts for a completed (or stopped) run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Scenes matched by the filter
    pub matched: usize,
    /// Scenes processing was started for
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<Failure>,
    /// Set when a stop signal ended the run early
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(matched: usize) -> Self {
        Self {
            matched,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, failure: Failure) {
        tracing::warn!("{} failed ({}): {}", failure.scene_id, failure.kind, failure.message);
        self.attempted += 1;
        self.failures.push(failure);
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Matched scenes never started because of a stop signal.
    pub fn skipped(&self) -> usize {
        self.matched.saturating_sub(self.attempted)
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    pub fn failed_by_kind(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} matched, {} attempted, {} succeeded, {} failed",
            self.matched,
            self.attempted,
            self.succeeded,
            self.failed()
        )?;

        let by_kind = self.failed_by_kind();
        if !by_kind.is_empty() {
            let parts: Vec<String> = by_kind.iter().map(|(k, n)| format!("{}={}", k, n)).collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        if self.cancelled {
            write!(f, ", stopped early with {} skipped", self.skipped())?;
        }
        Ok(())
    }
}
