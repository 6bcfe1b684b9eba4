//! Reduce a scene band over a region to a single statistic.

use super::AggregateRecord;
use crate::error::SceneError;
use crate::scene::{Region, Scene};
use serde::{Deserialize, Serialize};

/// Reducer applied to the qualifying pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    #[default]
    Mean,
    Median,
    Min,
    Max,
    Sum,
    Count,
    StdDev,
}

impl StatisticKind {
    /// Apply to a non-empty slice. Sorts `values` for the median.
    fn compute(self, values: &mut [f64]) -> f64 {
        let n = values.len() as f64;
        match self {
            StatisticKind::Mean => values.iter().sum::<f64>() / n,
            StatisticKind::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
            StatisticKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            StatisticKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            StatisticKind::Sum => values.iter().sum(),
            StatisticKind::Count => n,
            StatisticKind::StdDev => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                var.sqrt()
            }
        }
    }
}

impl std::fmt::Display for StatisticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatisticKind::Mean => "mean",
            StatisticKind::Median => "median",
            StatisticKind::Min => "min",
            StatisticKind::Max => "max",
            StatisticKind::Sum => "sum",
            StatisticKind::Count => "count",
            StatisticKind::StdDev => "std_dev",
        };
        f.write_str(name)
    }
}

/// Result of reducing one scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    pub value: Option<f64>,
    pub pixel_count: usize,
}

/// Reduce `band` over pixels whose centre lies in `region` and that are valid
/// in the mask. NaN samples, and samples outside `valid_range` when given,
/// are ignored. No qualifying pixel gives `value = None`.
pub fn reduce(
    scene: &Scene,
    region: &Region,
    band: &str,
    kind: StatisticKind,
    valid_range: Option<[f64; 2]>,
) -> Result<Reduction, SceneError> {
    let grid = scene.band(band)?;

    let inside = region
        .pixel_mask(scene.crs(), scene.transform(), scene.shape())
        .map_err(|e| SceneError::InvalidParameter {
            name: "crs",
            value: scene.crs().to_string(),
            reason: format!("{:#}", e),
        })?;

    let mut values: Vec<f64> = grid
        .iter()
        .zip(scene.mask().iter())
        .zip(inside.iter())
        .filter(|((_, &valid), &in_region)| valid && in_region)
        .map(|((&v, _), _)| v as f64)
        .filter(|v| !v.is_nan())
        .filter(|v| match valid_range {
            Some([min, max]) => *v >= min && *v <= max,
            None => true,
        })
        .collect();

    let pixel_count = values.len();
    let value = if values.is_empty() {
        None
    } else {
        Some(kind.compute(&mut values))
    };

    Ok(Reduction { value, pixel_count })
}

/// Statistic-mode reducer bound to its settings.
#[derive(Debug, Clone)]
pub struct Reducer {
    pub region: Region,
    pub band: String,
    pub kind: StatisticKind,
    pub valid_range: Option<[f64; 2]>,
    pub source_label: String,
}

impl Reducer {
    /// Reduce a scene to its table row.
    pub fn record(&self, scene: &Scene) -> Result<AggregateRecord, SceneError> {
        let reduction = reduce(scene, &self.region, &self.band, self.kind, self.valid_range)?;

        tracing::debug!(
            "{}: {} of {} over {} pixels = {:?}",
            scene.id(),
            self.kind,
            self.band,
            reduction.pixel_count,
            reduction.value
        );

        Ok(AggregateRecord::new(
            scene.id(),
            scene.date(),
            reduction.value,
            reduction.pixel_count,
            self.source_label.clone(),
        ))
    }
}
