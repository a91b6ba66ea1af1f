//! Whole-day quality statistics

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{SkipReason, UnitResult};

/// Robust and classical scale of one day of samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayStatistics {
    /// Median absolute deviation from the median
    pub mad: f64,
    /// Population standard deviation
    pub std: f64,
}

impl DayStatistics {
    /// Compute both scales, refusing flat or corrupted days.
    /// A zero or non-finite statistic would turn every window metric into
    /// NaN or Inf, so the unit is skipped instead.
    pub fn compute(data: &[f64]) -> UnitResult<Self> {
        let mad = mad(data);
        let std = if data.is_empty() { f64::NAN } else { data.population_std_dev() };

        if !(mad.is_finite() && std.is_finite()) || mad == 0.0 || std == 0.0 {
            return Err(SkipReason::DegenerateTrace { mad, std });
        }
        Ok(Self { mad, std })
    }
}

/// Median; NaN for an empty slice
pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation; NaN for an empty slice
pub fn mad(data: &[f64]) -> f64 {
    let center = median(data);
    let deviations: Vec<f64> = data.iter().map(|&x| (x - center).abs()).collect();
    median(&deviations)
}
