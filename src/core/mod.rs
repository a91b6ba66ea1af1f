//! Core module - pipeline driver and worker distribution

mod engine;
mod scheduler;

pub use engine::{compute_spectra, Engine, SpectralFrame, UnitOutcome};
pub use scheduler::{assign, group_by_station, WorkerPool};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Steps a unit passes through, in order. A failure at any step ends the
/// unit as skipped; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineStage {
    Start,
    MetricsOk,
    Segmented,
    Packed,
    TimeNormalized,
    SpectrumComputed,
    Done,
    Skipped,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Start => "start",
            PipelineStage::MetricsOk => "metrics_ok",
            PipelineStage::Segmented => "segmented",
            PipelineStage::Packed => "packed",
            PipelineStage::TimeNormalized => "time_normalized",
            PipelineStage::SpectrumComputed => "spectrum_computed",
            PipelineStage::Done => "done",
            PipelineStage::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Counts gathered by one worker, or by the whole run once merged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub written: usize,
    pub skipped: usize,
    /// Windows stored across all written units
    pub windows: usize,
    /// Skips per reason tag
    pub skip_kinds: BTreeMap<String, usize>,
    /// Wall time; the longest worker's when merged
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &UnitOutcome) {
        match outcome {
            UnitOutcome::Written { windows, .. } => {
                self.written += 1;
                self.windows += windows;
            }
            UnitOutcome::Skipped(reason) => {
                self.skipped += 1;
                *self.skip_kinds.entry(reason.kind().to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.windows += other.windows;
        for (kind, n) in other.skip_kinds {
            *self.skip_kinds.entry(kind).or_insert(0) += n;
        }
        self.elapsed = self.elapsed.max(other.elapsed);
    }

    pub fn total(&self) -> usize {
        self.written + self.skipped
    }

    pub fn log(&self) {
        info!(
            "Processed {} units in {:.1}s: {} written ({} windows), {} skipped",
            self.total(),
            self.elapsed.as_secs_f64(),
            self.written,
            self.windows,
            self.skipped
        );
        for (kind, n) in &self.skip_kinds {
            warn!("  skipped {:>5} x {}", n, kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SkipReason;

    #[test]
    fn test_summary_merge() {
        let mut a = RunSummary::default();
        a.record(&UnitOutcome::Skipped(SkipReason::EmptyTagList));
        a.record(&UnitOutcome::Written {
            unit: "DM.S00.00 [2018_05_01 HHZ]".into(),
            windows: 47,
            nfft: 36000,
        });
        a.elapsed = Duration::from_secs(3);

        let mut b = RunSummary::default();
        b.record(&UnitOutcome::Skipped(SkipReason::EmptyTagList));
        b.record(&UnitOutcome::Skipped(SkipReason::DegenerateTrace { mad: 0.0, std: 0.0 }));
        b.elapsed = Duration::from_secs(5);

        a.merge(b);
        assert_eq!(a.total(), 4);
        assert_eq!(a.written, 1);
        assert_eq!(a.windows, 47);
        assert_eq!(a.skip_kinds["empty_tags"], 2);
        assert_eq!(a.skip_kinds["degenerate"], 1);
        assert_eq!(a.elapsed, Duration::from_secs(5));
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(PipelineStage::Start < PipelineStage::MetricsOk);
        assert!(PipelineStage::TimeNormalized < PipelineStage::SpectrumComputed);
        assert_eq!(PipelineStage::SpectrumComputed.to_string(), "spectrum_computed");
    }
}
