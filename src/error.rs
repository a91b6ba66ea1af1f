// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Error taxonomy
//!
//! Two tiers: [`SetupError`] aborts the run before any station-day is touched,
//! [`SkipReason`] abandons a single unit and lets the run continue.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for per-unit processing
pub type UnitResult<T> = Result<T, SkipReason>;

/// Fatal errors raised while discovering work
#[derive(Error, Debug)]
pub enum SetupError {
    /// Nothing to process under the input root
    #[error("no input files found under {0:?}")]
    NoInput(PathBuf),

    /// Format selector not one of the known readers
    #[error("data format '{0}' not understood, expected one of: archive, asdf, sac, mseed")]
    InvalidFormat(String),

    /// Known format without a reader in this build
    #[error("data format '{0}' is recognised but not supported")]
    UnsupportedFormat(String),

    /// Station table missing or without usable rows
    #[error("station table {0:?} is empty")]
    EmptyStationTable(PathBuf),

    /// Station table row could not be parsed
    #[error("station table {path:?} line {line}: {reason}")]
    BadStationRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Preprocessing parameters out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listing the input tree failed
    #[error("failed to scan {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a station-day-channel unit was abandoned
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Whole-day MAD or STD is zero or not finite
    #[error("degenerate trace: mad={mad}, std={std}")]
    DegenerateTrace { mad: f64, std: f64 },

    /// Trace shorter than one window
    #[error("no usable windows ({npts} samples, window of {window_length}s)")]
    NoUsableWindows { npts: usize, window_length: f64 },

    /// Source file corrupt or missing
    #[error("unreadable source: {0}")]
    Unreadable(String),

    /// Response removal required but no response attached
    #[error("missing instrument metadata for {0}")]
    MissingInstrumentMetadata(String),

    /// Archive holds no waveform tags for the station
    #[error("empty waveform tag list")]
    EmptyTagList,

    /// Whitening band holds no frequency bins at this sampling
    #[error("no frequency bins in [{freqmin}, {freqmax}] Hz at nfft={nfft}, dt={dt}")]
    EmptyBand {
        freqmin: f64,
        freqmax: f64,
        nfft: usize,
        dt: f64,
    },

    /// Trace metadata violates the data model
    #[error("invalid trace: {0}")]
    InvalidTrace(String),

    /// NaN or Inf reached the spectrum
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),

    /// Output archive refused the frame
    #[error("output sink failed: {0}")]
    Sink(String),
}

impl SkipReason {
    /// Short tag for log lines and run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::DegenerateTrace { .. } => "degenerate",
            SkipReason::NoUsableWindows { .. } => "no_windows",
            SkipReason::Unreadable(_) => "unreadable",
            SkipReason::MissingInstrumentMetadata(_) => "missing_response",
            SkipReason::EmptyTagList => "empty_tags",
            SkipReason::EmptyBand { .. } => "empty_band",
            SkipReason::InvalidTrace(_) => "invalid_trace",
            SkipReason::NonFinite(_) => "non_finite",
            SkipReason::Sink(_) => "sink",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_messages() {
        let skip = SkipReason::DegenerateTrace { mad: 0.0, std: 1.5 };
        assert_eq!(skip.kind(), "degenerate");
        assert!(skip.to_string().contains("mad=0"));

        let skip = SkipReason::NoUsableWindows { npts: 10, window_length: 3600.0 };
        assert!(skip.to_string().contains("3600"));
    }

    #[test]
    fn test_setup_error_messages() {
        let err = SetupError::InvalidFormat("segy".to_string());
        assert!(err.to_string().contains("segy"));
    }
}
