// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! noisefft - ambient-noise preprocessing into windowed, whitened spectra
//!
//! Turns day-long continuous recordings from many stations into per-station
//! archives of complex half spectra, one row per fixed-length window, ready
//! for cross-correlation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Worker Pool                           │
//! │     one static share of stations per worker, joined at end   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────┐  ┌──────────┐  ┌─────────┐  ┌───────┐  ┌───────┐ │
//! │  │ Trace  │→ │ Metrics  │→ │ Segment │→ │ Pack  │→ │ Norm  │ │
//! │  │ Reader │  │ MAD/STD  │  │ windows │  │ frame │  │ time  │ │
//! │  └────────┘  └──────────┘  └─────────┘  └───────┘  └───────┘ │
//! │                                                       ↓      │
//! │                  ┌──────────────┐  ┌──────────────────────┐  │
//! │                  │ Station      │← │ Whitening / FFT      │  │
//! │                  │ Archive      │  │ half spectrum        │  │
//! │                  └──────────────┘  └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![allow(dead_code)]

pub mod core;
pub mod analysis;
pub mod archive;
pub mod config;
pub mod error;
pub mod trace;

// Re-exports for convenience
pub use config::{Config, NormMode, PreprocessingConfig};
pub use self::core::{compute_spectra, Engine, RunSummary, UnitOutcome};
pub use archive::{ArchiveStore, FrameSink, StationArchive};
pub use error::{SetupError, SkipReason};
pub use trace::{open_reader, prepare_run, ContinuousTrace, RunPlan, TraceReader, UnitHandle};

/// noisefft version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// noisefft name
pub const NAME: &str = "noisefft";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        threads: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Version string
    pub version: String,
    /// Target architecture
    pub target: String,
    /// Operating system
    pub os: String,
    /// Hardware threads available to the worker pool
    pub threads: usize,
}
