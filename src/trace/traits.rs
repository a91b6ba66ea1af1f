// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Trace data model and the reader seam

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{SetupError, SkipReason, UnitResult};

/// Network / station / location code triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId {
    pub network: String,
    pub station: String,
    pub location: String,
}

impl StationId {
    pub fn new(network: &str, station: &str, location: &str) -> Self {
        let location = if location.trim().is_empty() { "00" } else { location.trim() };
        Self {
            network: network.trim().to_string(),
            station: station.trim().to_string(),
            location: location.to_string(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.network, self.station, self.location)
    }
}

/// Where a station sits; read once, never modified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationLocation {
    pub id: StationId,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    pub elevation: f64,
}

/// Poles and zeros of the instrument transfer function in rad/s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolesZeros {
    /// `[re, im]` pairs
    pub poles: Vec<[f64; 2]>,
    pub zeros: Vec<[f64; 2]>,
    /// A0 normalization factor
    pub normalization: f64,
    /// Overall sensitivity, counts per ground unit
    pub sensitivity: f64,
}

/// What is known about the recording instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDescription {
    pub response: Option<PolesZeros>,
}

impl InstrumentDescription {
    pub fn without_response() -> Self {
        Self { response: None }
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }
}

/// One continuous span of samples for one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousTrace {
    pub id: StationId,
    pub channel: String,
    pub starttime: DateTime<Utc>,
    /// Hz
    pub sample_rate: f64,
    pub data: Vec<f64>,
}

impl ContinuousTrace {
    pub fn new(
        id: StationId,
        channel: &str,
        starttime: DateTime<Utc>,
        sample_rate: f64,
        data: Vec<f64>,
    ) -> Self {
        Self {
            id,
            channel: channel.to_string(),
            starttime,
            sample_rate,
            data,
        }
    }

    pub fn npts(&self) -> usize {
        self.data.len()
    }

    pub fn delta(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Span covered by the samples, including the interval after the last one
    pub fn duration(&self) -> f64 {
        self.npts() as f64 / self.sample_rate
    }

    /// Time of the last sample
    pub fn endtime(&self) -> DateTime<Utc> {
        let last = self.npts().saturating_sub(1) as f64 * self.delta();
        offset_time(self.starttime, last)
    }

    /// `YYYY_MM_DD` of the first sample
    pub fn day_label(&self) -> String {
        day_label(self.starttime)
    }

    pub fn validate(&self) -> UnitResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(SkipReason::InvalidTrace(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }

    /// Join pieces of one channel into a single trace, zero-filling gaps.
    /// Later pieces win where pieces overlap.
    pub fn merge(mut parts: Vec<ContinuousTrace>) -> UnitResult<ContinuousTrace> {
        if parts.is_empty() {
            return Err(SkipReason::InvalidTrace("nothing to merge".into()));
        }
        parts.sort_by_key(|p| p.starttime);
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }

        let first = &parts[0];
        first.validate()?;
        let rate = first.sample_rate;
        let start = first.starttime;

        let mut placed = Vec::with_capacity(parts.len());
        let mut total = 0usize;
        for part in &parts {
            if (part.sample_rate - rate).abs() > 1e-9 * rate {
                return Err(SkipReason::InvalidTrace(format!(
                    "cannot merge {} Hz with {} Hz",
                    part.sample_rate, rate
                )));
            }
            let offset = ((epoch_seconds(part.starttime) - epoch_seconds(start)) * rate).round();
            let offset = offset.max(0.0) as usize;
            total = total.max(offset + part.npts());
            placed.push(offset);
        }

        let mut data = vec![0.0; total];
        for (part, &offset) in parts.iter().zip(&placed) {
            data[offset..offset + part.npts()].copy_from_slice(&part.data);
        }

        Ok(ContinuousTrace {
            id: parts[0].id.clone(),
            channel: parts[0].channel.clone(),
            starttime: start,
            sample_rate: rate,
            data,
        })
    }
}

/// Seconds since the Unix epoch as a float
pub fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + t.timestamp_subsec_nanos() as f64 * 1e-9
}

pub fn offset_time(t: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    t + Duration::nanoseconds((seconds * 1e9).round() as i64)
}

pub fn day_label(t: DateTime<Utc>) -> String {
    t.format("%Y_%m_%d").to_string()
}

/// Where a unit's samples live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSource {
    /// One waveform tag of a station archive; `None` when the archive lists no tags
    Archive { path: PathBuf, tag: Option<String> },
    /// SAC files holding pieces of the same channel-day
    SacFiles { paths: Vec<PathBuf> },
}

/// One station-day-channel of work, as discovered by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    pub station: StationId,
    /// Human-readable tag for log lines
    pub label: String,
    pub source: UnitSource,
}

impl fmt::Display for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.station, self.label)
    }
}

/// Everything the pipeline needs for one unit
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub trace: ContinuousTrace,
    pub location: StationLocation,
    pub instrument: InstrumentDescription,
}

/// Produces work units and loads their samples
pub trait TraceReader: Send + Sync {
    /// Short format name for logs
    fn name(&self) -> &'static str;

    /// Discover every unit under the input root
    fn list_units(&self) -> Result<Vec<UnitHandle>, SetupError>;

    /// Read one unit's trace, location and instrument
    fn load(&self, unit: &UnitHandle) -> UnitResult<LoadedUnit>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn piece(start_sec: i64, data: Vec<f64>) -> ContinuousTrace {
        let t0 = Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap();
        ContinuousTrace::new(
            StationId::new("NZ", "WEL", ""),
            "HHZ",
            t0 + Duration::seconds(start_sec),
            1.0,
            data,
        )
    }

    #[test]
    fn test_station_id_defaults_location() {
        let id = StationId::new("NZ", "WEL", " ");
        assert_eq!(id.to_string(), "NZ.WEL.00");
    }

    #[test]
    fn test_duration_and_endtime() {
        let trace = piece(0, vec![1.0; 10]);
        assert_eq!(trace.duration(), 10.0);
        assert_eq!(trace.endtime() - trace.starttime, Duration::seconds(9));
        assert_eq!(trace.day_label(), "2018_05_01");
    }

    #[test]
    fn test_merge_zero_fills_gap() {
        let a = piece(0, vec![1.0, 2.0, 3.0]);
        let b = piece(5, vec![4.0, 5.0]);

        let merged = ContinuousTrace::merge(vec![b, a]).unwrap();
        assert_eq!(merged.data, vec![1.0, 2.0, 3.0, 0.0, 0.0, 4.0, 5.0]);
        assert_eq!(merged.starttime, piece(0, vec![]).starttime);
    }

    #[test]
    fn test_merge_rejects_mixed_rates() {
        let a = piece(0, vec![1.0; 3]);
        let mut b = piece(3, vec![1.0; 3]);
        b.sample_rate = 2.0;
        assert!(ContinuousTrace::merge(vec![a, b]).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut trace = piece(0, vec![1.0; 3]);
        trace.sample_rate = 0.0;
        assert!(matches!(trace.validate(), Err(SkipReason::InvalidTrace(_))));
    }
}
