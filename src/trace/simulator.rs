// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Synthetic ambient-noise traces for demo runs and tests

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::f64::consts::PI;
use std::path::Path;
use tracing::info;

use super::traits::{ContinuousTrace, InstrumentDescription, PolesZeros, StationId, StationLocation};
use crate::archive::StationArchive;

/// Generates day-long noise recordings with a microseism peak and
/// occasional transients
pub struct TraceSimulator {
    rng: StdRng,
    sample_rate: f64,
    noise_level: f64,
    microseism_freq: f64,
    microseism_amplitude: f64,
    /// Expected transients per hour
    event_rate: f64,
    event_amplitude: f64,
}

impl TraceSimulator {
    pub fn new(sample_rate: f64) -> Self {
        Self::from_rng(StdRng::from_entropy(), sample_rate)
    }

    pub fn seeded(sample_rate: f64, seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed), sample_rate)
    }

    fn from_rng(rng: StdRng, sample_rate: f64) -> Self {
        Self {
            rng,
            sample_rate,
            noise_level: 1.0,
            microseism_freq: 0.14,
            microseism_amplitude: 2.0,
            event_rate: 0.5,
            event_amplitude: 50.0,
        }
    }

    pub fn with_noise_level(mut self, level: f64) -> Self {
        self.noise_level = level;
        self
    }

    pub fn with_event_rate(mut self, per_hour: f64) -> Self {
        self.event_rate = per_hour;
        self
    }

    pub fn noise_trace(
        &mut self,
        id: StationId,
        channel: &str,
        start: DateTime<Utc>,
        duration: f64,
    ) -> ContinuousTrace {
        let npts = (duration * self.sample_rate).round() as usize;
        let dt = 1.0 / self.sample_rate;

        let phase = self.rng.gen_range(0.0..2.0 * PI);
        let drift = self.rng.gen_range(-1e-4..1e-4);
        let mut data: Vec<f64> = (0..npts)
            .map(|i| {
                let t = i as f64 * dt;
                self.microseism_amplitude * (2.0 * PI * self.microseism_freq * t + phase).sin()
                    + drift * t
                    + self.noise_level * self.rng.sample::<f64, _>(StandardNormal)
            })
            .collect();

        let expected_events = self.event_rate * duration / 3600.0;
        let events = expected_events.floor() as usize
            + usize::from(self.rng.gen_bool(expected_events.fract().clamp(0.0, 1.0)));
        for _ in 0..events {
            self.add_transient(&mut data);
        }

        ContinuousTrace::new(id, channel, start, self.sample_rate, data)
    }

    /// Decaying wave packet standing in for an earthquake arrival
    fn add_transient(&mut self, data: &mut [f64]) {
        if data.is_empty() {
            return;
        }
        let onset = self.rng.gen_range(0..data.len());
        let freq = self.rng.gen_range(0.5..3.0);
        let decay = self.rng.gen_range(0.02..0.2);
        let amplitude = self.event_amplitude * self.rng.gen_range(0.5..2.0);
        let dt = 1.0 / self.sample_rate;

        for (k, sample) in data[onset..].iter_mut().enumerate() {
            let t = k as f64 * dt;
            let envelope = (-decay * t).exp();
            if envelope < 1e-4 {
                break;
            }
            *sample += amplitude * envelope * (2.0 * PI * freq * t).sin();
        }
    }
}

/// A dead channel: every sample identical
pub fn flat_trace(
    id: StationId,
    channel: &str,
    start: DateTime<Utc>,
    duration: f64,
    sample_rate: f64,
    value: f64,
) -> ContinuousTrace {
    let npts = (duration * sample_rate).round() as usize;
    ContinuousTrace::new(id, channel, start, sample_rate, vec![value; npts])
}

/// Velocity sensor with a 1 Hz corner
pub fn demo_instrument() -> InstrumentDescription {
    let corner = 2.0 * PI;
    let damping = 0.707;
    let re = -damping * corner;
    let im = corner * (1.0 - damping * damping).sqrt();
    InstrumentDescription {
        response: Some(PolesZeros {
            poles: vec![[re, im], [re, -im]],
            zeros: vec![[0.0, 0.0], [0.0, 0.0]],
            normalization: 1.0,
            sensitivity: 1.0e3,
        }),
    }
}

/// Write one archive per station holding `days` day-long recordings.
/// The first station also carries a dead `HHE` channel on every day.
pub fn write_demo_archives(
    dir: &Path,
    stations: usize,
    days: usize,
    day_length: f64,
    sample_rate: f64,
    seed: u64,
) -> Result<usize> {
    std::fs::create_dir_all(dir)?;
    let first_day = DateTime::parse_from_rfc3339("2018-05-01T00:00:00Z")?.with_timezone(&Utc);
    let mut sim = TraceSimulator::seeded(sample_rate, seed);
    let mut written = 0;

    for s in 0..stations {
        let location = StationLocation {
            id: StationId::new("DM", &format!("S{:02}", s), "00"),
            latitude: -41.0 + s as f64 * 0.25,
            longitude: 174.5 + s as f64 * 0.25,
            elevation: 100.0 + 10.0 * s as f64,
        };
        let archive = StationArchive::open(&dir.join(format!("{}.db", location.id)))?;
        archive.add_station(&location, &demo_instrument())?;

        for d in 0..days {
            let start = first_day + Duration::days(d as i64);
            let date = start.format("%Y_%m_%d");

            let trace = sim.noise_trace(location.id.clone(), "HHZ", start, day_length);
            archive.add_waveform(&format!("raw_recording_{}_HHZ", date), &trace)?;
            written += 1;

            if s == 0 {
                let dead = flat_trace(location.id.clone(), "HHE", start, day_length, sample_rate, 0.0);
                archive.add_waveform(&format!("raw_recording_{}_HHE", date), &dead)?;
                written += 1;
            }
        }
    }

    info!("Synthesized {} demo recordings for {} stations in {:?}", written, stations, dir);
    Ok(written)
}
