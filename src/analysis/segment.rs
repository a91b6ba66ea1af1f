// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Window segmenter - fixed-length, fixed-step slices of a continuous trace

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::statistics::DayStatistics;
use crate::error::{SkipReason, UnitResult};
use crate::trace::{epoch_seconds, ContinuousTrace};

/// Fraction of each window tapered at either end
pub const TAPER_FRACTION: f64 = 0.05;

/// Upper bound on each taper in seconds
pub const TAPER_MAX_SECONDS: f64 = 20.0;

/// Quality scalars recorded per window before tapering
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    /// max(|x|) / whole-day MAD
    pub max_over_mad: f64,
    /// max(|x|) / whole-day STD
    pub max_over_std: f64,
    /// Share of samples that are not exactly zero
    pub nonzero_fraction: f64,
}

/// One detrended, tapered slice
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub samples: Vec<f64>,
    /// Seconds since epoch of the first sample
    pub start: f64,
    /// Seconds since epoch of the last sample
    pub end: f64,
    pub metrics: WindowMetrics,
}

impl Window {
    /// True sample count
    pub fn npts(&self) -> usize {
        self.samples.len()
    }
}

/// Windows cut from one trace with a shared length and step
#[derive(Debug, Clone)]
pub struct WindowSet {
    pub window_length: f64,
    pub step: f64,
    pub sample_rate: f64,
    pub windows: Vec<Window>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Longest true sample count in the set
    pub fn max_npts(&self) -> usize {
        self.windows.iter().map(Window::npts).max().unwrap_or(0)
    }
}

/// Sample ranges `[i0, i1)` of every window that fits entirely inside the trace.
///
/// Window `k` starts `k * step` seconds after the first sample and is emitted
/// only while its end does not pass the end of the trace, taken as
/// `npts / sample_rate`.
pub fn window_bounds(npts: usize, sample_rate: f64, window_length: f64, step: f64) -> Vec<(usize, usize)> {
    let duration = npts as f64 / sample_rate;
    let tolerance = 1e-9 * duration.max(1.0);

    let mut bounds = Vec::new();
    let mut k = 0usize;
    loop {
        let offset = k as f64 * step;
        if offset + window_length > duration + tolerance {
            break;
        }
        let i0 = (offset * sample_rate).round() as usize;
        let i1 = (((offset + window_length) * sample_rate).round() as usize).min(npts);
        if i1 > i0 {
            bounds.push((i0, i1));
        }
        k += 1;
    }
    bounds
}

/// Slides windows across a trace
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    pub window_length: f64,
    pub step: f64,
}

impl Segmenter {
    pub fn new(window_length: f64, step: f64) -> Self {
        Self { window_length, step }
    }

    /// Detrend each window, record its metrics against the day statistics,
    /// then taper it. The input trace is left untouched.
    pub fn segment(&self, trace: &ContinuousTrace, stats: &DayStatistics) -> UnitResult<WindowSet> {
        trace.validate()?;
        let rate = trace.sample_rate;
        let t0 = epoch_seconds(trace.starttime);

        let windows: Vec<Window> = window_bounds(trace.npts(), rate, self.window_length, self.step)
            .into_iter()
            .map(|(i0, i1)| {
                let mut samples = trace.data[i0..i1].to_vec();
                detrend_constant(&mut samples);
                detrend_linear(&mut samples);

                let peak = samples.iter().fold(0.0f64, |m, x| m.max(x.abs()));
                let nonzero = samples.iter().filter(|&&x| x != 0.0).count();
                let metrics = WindowMetrics {
                    max_over_mad: peak / stats.mad,
                    max_over_std: peak / stats.std,
                    nonzero_fraction: nonzero as f64 / samples.len() as f64,
                };

                cosine_taper(&mut samples, rate, TAPER_FRACTION, TAPER_MAX_SECONDS);

                let start = t0 + i0 as f64 / rate;
                Window {
                    end: start + (samples.len() - 1) as f64 / rate,
                    start,
                    samples,
                    metrics,
                }
            })
            .collect();

        if windows.is_empty() {
            return Err(SkipReason::NoUsableWindows {
                npts: trace.npts(),
                window_length: self.window_length,
            });
        }

        Ok(WindowSet {
            window_length: self.window_length,
            step: self.step,
            sample_rate: rate,
            windows,
        })
    }
}

/// Remove the mean
pub fn detrend_constant(data: &mut [f64]) {
    if data.is_empty() {
        return;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    data.iter_mut().for_each(|x| *x -= mean);
}

/// Remove the least-squares line through the samples
pub fn detrend_linear(data: &mut [f64]) {
    let n = data.len();
    if n < 2 {
        detrend_constant(data);
        return;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = data.iter().sum::<f64>() / n as f64;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &y) in data.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;

    for (i, y) in data.iter_mut().enumerate() {
        *y -= y_mean + slope * (i as f64 - x_mean);
    }
}

/// Hann taper on both ends; each side covers `max_percentage` of the samples
/// but at most `max_length` seconds
pub fn cosine_taper(data: &mut [f64], sample_rate: f64, max_percentage: f64, max_length: f64) {
    let npts = data.len();
    let by_fraction = (max_percentage * npts as f64) as usize;
    let by_length = (max_length * sample_rate) as usize;
    let wlen = by_fraction.min(by_length).min(npts / 2);
    if wlen == 0 {
        return;
    }

    let sides = if 2 * wlen == npts { hann(2 * wlen) } else { hann(2 * wlen + 1) };
    let tail = &sides[sides.len() - wlen..];
    for i in 0..wlen {
        data[i] *= sides[i];
        data[npts - wlen + i] *= tail[i];
    }
}

/// Symmetric Hann window of `m` points
fn hann(m: usize) -> Vec<f64> {
    if m == 1 {
        return vec![1.0];
    }
    (0..m)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / (m - 1) as f64).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::StationId;
    use chrono::{TimeZone, Utc};

    fn trace(duration: f64, rate: f64) -> ContinuousTrace {
        let npts = (duration * rate) as usize;
        let data = (0..npts).map(|i| (i as f64 * 0.37).sin() + 0.001 * i as f64).collect();
        ContinuousTrace::new(
            StationId::new("NZ", "WEL", "10"),
            "HHZ",
            Utc.with_ymd_and_hms(2018, 5, 1, 0, 0, 0).unwrap(),
            rate,
            data,
        )
    }

    fn stats() -> DayStatistics {
        DayStatistics { mad: 0.5, std: 0.7 }
    }

    #[test]
    fn test_window_count_formula() {
        // floor((L - W) / S) + 1 when L >= W
        for (l, w, s) in [(3600.0, 3600.0, 1800.0), (3600.0, 1800.0, 1800.0), (3600.0, 1800.0, 900.0), (86400.0, 3600.0, 1800.0), (5000.0, 1800.0, 700.0)] {
            let expected = ((l - w) / s as f64).floor() as usize + 1;
            assert_eq!(window_bounds((l * 10.0) as usize, 10.0, w, s).len(), expected, "L={} W={} S={}", l, w, s);
        }
        assert!(window_bounds(35_999, 10.0, 3600.0, 1800.0).is_empty());
    }

    #[test]
    fn test_hour_trace_scenarios() {
        let tr = trace(3600.0, 10.0);
        assert_eq!(Segmenter::new(3600.0, 1800.0).segment(&tr, &stats()).unwrap().len(), 1);

        let halves = Segmenter::new(1800.0, 1800.0).segment(&tr, &stats()).unwrap();
        assert_eq!(halves.len(), 2);
        assert_eq!(halves.windows[1].start - halves.windows[0].start, 1800.0);
        assert!(halves.windows[0].end < halves.windows[1].start);

        let overlapping = Segmenter::new(1800.0, 900.0).segment(&tr, &stats()).unwrap();
        assert_eq!(overlapping.len(), 3);
        assert!(overlapping.windows.iter().all(|w| w.npts() == 18_000));
    }

    #[test]
    fn test_short_trace_has_no_windows() {
        let tr = trace(100.0, 10.0);
        let err = Segmenter::new(3600.0, 1800.0).segment(&tr, &stats()).unwrap_err();
        assert!(matches!(err, SkipReason::NoUsableWindows { npts: 1000, .. }));
    }

    #[test]
    fn test_segment_does_not_touch_input() {
        let tr = trace(600.0, 10.0);
        let before = tr.clone();
        Segmenter::new(300.0, 150.0).segment(&tr, &stats()).unwrap();
        assert_eq!(tr, before);
    }

    #[test]
    fn test_metrics_use_detrended_peak() {
        let mut tr = trace(100.0, 1.0);
        tr.data = vec![10.0; 100];
        tr.data[50] = 14.0;
        let set = Segmenter::new(100.0, 100.0).segment(&tr, &stats()).unwrap();
        let m = set.windows[0].metrics;
        // mean 10.04 removed, no linear trend left to speak of
        assert!((m.max_over_mad - 3.96 / 0.5).abs() < 0.05);
        assert!((m.max_over_std - 3.96 / 0.7).abs() < 0.05);
        assert_eq!(m.nonzero_fraction, 1.0);
    }

    #[test]
    fn test_detrend_linear_removes_ramp() {
        let mut data: Vec<f64> = (0..50).map(|i| 3.0 + 0.5 * i as f64).collect();
        detrend_linear(&mut data);
        assert!(data.iter().all(|x| x.abs() < 1e-10));
    }

    #[test]
    fn test_taper_capped_at_twenty_seconds() {
        // 5% of 10000 samples would be 500, 20 s at 10 Hz is 200
        let mut data = vec![1.0; 10_000];
        cosine_taper(&mut data, 10.0, TAPER_FRACTION, TAPER_MAX_SECONDS);
        assert_eq!(data[0], 0.0);
        assert!(data[199] < 1.0);
        assert_eq!(data[200], 1.0);
        assert_eq!(data[9_799], 1.0);
        assert!(data[9_800] < 1.0);
        assert!(data[9_999].abs() < 1e-12);
    }

    #[test]
    fn test_taper_uses_five_percent_on_short_windows() {
        let mut data = vec![1.0; 100];
        cosine_taper(&mut data, 10.0, TAPER_FRACTION, TAPER_MAX_SECONDS);
        assert_eq!(data[0], 0.0);
        assert!(data[4] < 1.0);
        assert_eq!(data[5], 1.0);
        assert_eq!(data[94], 1.0);
        assert!(data[95] < 1.0);
    }
}
