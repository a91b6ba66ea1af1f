// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Spectral whitening
//!
//! Every row of a packed frame is transformed at the frame width. With
//! whitening enabled the amplitude spectrum is flattened inside
//! `[freqmin, freqmax]` while the phase is kept. A squared-cosine ramp of
//! `taper_bins` bins on each side of the band brings the amplitude down to
//! zero; DC, Nyquist and everything past the ramps are zeroed. The negative
//! frequencies are rebuilt as the conjugate mirror so each row stays the
//! spectrum of a real signal.

use std::f64::consts::FRAC_PI_2;

use ndarray::{s, Array2, Zip};
use num_complex::{Complex, Complex32, Complex64};
use num_traits::Zero;
use rustfft::FftPlanner;

use super::normalize::moving_average;
use crate::config::{NormMode, PreprocessingConfig};
use crate::error::{SkipReason, UnitResult};

/// Bin indices bounding the pass band and its tapers.
///
/// `low..left` is the rising ramp, `left..=right` the flat band and
/// `right+1..=high` the falling ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandEdges {
    pub low: usize,
    pub left: usize,
    pub right: usize,
    pub high: usize,
}

impl BandEdges {
    /// Ramp weight for bin `k`; 1 inside the band, 0 outside the ramps
    pub fn weight(&self, k: usize) -> f64 {
        if k >= self.left && k <= self.right {
            1.0
        } else if k >= self.low && k < self.left {
            let n = (self.left - self.low) as f64;
            let x = (k - self.low + 1) as f64 / (n + 1.0);
            (FRAC_PI_2 * x).sin().powi(2)
        } else if k > self.right && k <= self.high {
            let n = (self.high - self.right) as f64;
            let x = (k - self.right) as f64 / (n + 1.0);
            (FRAC_PI_2 * x).cos().powi(2)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct Whitener {
    pub mode: NormMode,
    pub dt: f64,
    pub freqmin: f64,
    pub freqmax: f64,
    pub smooth_n: usize,
    pub taper_bins: usize,
}

impl Whitener {
    /// Whitening settings for data sampled every `dt` seconds
    pub fn for_trace(config: &PreprocessingConfig, dt: f64) -> Self {
        Self {
            mode: config.whitening,
            dt,
            freqmin: config.freqmin,
            freqmax: config.freqmax,
            smooth_n: config.smooth_n,
            taper_bins: config.taper_bins,
        }
    }

    /// Locate the pass band among the positive-frequency bins of an
    /// `nfft`-point transform. DC is never part of the band.
    pub fn band(&self, nfft: usize) -> UnitResult<BandEdges> {
        let half = nfft / 2;
        let df = 1.0 / (nfft as f64 * self.dt);
        let in_band = |k: &usize| {
            let f = *k as f64 * df;
            f >= self.freqmin && f <= self.freqmax
        };

        let first = (1..half).find(in_band);
        let last = (1..half).rev().find(in_band);

        match (first, last) {
            (Some(left), Some(right)) => Ok(BandEdges {
                low: left.saturating_sub(self.taper_bins).max(1),
                left,
                right,
                high: (right + self.taper_bins).min(half - 1),
            }),
            _ => Err(SkipReason::EmptyBand {
                freqmin: self.freqmin,
                freqmax: self.freqmax,
                nfft,
                dt: self.dt,
            }),
        }
    }

    /// Full `rows x nfft` spectrum of every row, whitened per the mode
    pub fn apply(&self, frame: &Array2<f64>) -> UnitResult<Array2<Complex64>> {
        let nfft = frame.ncols();
        let band = match self.mode {
            NormMode::None => None,
            _ => Some(self.band(nfft)?),
        };

        let mut spectra = forward_fft(frame);
        if let Some(band) = band {
            let mode = self.mode;
            let smooth_n = self.smooth_n;
            Zip::from(spectra.rows_mut()).par_for_each(|mut row| {
                let mut buffer = row.to_vec();
                whiten_row(&mut buffer, &band, mode, smooth_n);
                row.assign(&ndarray::ArrayView1::from(&buffer[..]));
            });
        }
        Ok(spectra)
    }
}

/// Plain forward transform of every row at the row width
pub fn forward_fft(frame: &Array2<f64>) -> Array2<Complex64> {
    let nfft = frame.ncols();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nfft);

    let mut spectra = Array2::<Complex64>::zeros(frame.raw_dim());
    Zip::from(spectra.rows_mut())
        .and(frame.rows())
        .par_for_each(|mut out, input| {
            let mut buffer: Vec<Complex64> =
                input.iter().map(|&x| Complex::new(x, 0.0)).collect();
            fft.process(&mut buffer);
            out.assign(&ndarray::ArrayView1::from(&buffer[..]));
        });
    spectra
}

fn whiten_row(spectrum: &mut [Complex64], band: &BandEdges, mode: NormMode, smooth_n: usize) {
    let nfft = spectrum.len();
    let half = nfft / 2;

    // smoothed amplitude across the flat band only
    let smooth = match mode {
        NormMode::RunningMean => {
            let amp: Vec<f64> = spectrum[band.left..=band.right]
                .iter()
                .map(|c| c.norm())
                .collect();
            Some(moving_average(&amp, smooth_n))
        }
        _ => None,
    };

    for k in 0..half {
        let w = band.weight(k);
        spectrum[k] = if w == 0.0 {
            Complex64::zero()
        } else {
            match (&smooth, k >= band.left && k <= band.right) {
                (Some(avg), true) => spectrum[k] / avg[k - band.left],
                _ => Complex::from_polar(w, spectrum[k].arg()),
            }
        };
    }

    if half > 0 {
        spectrum[half] = Complex64::zero();
    }
    for k in 1..half {
        spectrum[nfft - k] = spectrum[k].conj();
    }
}

/// Non-redundant half of each row, narrowed to single precision for storage
pub fn half_spectrum(full: &Array2<Complex64>) -> Array2<Complex32> {
    let half = full.ncols() / 2;
    full.slice(s![.., ..half])
        .mapv(|c| Complex32::new(c.re as f32, c.im as f32))
}
