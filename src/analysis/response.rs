// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Raw-trace preprocessing: response removal, band taper, resampling

use std::f64::consts::PI;

use num_complex::{Complex, Complex64};
use num_traits::Zero;
use realfft::RealFftPlanner;
use tracing::debug;

use super::segment::{cosine_taper, detrend_constant, detrend_linear};
use crate::config::PreprocessingConfig;
use crate::error::{SkipReason, UnitResult};
use crate::trace::{ContinuousTrace, InstrumentDescription, PolesZeros};

/// Fraction of the trace tapered at each end before transforming
const RAW_TAPER_FRACTION: f64 = 0.05;

/// Spectral water level below the response peak, in dB
const WATER_LEVEL_DB: f64 = 60.0;

/// Upstream transform applied to the whole trace before windowing
pub trait ResponseRemover: Send + Sync {
    /// Return a trace at the target rate, band-limited by `pre_filt`, with the
    /// instrument response divided out when required
    fn remove_response(
        &self,
        trace: &ContinuousTrace,
        instrument: &InstrumentDescription,
        pre_filt: [f64; 4],
    ) -> UnitResult<ContinuousTrace>;
}

/// Frequency-domain preprocessing of a raw trace
#[derive(Debug, Clone)]
pub struct SpectralPreprocessor {
    pub target_rate: f64,
    pub require_response: bool,
    pub water_level_db: f64,
}

impl SpectralPreprocessor {
    pub fn new(target_rate: f64, require_response: bool) -> Self {
        Self {
            target_rate,
            require_response,
            water_level_db: WATER_LEVEL_DB,
        }
    }

    pub fn from_config(config: &PreprocessingConfig) -> Self {
        Self::new(config.sampling_rate, config.remove_response)
    }
}

impl ResponseRemover for SpectralPreprocessor {
    fn remove_response(
        &self,
        trace: &ContinuousTrace,
        instrument: &InstrumentDescription,
        pre_filt: [f64; 4],
    ) -> UnitResult<ContinuousTrace> {
        trace.validate()?;
        let response = match (&instrument.response, self.require_response) {
            (Some(pz), true) => Some(pz),
            (None, true) => {
                return Err(SkipReason::MissingInstrumentMetadata(format!(
                    "{}.{}",
                    trace.id, trace.channel
                )))
            }
            (_, false) => None,
        };

        let mut data = trace.data.clone();
        detrend_constant(&mut data);
        detrend_linear(&mut data);
        cosine_taper(&mut data, trace.sample_rate, RAW_TAPER_FRACTION, f64::INFINITY);

        let rate = trace.sample_rate;
        let water_level = self.water_level_db;
        let data = filter_in_frequency(&data, rate, |freqs, spectrum| {
            if let Some(pz) = response {
                divide_response(spectrum, freqs, pz, water_level);
            }
            for (c, &f) in spectrum.iter_mut().zip(freqs) {
                *c *= band_taper(f, pre_filt);
            }
        })?;

        let data = if (rate - self.target_rate).abs() > 1e-9 * rate {
            debug!("{}.{}: resampling {} Hz -> {} Hz", trace.id, trace.channel, rate, self.target_rate);
            resample(&data, rate, self.target_rate)?
        } else {
            data
        };

        Ok(ContinuousTrace {
            id: trace.id.clone(),
            channel: trace.channel.clone(),
            starttime: trace.starttime,
            sample_rate: self.target_rate,
            data,
        })
    }
}

fn fft_error(err: realfft::FftError) -> SkipReason {
    SkipReason::InvalidTrace(format!("transform failed: {}", err))
}

/// Forward real transform, in-place edit of the spectrum, inverse back to
/// the same length
fn filter_in_frequency<F>(data: &[f64], sample_rate: f64, edit: F) -> UnitResult<Vec<f64>>
where
    F: FnOnce(&[f64], &mut [Complex64]),
{
    let n = data.len();
    if n < 2 {
        return Ok(data.to_vec());
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let c2r = planner.plan_fft_inverse(n);

    let mut input = data.to_vec();
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut input, &mut spectrum).map_err(fft_error)?;

    let df = sample_rate / n as f64;
    let freqs: Vec<f64> = (0..spectrum.len()).map(|k| k as f64 * df).collect();
    edit(&freqs, &mut spectrum);
    clear_edge_phases(&mut spectrum, n);

    let mut output = c2r.make_output_vec();
    c2r.process(&mut spectrum, &mut output).map_err(fft_error)?;
    let scale = 1.0 / n as f64;
    output.iter_mut().for_each(|x| *x *= scale);
    Ok(output)
}

/// DC and, for even lengths, Nyquist must be real for the inverse
fn clear_edge_phases(spectrum: &mut [Complex64], n: usize) {
    if let Some(dc) = spectrum.first_mut() {
        dc.im = 0.0;
    }
    if n % 2 == 0 {
        if let Some(nyquist) = spectrum.last_mut() {
            nyquist.im = 0.0;
        }
    }
}

/// Instrument response at frequency `f` in Hz
pub fn evaluate_response(pz: &PolesZeros, f: f64) -> Complex64 {
    let s = Complex::new(0.0, 2.0 * PI * f);
    let num = pz
        .zeros
        .iter()
        .fold(Complex::new(1.0, 0.0), |acc, z| acc * (s - Complex::new(z[0], z[1])));
    let den = pz
        .poles
        .iter()
        .fold(Complex::new(1.0, 0.0), |acc, p| acc * (s - Complex::new(p[0], p[1])));
    num / den * (pz.normalization * pz.sensitivity)
}

/// Divide the response out, raising its small values to the water level so
/// the inverse stays bounded
fn divide_response(spectrum: &mut [Complex64], freqs: &[f64], pz: &PolesZeros, water_level_db: f64) {
    let response: Vec<Complex64> = freqs.iter().map(|&f| evaluate_response(pz, f)).collect();
    let peak = response.iter().fold(0.0f64, |m, h| m.max(h.norm()));
    let floor = peak * 10f64.powf(-water_level_db / 20.0);

    for (c, h) in spectrum.iter_mut().zip(&response) {
        let amp = h.norm();
        *c = if amp == 0.0 {
            if floor == 0.0 {
                Complex64::zero()
            } else {
                *c / floor
            }
        } else if amp < floor {
            *c / (h * (floor / amp))
        } else {
            *c / h
        };
    }
}

/// Cosine band taper over the corners `[f1, f2, f3, f4]`
pub fn band_taper(f: f64, [f1, f2, f3, f4]: [f64; 4]) -> f64 {
    if f <= f1 || f >= f4 {
        0.0
    } else if f < f2 {
        0.5 * (1.0 - (PI * (f - f1) / (f2 - f1)).cos())
    } else if f <= f3 {
        1.0
    } else {
        0.5 * (1.0 + (PI * (f - f3) / (f4 - f3)).cos())
    }
}

/// Fourier resampling: the spectrum is truncated or zero-extended to the new
/// length, which doubles as an ideal low-pass when decimating
pub fn resample(data: &[f64], from_rate: f64, to_rate: f64) -> UnitResult<Vec<f64>> {
    let n = data.len();
    let n_out = (n as f64 * to_rate / from_rate).round() as usize;
    if n < 2 || n_out < 2 {
        return Err(SkipReason::InvalidTrace(format!(
            "cannot resample {} samples from {} Hz to {} Hz",
            n, from_rate, to_rate
        )));
    }

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let c2r = planner.plan_fft_inverse(n_out);

    let mut input = data.to_vec();
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut input, &mut spectrum).map_err(fft_error)?;

    let mut resized = c2r.make_input_vec();
    let shared = resized.len().min(spectrum.len());
    resized[..shared].copy_from_slice(&spectrum[..shared]);
    // an even-length Nyquist bin stands for both halves of a conjugate pair
    if n_out > n && n % 2 == 0 {
        resized[n / 2] *= 0.5;
    } else if n_out < n && n_out % 2 == 0 {
        resized[n_out / 2] *= 2.0;
    }
    clear_edge_phases(&mut resized, n_out);

    let mut output = c2r.make_output_vec();
    c2r.process(&mut resized, &mut output).map_err(fft_error)?;
    let scale = 1.0 / n as f64;
    output.iter_mut().for_each(|x| *x *= scale);
    Ok(output)
}
