// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Time-domain normalization and the shared moving average

use rayon::prelude::*;
use ndarray::{Array2, Axis};

use crate::config::NormMode;

/// Centered moving average over `2 * half_width + 1` points, same length as
/// the input.
///
/// Edges are extended by repeating the first and last `half_width` samples as
/// blocks. A zero average is replaced by 1 so dividing by the result never
/// produces NaN or Inf.
pub fn moving_average(data: &[f64], half_width: usize) -> Vec<f64> {
    let len = data.len();
    if len == 0 {
        return Vec::new();
    }
    let pad = half_width.min(len);

    let padded: Vec<f64> = data[..pad]
        .iter()
        .chain(data)
        .chain(&data[len - pad..])
        .copied()
        .collect();

    let mut prefix = Vec::with_capacity(padded.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &x in &padded {
        acc += x;
        prefix.push(acc);
    }

    (0..len)
        .map(|j| {
            let center = j + pad;
            let lo = center.saturating_sub(half_width);
            let hi = (center + half_width + 1).min(padded.len());
            let avg = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
            if avg == 0.0 {
                1.0
            } else {
                avg
            }
        })
        .collect()
}

/// Sign of each sample; zero stays zero
pub fn one_bit(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Normalize every row of a packed frame independently
pub fn time_normalize(frame: &Array2<f64>, mode: NormMode, smooth_n: usize) -> Array2<f64> {
    match mode {
        NormMode::None => frame.clone(),
        NormMode::OneBit => frame.mapv(one_bit),
        NormMode::RunningMean => {
            let mut out = frame.clone();
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    let magnitude: Vec<f64> = row.iter().map(|x| x.abs()).collect();
                    let smooth = moving_average(&magnitude, smooth_n);
                    row.iter_mut().zip(&smooth).for_each(|(x, s)| *x /= s);
                });
            out
        }
    }
}
