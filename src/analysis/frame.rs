//! Frame packer - variable-length windows into one zero-padded matrix

use ndarray::{Array2, ArrayView1, Axis};

use super::segment::WindowSet;

/// Smallest 5-smooth integer (only factors 2, 3, 5) not below `n`
pub fn next_fast_len(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let mut m = n;
    while !is_five_smooth(m) {
        m += 1;
    }
    m
}

fn is_five_smooth(mut m: usize) -> bool {
    for p in [2, 3, 5] {
        while m % p == 0 {
            m /= p;
        }
    }
    m == 1
}

/// Row width for a set whose longest window has `max_npts` samples: the
/// smallest even 5-smooth size, never below 2
pub fn padded_width(max_npts: usize) -> usize {
    let mut m = next_fast_len(max_npts.max(2));
    while m % 2 != 0 {
        m = next_fast_len(m + 1);
    }
    m
}

/// Windows of one unit packed row by row
#[derive(Debug, Clone)]
pub struct PackedFrame {
    /// `num_windows x padded_width`, zero beyond each row's true length
    pub data: Array2<f64>,
    /// True sample count of each row
    pub npts: Vec<usize>,
    /// `num_windows x 2`: start and end, seconds since epoch
    pub timestamps: Array2<f64>,
    /// `num_windows x 3`: max/MAD, max/STD, nonzero fraction
    pub metrics: Array2<f64>,
}

impl PackedFrame {
    pub fn pack(set: &WindowSet) -> Self {
        let rows = set.len();
        let width = padded_width(set.max_npts());

        let mut data = Array2::<f64>::zeros((rows, width));
        let mut timestamps = Array2::<f64>::zeros((rows, 2));
        let mut metrics = Array2::<f64>::zeros((rows, 3));
        let mut npts = Vec::with_capacity(rows);

        for (i, window) in set.windows.iter().enumerate() {
            let n = window.npts();
            data.row_mut(i)
                .slice_mut(ndarray::s![..n])
                .assign(&ArrayView1::from(&window.samples[..]));
            timestamps[[i, 0]] = window.start;
            timestamps[[i, 1]] = window.end;
            metrics[[i, 0]] = window.metrics.max_over_mad;
            metrics[[i, 1]] = window.metrics.max_over_std;
            metrics[[i, 2]] = window.metrics.nonzero_fraction;
            npts.push(n);
        }

        Self {
            data,
            npts,
            timestamps,
            metrics,
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Padded row width, also the transform length
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Axis along which each window's samples run
    pub fn transform_axis(&self) -> Axis {
        Axis(self.data.ndim() - 1)
    }
}
