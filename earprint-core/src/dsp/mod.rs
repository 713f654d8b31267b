//! Offline signal helpers shared by the correction pipeline and the filter designers.
//!
//! Everything here allocates freely and works in `f64` internally; none of it is
//! called from the audio callback.

pub mod response;

use rustfft::{num_complex::Complex, FftPlanner};

/// Smallest power of two `>= x` (1 for `x == 0`).
pub fn next_pow2(x: usize) -> usize {
    x.max(1).next_power_of_two()
}

/// Smallest 5-smooth number (`2^a * 3^b * 5^c`) `>= x`.
pub fn next_fast_len(x: usize) -> usize {
    if x <= 1 {
        return 1;
    }
    let mut n = x;
    loop {
        let mut m = n;
        for p in [2, 3, 5] {
            while m % p == 0 {
                m /= p;
            }
        }
        if m == 1 {
            return n;
        }
        n += 1;
    }
}

/// Symmetric Hann window of length `m`.
pub fn hann(m: usize) -> Vec<f32> {
    match m {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (m - 1) as f64;
            (0..m)
                .map(|n| (0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / denom).cos()) as f32)
                .collect()
        }
    }
}

/// Unit impulse of length `n` scaled by `gain`.
pub fn unit_impulse(n: usize, gain: f32) -> Vec<f32> {
    let mut out = vec![0.0; n.max(1)];
    out[0] = gain;
    out
}

/// Index of the sample with the largest magnitude (first one on ties).
pub fn peak_index(data: &[f32]) -> usize {
    let mut best = 0;
    let mut best_abs = f32::NEG_INFINITY;
    for (i, v) in data.iter().enumerate() {
        let a = v.abs();
        if a > best_abs {
            best_abs = a;
            best = i;
        }
    }
    best
}

/// Zero-pads `data` to length `n` as complex samples.
pub(crate) fn to_complex(data: &[f32], n: usize) -> Vec<Complex<f64>> {
    let mut buf = vec![Complex::new(0.0, 0.0); n];
    for (dst, &src) in buf.iter_mut().zip(data) {
        dst.re = src as f64;
    }
    buf
}

/// Full linear convolution of `a` and `b` (length `a.len() + b.len() - 1`).
pub fn convolve(a: &[f32], b: &[f32]) -> Vec<f32> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let out_len = a.len() + b.len() - 1;
    let n = next_pow2(out_len);

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut fa = to_complex(a, n);
    let mut fb = to_complex(b, n);
    forward.process(&mut fa);
    forward.process(&mut fb);
    for (x, y) in fa.iter_mut().zip(&fb) {
        *x *= *y;
    }
    inverse.process(&mut fa);

    let scale = 1.0 / n as f64;
    fa[..out_len].iter().map(|c| (c.re * scale) as f32).collect()
}

/// Lag (in samples) that maximises the cross-correlation of `a` against `b`.
///
/// A positive lag means `a` arrives `lag` samples later than `b`.
pub fn correlation_lag(a: &[f32], b: &[f32]) -> isize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let reversed: Vec<f32> = b.iter().rev().copied().collect();
    let corr = convolve(a, &reversed);
    let mut best = 0;
    for (i, v) in corr.iter().enumerate() {
        if *v > corr[best] {
            best = i;
        }
    }
    best as isize - (b.len() as isize - 1)
}

/// Magnitude response in dB of `x` over the first half of an FFT of its own length.
///
/// Returns `(frequencies, magnitudes_db)`.
pub fn magnitude_response(x: &[f32], sample_rate: u32) -> (Vec<f64>, Vec<f64>) {
    let n = x.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let mut spectrum = to_complex(x, n);
    forward.process(&mut spectrum);

    let half = n.div_ceil(2);
    let df = sample_rate as f64 / n as f64;
    let freqs = (0..half).map(|k| k as f64 * df).collect();
    let mags = spectrum[..half]
        .iter()
        .map(|c| 20.0 * c.norm().max(1e-20).log10())
        .collect();
    (freqs, mags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fast_len_is_five_smooth() {
        assert_eq!(next_fast_len(1), 1);
        assert_eq!(next_fast_len(7), 8);
        assert_eq!(next_fast_len(11), 12);
        assert_eq!(next_fast_len(121), 125);
        assert_eq!(next_pow2(1000), 1024);
    }

    #[test]
    fn hann_is_symmetric_and_peaks_at_one() {
        let w = hann(9);
        assert_abs_diff_eq!(w[0], 0.0, epsilon = 1e-7);
        assert_abs_diff_eq!(w[4], 1.0, epsilon = 1e-7);
        assert_abs_diff_eq!(w[2], w[6], epsilon = 1e-7);
    }

    #[test]
    fn convolve_matches_direct_sum() {
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, -1.0];
        let out = convolve(&a, &b);
        let expected = [0.5, 0.0, -0.5, -3.0];
        assert_eq!(out.len(), expected.len());
        for (o, e) in out.iter().zip(expected) {
            assert_abs_diff_eq!(*o, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn correlation_lag_detects_delay() {
        let mut a = vec![0.0f32; 64];
        let mut b = vec![0.0f32; 64];
        a[20] = 1.0;
        b[14] = 1.0;
        assert_eq!(correlation_lag(&a, &b), 6);
        assert_eq!(correlation_lag(&b, &a), -6);
    }

    #[test]
    fn magnitude_response_of_impulse_is_flat() {
        let x = unit_impulse(32, 0.5);
        let (f, m) = magnitude_response(&x, 48_000);
        assert_eq!(f.len(), 16);
        for db in m {
            assert_abs_diff_eq!(db, 20.0 * 0.5f64.log10(), epsilon = 1e-9);
        }
    }
}
