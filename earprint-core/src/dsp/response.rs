//! Log-frequency magnitude responses and minimum-phase FIR synthesis.
//!
//! Responses live on a logarithmic grid (10 Hz up to Nyquist, ratio 1.01 between
//! points). Equalization curves computed on that grid are turned into FIR filters
//! with a cepstral minimum-phase reconstruction.

use rustfft::{num_complex::Complex, FftPlanner};

use super::{magnitude_response, next_pow2};

pub const DEFAULT_F_MIN: f64 = 10.0;
pub const DEFAULT_F_STEP: f64 = 1.01;
/// Frequency resolution (Hz) of synthesized minimum-phase filters.
pub const FIR_RESOLUTION_HZ: u32 = 10;

/// Logarithmically spaced frequencies from `f_min` up to and including `f_max`.
pub fn log_grid(f_min: f64, f_max: f64, step: f64) -> Vec<f64> {
    let mut out = Vec::new();
    let mut f = f_min;
    while f < f_max {
        out.push(f);
        f *= step;
    }
    out.push(f_max);
    out
}

/// Linear interpolation of `ys` sampled at ascending `xs`, clamped at both ends.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    let hi = xs.partition_point(|v| *v < x);
    let lo = hi - 1;
    let t = (x - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + t * (ys[hi] - ys[lo])
}

/// A magnitude response in dB on a log frequency grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyResponse {
    pub frequency: Vec<f64>,
    pub raw: Vec<f64>,
}

impl FrequencyResponse {
    pub fn new(frequency: Vec<f64>, raw: Vec<f64>) -> Self {
        debug_assert_eq!(frequency.len(), raw.len());
        Self { frequency, raw }
    }

    /// Magnitude response of an impulse response, resampled onto the log grid.
    pub fn from_impulse(data: &[f32], sample_rate: u32) -> Self {
        let n = next_pow2(data.len().max(sample_rate as usize / FIR_RESOLUTION_HZ as usize));
        let mut padded = data.to_vec();
        padded.resize(n, 0.0);
        let (bins, mags) = magnitude_response(&padded, sample_rate);

        let frequency = log_grid(DEFAULT_F_MIN, sample_rate as f64 / 2.0, DEFAULT_F_STEP);
        let raw = frequency.iter().map(|&f| interpolate(&bins, &mags, f)).collect();
        Self { frequency, raw }
    }

    /// Mean level of `raw` between `lo` and `hi` Hz inclusive.
    pub fn mean_in(&self, lo: f64, hi: f64) -> f64 {
        mean_between(&self.frequency, &self.raw, lo, hi)
    }

    /// Shifts the response so its mean between `lo` and `hi` Hz is 0 dB.
    ///
    /// Returns the applied gain in dB.
    pub fn center(&mut self, lo: f64, hi: f64) -> f64 {
        let gain = -self.mean_in(lo, hi);
        for v in &mut self.raw {
            *v += gain;
        }
        gain
    }

    /// Fractional-octave moving average of `raw`.
    pub fn smoothed(&self, octaves: f64) -> Vec<f64> {
        smooth(&self.frequency, &self.raw, octaves)
    }
}

pub(crate) fn mean_between(frequency: &[f64], values: &[f64], lo: f64, hi: f64) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (f, v) in frequency.iter().zip(values) {
        if *f >= lo && *f <= hi {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Averages every point with its neighbours within `octaves / 2` on either side.
pub fn smooth(frequency: &[f64], values: &[f64], octaves: f64) -> Vec<f64> {
    let n = values.len();
    if n == 0 || octaves <= 0.0 {
        return values.to_vec();
    }
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for v in values {
        prefix.push(prefix.last().copied().unwrap_or(0.0) + v);
    }

    let half = 2f64.powf(octaves / 2.0);
    let mut start = 0;
    let mut end = 0;
    let mut out = Vec::with_capacity(n);
    for &f in frequency {
        let lo = f / half;
        let hi = f * half;
        while start < n && frequency[start] < lo {
            start += 1;
        }
        while end < n && frequency[end] <= hi {
            end += 1;
        }
        out.push((prefix[end] - prefix[start]) / (end - start).max(1) as f64);
    }
    out
}

/// Equalization curve that cancels `error`, with boost capped at `max_gain` dB.
pub fn equalization(error: &[f64], max_gain: f64) -> Vec<f64> {
    error.iter().map(|e| (-e).min(max_gain)).collect()
}

/// Minimum-phase FIR whose magnitude follows `gain_db` sampled at `frequency`.
///
/// FFT size is the next power of two above `sample_rate / 10`; the returned
/// filter is half that length.
pub fn minimum_phase_fir(frequency: &[f64], gain_db: &[f64], sample_rate: u32) -> Vec<f32> {
    let n = next_pow2(sample_rate as usize / FIR_RESOLUTION_HZ as usize).max(2);
    let half = n / 2;
    let df = sample_rate as f64 / n as f64;

    // Log magnitude, mirrored so the cepstrum is real.
    let mut buf = vec![Complex::new(0.0f64, 0.0); n];
    for k in 0..=half {
        let db = interpolate(frequency, gain_db, k as f64 * df);
        let ln_mag = db / 20.0 * std::f64::consts::LN_10;
        buf[k].re = ln_mag;
        if k > 0 && k < half {
            buf[n - k].re = ln_mag;
        }
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);
    let scale = 1.0 / n as f64;

    inverse.process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex::new(c.re * scale, 0.0);
    }

    // Fold the anti-causal part onto the causal part.
    for (i, c) in buf.iter_mut().enumerate() {
        if i > 0 && i < half {
            c.re *= 2.0;
        } else if i > half {
            c.re = 0.0;
        }
    }

    forward.process(&mut buf);
    for c in buf.iter_mut() {
        *c = c.exp();
    }
    inverse.process(&mut buf);

    buf[..half].iter().map(|c| (c.re * scale) as f32).collect()
}
