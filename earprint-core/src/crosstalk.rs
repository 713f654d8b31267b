//! Crosstalk cancellation filter design for loudspeaker playback.
//!
//! The four acoustic paths form a 2x2 transfer matrix per frequency bin,
//! `P[i][j]` = speaker `i` to ear `j`:
//!
//! ```text
//!        left ear        right ear
//! L spk  left_to_left    left_to_right
//! R spk  right_to_left   right_to_right
//! ```
//!
//! The filters are the regularized inverse `F = (P + λI)^-1`, so feeding the
//! speakers `out_l = x_l * LL + x_r * RL` and `out_r = x_l * LR + x_r * RR`
//! makes each ear hear only its own program channel.

use rustfft::{num_complex::Complex, FftPlanner};
use tracing::{debug, warn};

use crate::dsp::{next_pow2, to_complex};
use crate::error::{EarprintError, Result};
use crate::ir::HrirTable;
use crate::speaker::Speaker;

pub const DEFAULT_FILTER_LENGTH: usize = 256;
pub const DEFAULT_REGULARIZATION: f64 = 1e-6;

/// Measured speaker-to-ear impulse responses.
#[derive(Debug, Clone, PartialEq)]
pub struct CrosstalkPaths {
    pub left_to_left: Vec<f32>,
    pub left_to_right: Vec<f32>,
    pub right_to_left: Vec<f32>,
    pub right_to_right: Vec<f32>,
    pub sample_rate: u32,
}

impl CrosstalkPaths {
    /// Takes the four paths from two speakers of a table.
    pub fn from_table(table: &HrirTable, left_speaker: Speaker, right_speaker: Speaker) -> Result<Self> {
        let left = table
            .get(left_speaker)
            .ok_or(EarprintError::MissingChannel(left_speaker))?;
        let right = table
            .get(right_speaker)
            .ok_or(EarprintError::MissingChannel(right_speaker))?;
        Ok(Self {
            left_to_left: left.left.data.clone(),
            left_to_right: left.right.data.clone(),
            right_to_left: right.left.data.clone(),
            right_to_right: right.right.data.clone(),
            sample_rate: table.sample_rate(),
        })
    }

    fn longest(&self) -> usize {
        [
            &self.left_to_left,
            &self.left_to_right,
            &self.right_to_left,
            &self.right_to_right,
        ]
        .iter()
        .map(|p| p.len())
        .max()
        .unwrap_or(0)
    }
}

/// The four cancellation filters, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct CrosstalkFilterSet {
    pub ll: Vec<f32>,
    pub lr: Vec<f32>,
    pub rl: Vec<f32>,
    pub rr: Vec<f32>,
    pub sample_rate: u32,
    /// Bins whose matrix could not be inverted and were zeroed.
    pub singular_bins: usize,
}

impl CrosstalkFilterSet {
    pub fn len(&self) -> usize {
        self.ll.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ll.is_empty()
    }
}

/// Designs crosstalk cancellation filters of `length` taps.
///
/// Bins with a singular or non-finite matrix are zeroed and counted.
pub fn design_crosstalk_filters(paths: &CrosstalkPaths, length: usize, regularization: f64) -> CrosstalkFilterSet {
    let n = next_pow2(paths.longest() + length.max(1) - 1);
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let spectrum = |x: &[f32]| {
        let mut buf = to_complex(x, n);
        forward.process(&mut buf);
        buf
    };
    let h_ll = spectrum(&paths.left_to_left);
    let h_lr = spectrum(&paths.left_to_right);
    let h_rl = spectrum(&paths.right_to_left);
    let h_rr = spectrum(&paths.right_to_right);

    let zero = Complex::new(0.0, 0.0);
    let reg = Complex::new(regularization, 0.0);
    let mut f_ll = vec![zero; n];
    let mut f_lr = vec![zero; n];
    let mut f_rl = vec![zero; n];
    let mut f_rr = vec![zero; n];
    let mut singular_bins = 0;

    for k in 0..n {
        let p00 = h_ll[k] + reg;
        let p01 = h_lr[k];
        let p10 = h_rl[k];
        let p11 = h_rr[k] + reg;
        let det = p00 * p11 - p01 * p10;
        let inv_det = det.inv();
        if det.norm() <= f64::EPSILON * f64::EPSILON || !inv_det.re.is_finite() || !inv_det.im.is_finite() {
            singular_bins += 1;
            continue;
        }
        f_ll[k] = p11 * inv_det;
        f_lr[k] = -p01 * inv_det;
        f_rl[k] = -p10 * inv_det;
        f_rr[k] = p00 * inv_det;
    }

    let scale = 1.0 / n as f64;
    let taps = |mut buf: Vec<Complex<f64>>| -> Vec<f32> {
        inverse.process(&mut buf);
        buf[..length].iter().map(|c| (c.re * scale) as f32).collect()
    };
    let set = CrosstalkFilterSet {
        ll: taps(f_ll),
        lr: taps(f_lr),
        rl: taps(f_rl),
        rr: taps(f_rr),
        sample_rate: paths.sample_rate,
        singular_bins,
    };

    if singular_bins > 0 {
        warn!(singular_bins, fft_size = n, "crosstalk matrix singular in some bins, zeroed");
    }
    debug!(length, fft_size = n, regularization, "designed crosstalk filters");
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn flat_paths(direct: f32, cross: f32) -> CrosstalkPaths {
        CrosstalkPaths {
            left_to_left: vec![direct],
            left_to_right: vec![cross],
            right_to_left: vec![cross],
            right_to_right: vec![direct],
            sample_rate: 48_000,
        }
    }

    #[test]
    fn flat_matrix_inverts_exactly() {
        let set = design_crosstalk_filters(&flat_paths(1.0, 0.5), 8, 0.0);
        assert_eq!(set.len(), 8);
        assert_eq!(set.singular_bins, 0);
        assert_abs_diff_eq!(set.ll[0], 4.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(set.rr[0], 4.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(set.lr[0], -2.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(set.rl[0], -2.0 / 3.0, epsilon = 1e-6);
        assert!(set.ll[1..].iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn singular_bins_are_zeroed_not_fatal() {
        let set = design_crosstalk_filters(&flat_paths(1.0, 1.0), 4, 0.0);
        assert!(set.singular_bins > 0);
        assert!(set.ll.iter().chain(&set.rr).all(|v| *v == 0.0));
    }

    #[test]
    fn identity_paths_give_identity_filters() {
        let set = design_crosstalk_filters(&flat_paths(1.0, 0.0), DEFAULT_FILTER_LENGTH, DEFAULT_REGULARIZATION);
        assert_eq!(set.len(), DEFAULT_FILTER_LENGTH);
        assert_abs_diff_eq!(set.ll[0], 1.0, epsilon = 1e-5);
        assert!(set.lr.iter().all(|v| v.abs() < 1e-6));
    }
}
