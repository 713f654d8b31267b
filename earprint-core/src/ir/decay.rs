//! Decay analysis used to find where an impulse response sinks into its noise floor.

use super::ImpulseResponse;

/// Result of analysing an impulse response's decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayParams {
    pub peak_index: usize,
    /// First sample after which the response stays at the noise floor.
    pub knee_point_index: usize,
    pub noise_floor_db: f64,
    pub window_size: usize,
}

/// Estimates decay parameters of an impulse response.
///
/// Returns `None` when the response is too short, silent, or has no decay
/// above its noise floor.
pub trait DecayAnalyzer {
    fn decay_params(&self, ir: &ImpulseResponse) -> Option<DecayParams>;
}

/// Windowed-energy decay analyzer.
///
/// The noise floor is the mean energy of the last tenth of the response. The
/// knee is the first window after the peak whose level falls within
/// `margin_db` of that floor.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeDecayAnalyzer {
    pub window_ms: f32,
    pub margin_db: f64,
}

impl Default for EnvelopeDecayAnalyzer {
    fn default() -> Self {
        Self {
            window_ms: 1.0,
            margin_db: 3.0,
        }
    }
}

fn energy_db(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }
    let energy = samples.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / samples.len() as f64;
    10.0 * energy.max(1e-20).log10()
}

impl DecayAnalyzer for EnvelopeDecayAnalyzer {
    fn decay_params(&self, ir: &ImpulseResponse) -> Option<DecayParams> {
        let data = &ir.data;
        let window = ((ir.sample_rate() as f32 * self.window_ms / 1000.0) as usize).max(1);
        let peak = ir.peak_index();
        let peak_value = data.get(peak).copied().unwrap_or(0.0);
        if peak_value == 0.0 || !peak_value.is_finite() {
            return None;
        }
        let tail = data.len() - peak;
        if tail < 2 * window {
            return None;
        }

        let floor_start = data.len() - (data.len() / 10).max(1);
        let noise_floor_db = energy_db(&data[floor_start.max(peak)..]);

        let mut start = peak;
        while start < data.len() {
            let end = (start + window).min(data.len());
            if energy_db(&data[start..end]) <= noise_floor_db + self.margin_db {
                if start == peak {
                    return None;
                }
                return Some(DecayParams {
                    peak_index: peak,
                    knee_point_index: start,
                    noise_floor_db,
                    window_size: window,
                });
            }
            start = end;
        }
        None
    }
}
