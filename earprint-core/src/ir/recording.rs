//! Splitting multi-sweep recordings into per-speaker impulse responses.

use tracing::debug;

use super::{table::HrirTable, ImpulseResponse};
use crate::error::{EarprintError, Result};
use crate::speaker::{Side, Speaker};

/// Exponential sine sweep used for the measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSpec {
    pub sample_rate: u32,
    /// Sweep length in samples.
    pub length: usize,
    /// Number of octaves the sweep covers.
    pub n_octaves: f64,
}

impl SweepSpec {
    pub fn new(sample_rate: u32, duration_s: f64, low_hz: f64, high_hz: f64) -> Self {
        Self {
            sample_rate,
            length: (duration_s * sample_rate as f64).round() as usize,
            n_octaves: (high_hz / low_hz).log2(),
        }
    }

    /// 5 second sweep from 10 Hz to 20 kHz.
    pub fn standard(sample_rate: u32) -> Self {
        Self::new(sample_rate, 5.0, 10.0, 20_000.0)
    }

    /// Sweep time spent per octave, in seconds.
    pub fn seconds_per_octave(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64 / self.n_octaves
    }
}

/// Turns a recorded sweep into an impulse response.
pub trait ImpulseEstimator {
    fn sweep(&self) -> &SweepSpec;
    fn estimate(&self, recording: &[f32]) -> Vec<f32>;
}

impl HrirTable {
    /// Splits a recording of consecutive sweeps into impulse responses.
    ///
    /// `recording` holds one vector per track. With `side == None` tracks come
    /// in left/right pairs; otherwise every track is the given ear only, and a
    /// channel joins the table once both of its ears have been opened.
    /// `None` entries in `speakers` mark sweeps to skip.
    ///
    /// Returns the number of channels completed by this call.
    pub fn open_recording(
        &mut self,
        estimator: &dyn ImpulseEstimator,
        recording: &[Vec<f32>],
        recording_rate: u32,
        speakers: &[Option<Speaker>],
        side: Option<Side>,
        silence_seconds: f64,
    ) -> Result<usize> {
        let sweep = *estimator.sweep();
        if sweep.sample_rate != self.sample_rate() {
            return Err(EarprintError::SampleRateMismatch {
                expected: self.sample_rate(),
                actual: sweep.sample_rate,
            });
        }
        if recording_rate != self.sample_rate() {
            return Err(EarprintError::InvalidRecording(format!(
                "recording is {recording_rate} Hz but the table is {} Hz",
                self.sample_rate()
            )));
        }
        let silence_f = silence_seconds * recording_rate as f64;
        if (silence_f - silence_f.round()).abs() > 1e-6 || silence_f < 0.0 {
            return Err(EarprintError::InvalidRecording(format!(
                "silence of {silence_seconds} s is not a whole number of samples"
            )));
        }
        let silence = silence_f.round() as usize;

        let tracks_per_group = if side.is_none() { 2 } else { 1 };
        let n_tracks = recording.len();
        if n_tracks == 0 || n_tracks % tracks_per_group != 0 {
            return Err(EarprintError::InvalidRecording(format!(
                "{n_tracks} tracks cannot be split into groups of {tracks_per_group}"
            )));
        }
        let groups = n_tracks / tracks_per_group;
        let n_columns = (speakers.len() as f64 / groups as f64).round() as usize;
        let column_size = silence + sweep.length;

        let mut completed = 0;
        for group in 0..groups {
            let first = group * tracks_per_group;
            for column in 0..n_columns {
                let n = group * n_columns + column;
                let Some(&slot) = speakers.get(n) else {
                    break;
                };
                let Some(speaker) = slot else {
                    debug!(index = n, "skipping unassigned sweep");
                    continue;
                };

                let cut = |track: &[f32]| -> Result<Vec<f32>> {
                    let track = track.get(silence..).unwrap_or(&[]);
                    let start = column * column_size;
                    if start >= track.len() {
                        return Err(EarprintError::InvalidRecording(format!(
                            "recording too short for sweep {n} ({speaker})"
                        )));
                    }
                    let end = (start + column_size).min(track.len());
                    Ok(track[start..end].to_vec())
                };
                let estimate = |segment: Vec<f32>| {
                    ImpulseResponse::new(estimator.estimate(&segment), recording_rate)
                        .with_recording(segment)
                };

                match side {
                    None => {
                        let left = estimate(cut(&recording[first])?);
                        let right = estimate(cut(&recording[first + 1])?);
                        self.insert_ears(speaker, Some(left), Some(right))?;
                        completed += 1;
                    }
                    Some(side) => {
                        let ir = estimate(cut(&recording[first])?);
                        let (left, right) = match side {
                            Side::Left => (Some(ir), None),
                            Side::Right => (None, Some(ir)),
                        };
                        if self.insert_ears(speaker, left, right)? {
                            completed += 1;
                        }
                    }
                }
            }
        }
        Ok(completed)
    }
}
