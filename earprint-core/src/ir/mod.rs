//! Impulse responses and the per-speaker table the correction pipeline operates on.

pub mod balance;
pub mod decay;
pub mod recording;
pub mod resample;
pub mod table;

pub use decay::{DecayAnalyzer, DecayParams, EnvelopeDecayAnalyzer};
pub use recording::{ImpulseEstimator, SweepSpec};
pub use table::{AlignmentShift, ChannelItd, EqualizationFilter, HrirTable};

use crate::dsp::{self, response::FrequencyResponse};
use crate::error::Result;
use crate::speaker::Side;

/// One impulse response track.
///
/// The sample rate is fixed at creation; only [`ImpulseResponse::resample`]
/// changes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub data: Vec<f32>,
    sample_rate: u32,
    recording: Option<Vec<f32>>,
}

impl ImpulseResponse {
    pub fn new(data: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            data,
            sample_rate,
            recording: None,
        }
    }

    /// Keeps the raw sweep recording this response was estimated from.
    pub fn with_recording(mut self, recording: Vec<f32>) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn recording(&self) -> Option<&[f32]> {
        self.recording.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn peak_index(&self) -> usize {
        dsp::peak_index(&self.data)
    }

    /// Convolves the response with an FIR filter (full-length result).
    pub fn equalize(&mut self, fir: &[f32]) {
        self.data = dsp::convolve(&self.data, fir);
    }

    pub fn scale(&mut self, gain: f32) {
        for v in &mut self.data {
            *v *= gain;
        }
    }

    pub fn frequency_response(&self) -> FrequencyResponse {
        FrequencyResponse::from_impulse(&self.data, self.sample_rate)
    }

    pub fn resample(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        self.data = resample::resample_signal(&self.data, self.sample_rate, sample_rate)?;
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// Delays the response by `n` samples, keeping its length.
    pub(crate) fn shift_right(&mut self, n: usize) {
        let len = self.data.len();
        let mut shifted = vec![0.0; n.min(len)];
        shifted.extend_from_slice(&self.data[..len - n.min(len)]);
        self.data = shifted;
    }
}

/// Left- and right-ear responses of one speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct EarPair {
    pub left: ImpulseResponse,
    pub right: ImpulseResponse,
}

impl EarPair {
    pub fn new(left: ImpulseResponse, right: ImpulseResponse) -> Self {
        Self { left, right }
    }

    pub fn get(&self, side: Side) -> &ImpulseResponse {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut ImpulseResponse {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImpulseResponse> {
        [&self.left, &self.right].into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ImpulseResponse> {
        [&mut self.left, &mut self.right].into_iter()
    }
}
