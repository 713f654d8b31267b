//! Sample-rate conversion of impulse responses using a rubato `FastFixedIn` resampler.
//!
//! Impulse responses are short and converted once, off the audio path, so the
//! converter works on whole signals: input is fed in fixed chunks, the tail is
//! flushed with partial calls and the resampler's group delay is trimmed so the
//! output stays time-aligned with the input.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{EarprintError, Result};

/// Input frames handed to rubato per call.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate.
    resampler: Option<FastFixedIn<f32>>,
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = target_rate as f64 / source_rate as f64;
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
            });
        }

        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| EarprintError::Resample(format!("resampler init: {e}")))?;
        let max_out = resampler.output_frames_max();

        debug!(source_rate, target_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            ratio,
        })
    }

    /// Feeds samples and returns whatever full chunks produced (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            let (_, produced) = resampler
                .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                .map_err(|e| EarprintError::Resample(e.to_string()))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.chunk_size);
        }
        Ok(result)
    }

    /// Drains buffered input plus `extra` frames of resampler tail.
    pub fn flush(&mut self, extra: usize) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        if !self.input_buf.is_empty() {
            let pending = std::mem::take(&mut self.input_buf);
            let chunk = [pending.as_slice()];
            let (_, produced) = resampler
                .process_partial_into_buffer(Some(&chunk[..]), &mut self.output_buf, None)
                .map_err(|e| EarprintError::Resample(e.to_string()))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
        }
        while result.len() < extra {
            let (_, produced) = resampler
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.output_buf, None)
                .map_err(|e| EarprintError::Resample(e.to_string()))?;
            if produced == 0 {
                break;
            }
            result.extend_from_slice(&self.output_buf[0][..produced]);
        }
        Ok(result)
    }

    /// Output frames of latency the resampler adds.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

/// Resamples a whole signal, returning `round(len * target / source)` samples.
pub fn resample_signal(data: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(source_rate, target_rate, RESAMPLE_CHUNK)?;
    if rc.is_passthrough() {
        return Ok(data.to_vec());
    }
    let expected = (data.len() as f64 * rc.ratio()).round() as usize;
    let delay = rc.output_delay();

    let mut out = rc.process(data)?;
    let missing = (expected + delay).saturating_sub(out.len());
    out.extend(rc.flush(missing)?);

    let start = delay.min(out.len());
    let mut out = out.split_off(start);
    out.resize(expected, 0.0);
    Ok(out)
}
