//! Real-time block convolution of program audio with HRIR/BRIR filters.
//!
//! ## Modes
//!
//! ```text
//! Fixed     N speaker inputs ──► Σ x_i * HRIR_i,{L,R} ──┐
//!                                                       ├─► [crosstalk] ─► L/R
//! Oriented  2 inputs ──► x_L * BRIR_L(θ), x_R * BRIR_R(θ) ┘
//!           BRIR(θ) = Σ w_k(θ) BRIR_k  (inverse-distance weights)
//! ```
//!
//! Every filter spectrum is computed once at construction. `process_block`
//! runs one FFT per input channel, one inverse FFT per output channel and
//! never allocates, so it is safe to call from an audio callback.

pub mod offline;
pub mod orientation;
mod overlap;

use rustfft::num_complex::Complex32;
use tracing::info;

use crate::crosstalk::CrosstalkFilterSet;
use crate::dsp::next_pow2;
use crate::error::{EarprintError, Result};
use crate::ir::HrirTable;
use crate::speaker::Speaker;

pub use orientation::{Orientation, OrientationHandle, OrientationKey};

use orientation::inverse_distance_weights;
use overlap::{multiply_accumulate, OverlapAdd};

pub const DEFAULT_BLOCK_SIZE: usize = 1024;

const ZERO: Complex32 = Complex32::new(0.0, 0.0);

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub block_size: usize,
    pub crosstalk: Option<CrosstalkFilterSet>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            crosstalk: None,
        }
    }
}

impl RenderConfig {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            crosstalk: None,
        }
    }

    pub fn with_crosstalk(mut self, filters: CrosstalkFilterSet) -> Self {
        self.crosstalk = Some(filters);
        self
    }
}

/// One measured orientation of a BRIR set.
#[derive(Debug, Clone, PartialEq)]
pub struct Brir {
    pub key: OrientationKey,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl Brir {
    pub fn new(key: OrientationKey, left: Vec<f32>, right: Vec<f32>) -> Self {
        Self { key, left, right }
    }
}

type EarSpectra = [Vec<Complex32>; 2];

enum Layout {
    Fixed {
        channels: Vec<Speaker>,
        filters: Vec<EarSpectra>,
    },
    Oriented {
        keys: Vec<OrientationKey>,
        filters: Vec<EarSpectra>,
        weights: Vec<f32>,
        blended: EarSpectra,
    },
}

struct CrosstalkStage {
    stage: OverlapAdd,
    ll: Vec<Complex32>,
    lr: Vec<Complex32>,
    rl: Vec<Complex32>,
    rr: Vec<Complex32>,
    input: EarSpectra,
    acc: EarSpectra,
}

impl CrosstalkStage {
    fn new(filters: &CrosstalkFilterSet, block_size: usize) -> Self {
        let fft_size = next_pow2(block_size + filters.len().max(1) - 1);
        let mut stage = OverlapAdd::new(fft_size, block_size);
        let ll = stage.spectrum_of(&filters.ll);
        let lr = stage.spectrum_of(&filters.lr);
        let rl = stage.spectrum_of(&filters.rl);
        let rr = stage.spectrum_of(&filters.rr);
        Self {
            stage,
            ll,
            lr,
            rl,
            rr,
            input: [vec![ZERO; fft_size], vec![ZERO; fft_size]],
            acc: [vec![ZERO; fft_size], vec![ZERO; fft_size]],
        }
    }

    /// `out_l = l * LL + r * RL`, `out_r = l * LR + r * RR`, in place.
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let [in_l, in_r] = &mut self.input;
        self.stage.forward_block(left, in_l);
        self.stage.forward_block(right, in_r);

        let [acc_l, acc_r] = &mut self.acc;
        for k in 0..acc_l.len() {
            acc_l[k] = in_l[k] * self.ll[k] + in_r[k] * self.rl[k];
            acc_r[k] = in_l[k] * self.lr[k] + in_r[k] * self.rr[k];
        }
        self.stage.emit(0, acc_l, left);
        self.stage.emit(1, acc_r, right);
    }
}

/// Block-based binaural renderer.
pub struct RealTimeConvolver {
    sample_rate: u32,
    block_size: usize,
    stage: OverlapAdd,
    layout: Layout,
    input_spectra: Vec<Vec<Complex32>>,
    acc: EarSpectra,
    orientation: OrientationHandle,
    crosstalk: Option<CrosstalkStage>,
}

impl RealTimeConvolver {
    /// Fixed-layout renderer: one input channel per table speaker, in
    /// canonical speaker order.
    pub fn from_table(table: &HrirTable, config: &RenderConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(EarprintError::InvalidBlockSize);
        }
        if table.is_empty() {
            return Err(EarprintError::EmptyTable);
        }
        let longest = table
            .iter()
            .flat_map(|(_, pair)| pair.iter().map(|ir| ir.len()))
            .max()
            .unwrap_or(1);
        let fft_size = next_pow2(config.block_size + longest.max(1) - 1);
        let mut stage = OverlapAdd::new(fft_size, config.block_size);

        let mut channels = Vec::with_capacity(table.len());
        let mut filters = Vec::with_capacity(table.len());
        for (speaker, pair) in table.iter() {
            channels.push(speaker);
            filters.push([stage.spectrum_of(&pair.left.data), stage.spectrum_of(&pair.right.data)]);
        }
        let inputs = channels.len();

        Self::assemble(
            table.sample_rate(),
            config,
            stage,
            Layout::Fixed { channels, filters },
            inputs,
        )
    }

    /// Head-tracked renderer over a set of BRIRs measured at different
    /// orientations. Takes a stereo input.
    pub fn from_brirs(brirs: Vec<Brir>, sample_rate: u32, config: &RenderConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(EarprintError::InvalidBlockSize);
        }
        let Some(first) = brirs.first() else {
            return Err(EarprintError::EmptyBrirSet);
        };
        let yaw_only = first.key.is_yaw_only();
        if brirs.iter().any(|b| b.key.is_yaw_only() != yaw_only) {
            return Err(EarprintError::MixedOrientationKeys);
        }

        let longest = brirs
            .iter()
            .map(|b| b.left.len().max(b.right.len()))
            .max()
            .unwrap_or(1);
        let fft_size = next_pow2(config.block_size + longest.max(1) - 1);
        let mut stage = OverlapAdd::new(fft_size, config.block_size);

        let keys: Vec<OrientationKey> = brirs.iter().map(|b| b.key).collect();
        let filters: Vec<EarSpectra> = brirs
            .iter()
            .map(|b| [stage.spectrum_of(&b.left), stage.spectrum_of(&b.right)])
            .collect();
        let weights = vec![0.0; keys.len()];

        Self::assemble(
            sample_rate,
            config,
            stage,
            Layout::Oriented {
                keys,
                filters,
                weights,
                blended: [vec![ZERO; fft_size], vec![ZERO; fft_size]],
            },
            2,
        )
    }

    fn assemble(
        sample_rate: u32,
        config: &RenderConfig,
        stage: OverlapAdd,
        layout: Layout,
        inputs: usize,
    ) -> Result<Self> {
        let crosstalk = match &config.crosstalk {
            Some(filters) if filters.sample_rate != sample_rate => {
                return Err(EarprintError::FilterSampleRate {
                    filters: filters.sample_rate,
                    render: sample_rate,
                });
            }
            Some(filters) => Some(CrosstalkStage::new(filters, config.block_size)),
            None => None,
        };
        let fft_size = stage.fft_size();

        info!(
            sample_rate,
            block_size = config.block_size,
            fft_size,
            inputs,
            crosstalk = crosstalk.is_some(),
            "convolver ready"
        );

        Ok(Self {
            sample_rate,
            block_size: config.block_size,
            stage,
            layout,
            input_spectra: vec![vec![ZERO; fft_size]; inputs],
            acc: [vec![ZERO; fft_size], vec![ZERO; fft_size]],
            orientation: OrientationHandle::new(),
            crosstalk,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn fft_size(&self) -> usize {
        self.stage.fft_size()
    }

    pub fn input_channels(&self) -> usize {
        self.input_spectra.len()
    }

    /// Speaker order of the inputs in fixed mode.
    pub fn channels(&self) -> Option<&[Speaker]> {
        match &self.layout {
            Layout::Fixed { channels, .. } => Some(channels),
            Layout::Oriented { .. } => None,
        }
    }

    pub fn has_crosstalk(&self) -> bool {
        self.crosstalk.is_some()
    }

    /// Sets the orientation used from the next block on. Non-finite angles
    /// are ignored.
    pub fn set_orientation(&self, yaw: f32, pitch: f32, roll: f32) {
        self.orientation.set(Orientation::new(yaw, pitch, roll));
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation.get()
    }

    /// Handle for updating the orientation from another thread.
    pub fn orientation_handle(&self) -> OrientationHandle {
        self.orientation.clone()
    }

    /// Clears the overlap tails, as if no audio had been processed.
    pub fn reset(&mut self) {
        self.stage.reset();
        if let Some(ct) = &mut self.crosstalk {
            ct.stage.reset();
        }
    }

    /// Renders one block of `block_size` frames per input channel into the
    /// two output slices.
    pub fn process_block<S: AsRef<[f32]>>(
        &mut self,
        input: &[S],
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<()> {
        let channels = self.input_channels();
        let block = self.block_size;
        let frames_ok = input.iter().all(|ch| ch.as_ref().len() == block);
        if input.len() != channels || !frames_ok || left.len() != block || right.len() != block {
            return Err(EarprintError::BlockShape {
                expected_channels: channels,
                expected_frames: block,
                channels: input.len(),
                frames: input
                    .iter()
                    .map(|ch| ch.as_ref().len())
                    .find(|len| *len != block)
                    .unwrap_or(left.len().min(right.len())),
            });
        }

        for (samples, spectrum) in input.iter().zip(self.input_spectra.iter_mut()) {
            self.stage.forward_block(samples.as_ref(), spectrum);
        }
        for acc in &mut self.acc {
            acc.fill(ZERO);
        }

        let [acc_l, acc_r] = &mut self.acc;
        match &mut self.layout {
            Layout::Fixed { filters, .. } => {
                for (x, [h_l, h_r]) in self.input_spectra.iter().zip(filters.iter()) {
                    multiply_accumulate(acc_l, x, h_l);
                    multiply_accumulate(acc_r, x, h_r);
                }
            }
            Layout::Oriented {
                keys,
                filters,
                weights,
                blended,
            } => {
                let (h_l, h_r): (&[Complex32], &[Complex32]) = if filters.len() == 1 {
                    (&filters[0][0], &filters[0][1])
                } else {
                    inverse_distance_weights(keys, &self.orientation.get(), weights);
                    let [b_l, b_r] = blended;
                    b_l.fill(ZERO);
                    b_r.fill(ZERO);
                    for (&w, [f_l, f_r]) in weights.iter().zip(filters.iter()) {
                        if w == 0.0 {
                            continue;
                        }
                        for (b, h) in b_l.iter_mut().zip(f_l) {
                            *b += *h * w;
                        }
                        for (b, h) in b_r.iter_mut().zip(f_r) {
                            *b += *h * w;
                        }
                    }
                    (b_l, b_r)
                };
                multiply_accumulate(acc_l, &self.input_spectra[0], h_l);
                multiply_accumulate(acc_r, &self.input_spectra[1], h_r);
            }
        }

        self.stage.emit(0, acc_l, left);
        self.stage.emit(1, acc_r, right);

        if let Some(ct) = &mut self.crosstalk {
            ct.process(left, right);
        }
        Ok(())
    }

    /// Allocating convenience wrapper around [`Self::process_block`].
    pub fn process<S: AsRef<[f32]>>(&mut self, input: &[S]) -> Result<[Vec<f32>; 2]> {
        let mut left = vec![0.0; self.block_size];
        let mut right = vec![0.0; self.block_size];
        self.process_block(input, &mut left, &mut right)?;
        Ok([left, right])
    }
}
