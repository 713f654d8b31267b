//! The per-speaker impulse response table and its correction stages.
//!
//! Stages mutate the table in place and are expected to run in this order:
//! head cropping, ipsilateral alignment, tail cropping, channel balance,
//! normalization. Each stage checks only what it needs; ordering is the
//! caller's job (see [`crate::correction::CorrectionPipeline`]).

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use super::decay::DecayAnalyzer;
use super::recording::SweepSpec;
use super::{EarPair, ImpulseResponse};
use crate::config::{ChannelDelays, ProcessingConfig};
use crate::dsp::{self, hann, magnitude_response, next_fast_len};
use crate::error::{EarprintError, Result};
use crate::speaker::{Side, Speaker, Track, STANDARD_TRACK_ORDER};
use crate::wav;

/// Interaural time difference measured while cropping heads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelItd {
    pub speaker: Speaker,
    pub itd_seconds: f64,
    /// Ear whose direct-sound peak arrived first.
    pub leading: Side,
    /// Ear that should lead given the speaker's position.
    pub expected: Option<Side>,
}

impl ChannelItd {
    pub fn is_consistent(&self) -> bool {
        self.expected.is_none_or(|side| side == self.leading)
    }
}

/// Shift applied to one speaker pair by ipsilateral alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentShift {
    pub first: Speaker,
    pub second: Speaker,
    /// Positive: `first` was later and `second` was delayed by `lag` samples.
    pub lag: isize,
}

/// FIR applied to every impulse response, shared or per ear.
#[derive(Debug, Clone, PartialEq)]
pub enum EqualizationFilter {
    Shared(Vec<f32>),
    PerEar { left: Vec<f32>, right: Vec<f32> },
}

impl EqualizationFilter {
    /// One row applies to both ears, two rows are left then right.
    pub fn from_rows(mut rows: Vec<Vec<f32>>) -> Result<Self> {
        match rows.len() {
            1 => Ok(Self::Shared(rows.remove(0))),
            2 => {
                let right = rows.remove(1);
                let left = rows.remove(0);
                Ok(Self::PerEar { left, right })
            }
            n => Err(EarprintError::Other(anyhow::anyhow!(
                "equalization filter must have one or two rows, got {n}"
            ))),
        }
    }

    pub fn for_side(&self, side: Side) -> &[f32] {
        match (self, side) {
            (Self::Shared(fir), _) => fir,
            (Self::PerEar { left, .. }, Side::Left) => left,
            (Self::PerEar { right, .. }, Side::Right) => right,
        }
    }
}

/// Impulse responses of every measured speaker, keyed by [`Speaker`].
///
/// Every present speaker has both ears and every response shares the table's
/// sample rate.
#[derive(Debug, Clone)]
pub struct HrirTable {
    sweep: SweepSpec,
    sample_rate: u32,
    irs: BTreeMap<Speaker, EarPair>,
    /// Single-ear responses waiting for their other ear.
    pending: BTreeMap<Speaker, (Option<ImpulseResponse>, Option<ImpulseResponse>)>,
}

impl HrirTable {
    pub fn new(sweep: SweepSpec) -> Self {
        Self {
            sample_rate: sweep.sample_rate,
            sweep,
            irs: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sweep(&self) -> &SweepSpec {
        &self.sweep
    }

    pub fn len(&self) -> usize {
        self.irs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.irs.is_empty()
    }

    pub fn get(&self, speaker: Speaker) -> Option<&EarPair> {
        self.irs.get(&speaker)
    }

    pub fn get_mut(&mut self, speaker: Speaker) -> Option<&mut EarPair> {
        self.irs.get_mut(&speaker)
    }

    pub fn speakers(&self) -> impl Iterator<Item = Speaker> + '_ {
        self.irs.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Speaker, &EarPair)> {
        self.irs.iter().map(|(s, p)| (*s, p))
    }

    pub fn remove(&mut self, speaker: Speaker) -> Option<EarPair> {
        self.irs.remove(&speaker)
    }

    /// Speakers with only one ear opened so far.
    pub fn pending_speakers(&self) -> impl Iterator<Item = Speaker> + '_ {
        self.pending.keys().copied()
    }

    pub fn insert(&mut self, speaker: Speaker, pair: EarPair) -> Result<()> {
        for ir in pair.iter() {
            if ir.sample_rate() != self.sample_rate {
                return Err(EarprintError::SampleRateMismatch {
                    expected: self.sample_rate,
                    actual: ir.sample_rate(),
                });
            }
        }
        self.pending.remove(&speaker);
        self.irs.insert(speaker, pair);
        Ok(())
    }

    /// Stores one or both ears; returns `true` once the speaker is complete.
    pub(crate) fn insert_ears(
        &mut self,
        speaker: Speaker,
        left: Option<ImpulseResponse>,
        right: Option<ImpulseResponse>,
    ) -> Result<bool> {
        let slot = self.pending.entry(speaker).or_default();
        if left.is_some() {
            slot.0 = left;
        }
        if right.is_some() {
            slot.1 = right;
        }
        if slot.0.is_none() || slot.1.is_none() {
            return Ok(false);
        }
        let Some((Some(left), Some(right))) = self.pending.remove(&speaker) else {
            return Ok(false);
        };
        self.insert(speaker, EarPair::new(left, right))?;
        Ok(true)
    }

    fn check_sweep_rate(&self) -> Result<()> {
        if self.sweep.sample_rate != self.sample_rate {
            return Err(EarprintError::SampleRateMismatch {
                expected: self.sweep.sample_rate,
                actual: self.sample_rate,
            });
        }
        Ok(())
    }

    /// Crops everything before the leading-ear peak minus `head_ms` (plus the
    /// channel's configured delay) and fades the new head in.
    ///
    /// Both ears are cut by the same amount so the ITD survives. Returns the
    /// measured ITD of every channel.
    pub fn crop_heads(&mut self, head_ms: f32, delays: &ChannelDelays) -> Result<Vec<ChannelItd>> {
        self.check_sweep_rate()?;
        let fs = self.sample_rate as f64;
        let head = (head_ms as f64 * fs / 1000.0) as usize;
        let fade_in: Vec<f32> = hann(2 * head).into_iter().take(head).collect();

        let mut itds = Vec::with_capacity(self.irs.len());
        for (&speaker, pair) in self.irs.iter_mut() {
            let left_peak = pair.left.peak_index();
            let right_peak = pair.right.peak_index();
            let itd_seconds = left_peak.abs_diff(right_peak) as f64 / fs;
            let expected = speaker.side();

            let leading = match left_peak.cmp(&right_peak) {
                std::cmp::Ordering::Less => Side::Left,
                std::cmp::Ordering::Greater => Side::Right,
                std::cmp::Ordering::Equal => expected.unwrap_or(Side::Left),
            };
            let lead_peak = left_peak.min(right_peak);

            let itd = ChannelItd {
                speaker,
                itd_seconds,
                leading,
                expected,
            };
            if !itd.is_consistent() {
                warn!(
                    channel = %speaker,
                    itd_ms = itd_seconds * 1000.0,
                    leading = %leading,
                    "{speaker} ITD of {:.2} ms suggests the {leading} ear leads; \
                     the measurement may be flawed",
                    itd_seconds * 1000.0
                );
            }
            itds.push(itd);

            let extra = delays.get(&speaker).copied().unwrap_or(0.0) as f64;
            let delay = (extra * fs).round() as usize + head;

            for ir in pair.iter_mut() {
                if lead_peak >= delay {
                    ir.data.drain(..lead_peak - delay);
                } else {
                    let mut padded = vec![0.0; delay - lead_peak];
                    padded.extend_from_slice(&ir.data);
                    ir.data = padded;
                }
                for (v, w) in ir.data.iter_mut().zip(&fade_in) {
                    *v *= w;
                }
            }
        }
        debug!(channels = itds.len(), head, "cropped heads");
        Ok(itds)
    }

    /// Crops every response to where the room decay meets the noise floor and
    /// fades the new tail out.
    ///
    /// No-op (returns `None`) when the config preserves the room response.
    /// Otherwise returns the new common length.
    pub fn crop_tails(
        &mut self,
        config: &ProcessingConfig,
        analyzer: &dyn DecayAnalyzer,
    ) -> Result<Option<usize>> {
        if config.preserve_room_response {
            debug!("room response preserved, tails left intact");
            return Ok(None);
        }
        self.check_sweep_rate()?;
        if self.irs.is_empty() {
            return Ok(None);
        }

        let mut shortest_knee: Option<usize> = None;
        let mut shortest_len = usize::MAX;
        for (speaker, pair) in &self.irs {
            for (side, ir) in [(Side::Left, &pair.left), (Side::Right, &pair.right)] {
                match analyzer.decay_params(ir) {
                    Some(params) => {
                        let knee = params.knee_point_index;
                        shortest_knee = Some(shortest_knee.map_or(knee, |k| k.min(knee)));
                    }
                    None => warn!(channel = %speaker, side = %side, "decay parameters unavailable"),
                }
                shortest_len = shortest_len.min(ir.len());
            }
        }
        let tail = shortest_knee.map_or(shortest_len, |knee| next_fast_len(knee).min(shortest_len));

        let fs = self.sample_rate as f64;
        let fade = 2 * (fs * self.sweep.seconds_per_octave() / 24.0) as usize;
        let fade_out: Vec<f32> = hann(fade).split_off(fade / 2);

        for pair in self.irs.values_mut() {
            for ir in pair.iter_mut() {
                ir.data.truncate(tail);
                let n = fade_out.len().min(ir.data.len());
                let start = ir.data.len() - n;
                for (v, w) in ir.data[start..].iter_mut().zip(&fade_out[fade_out.len() - n..]) {
                    *v *= w;
                }
            }
        }
        debug!(tail, fade, "cropped tails");
        Ok(Some(tail))
    }

    /// Time-aligns symmetric speaker pairs by their near-ear direct sound.
    ///
    /// For each `(a, b)` the first `segment_ms` of `a`'s left ear and `b`'s
    /// right ear are cross-correlated and the earlier speaker is delayed
    /// (both ears) by the lag. Pairs naming the same speaker twice or a
    /// missing speaker are skipped.
    pub fn align_ipsilateral_all(
        &mut self,
        pairs: &[(Speaker, Speaker)],
        segment_ms: f32,
    ) -> Vec<AlignmentShift> {
        let segment = (self.sample_rate as f64 * segment_ms as f64 / 1000.0) as usize;
        let mut shifts = Vec::new();
        for &(first, second) in pairs {
            if first == second {
                continue;
            }
            let (Some(a), Some(b)) = (self.irs.get(&first), self.irs.get(&second)) else {
                continue;
            };
            let d1 = &a.left.data[..segment.min(a.left.len())];
            let d2 = &b.right.data[..segment.min(b.right.len())];
            let lag = dsp::correlation_lag(d1, d2);

            let (delayed, amount) = if lag < 0 {
                (first, lag.unsigned_abs())
            } else {
                (second, lag as usize)
            };
            if amount > 0 {
                if let Some(pair) = self.irs.get_mut(&delayed) {
                    for ir in pair.iter_mut() {
                        ir.shift_right(amount);
                    }
                }
            }
            debug!(%first, %second, lag, "aligned pair");
            shifts.push(AlignmentShift { first, second, lag });
        }
        shifts
    }

    /// Scales every response so the combined left/right sum hits the target.
    ///
    /// Exactly one of `peak_target` (dB of the highest magnitude bin) or
    /// `avg_target` (mean dB over 80-6000 Hz) must be given. Returns the gain
    /// applied in dB.
    pub fn normalize(&mut self, peak_target: Option<f32>, avg_target: Option<f32>) -> Result<f32> {
        if peak_target.is_some() == avg_target.is_some() {
            return Err(EarprintError::NormalizeTarget);
        }
        if self.irs.is_empty() {
            return Err(EarprintError::EmptyTable);
        }

        let max_len = self
            .irs
            .values()
            .flat_map(|p| p.iter().map(ImpulseResponse::len))
            .max()
            .unwrap_or(0);
        let mut left = vec![0.0f32; max_len];
        let mut right = vec![0.0f32; max_len];
        for pair in self.irs.values() {
            for (acc, v) in left.iter_mut().zip(&pair.left.data) {
                *acc += v;
            }
            for (acc, v) in right.iter_mut().zip(&pair.right.data) {
                *acc += v;
            }
        }

        let (freqs, mag_left) = magnitude_response(&left, self.sample_rate);
        let (_, mag_right) = magnitude_response(&right, self.sample_rate);

        let gain = if let Some(target) = peak_target {
            let peak = mag_left
                .iter()
                .chain(&mag_right)
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            target as f64 - peak
        } else {
            let band: Vec<f64> = [&mag_left, &mag_right]
                .into_iter()
                .flat_map(|mags| {
                    freqs
                        .iter()
                        .zip(mags.iter())
                        .filter(|(f, _)| **f > 80.0 && **f < 6_000.0)
                        .map(|(_, m)| *m)
                })
                .collect();
            let mean = band.iter().sum::<f64>() / band.len().max(1) as f64;
            avg_target.unwrap_or_default() as f64 - mean
        };

        let factor = 10f64.powf(gain / 20.0) as f32;
        for pair in self.irs.values_mut() {
            for ir in pair.iter_mut() {
                ir.scale(factor);
            }
        }
        info!(gain_db = gain, "normalized impulse responses");
        Ok(gain as f32)
    }

    /// Convolves every response with the filter for its ear.
    pub fn equalize(&mut self, filter: &EqualizationFilter) {
        for pair in self.irs.values_mut() {
            pair.left.equalize(filter.for_side(Side::Left));
            pair.right.equalize(filter.for_side(Side::Right));
        }
    }

    pub fn resample(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        for pair in self.irs.values_mut() {
            for ir in pair.iter_mut() {
                ir.resample(sample_rate)?;
            }
        }
        for (left, right) in self.pending.values_mut() {
            for ir in [left, right].into_iter().flatten() {
                ir.resample(sample_rate)?;
            }
        }
        info!(from = self.sample_rate, to = sample_rate, "resampled table");
        self.sample_rate = sample_rate;
        Ok(())
    }

    /// Writes one track per entry of `order`; missing speakers become silent tracks.
    pub fn write_wav(&self, path: impl AsRef<Path>, order: &[Track]) -> Result<()> {
        let tracks: Vec<Vec<f32>> = order
            .iter()
            .map(|track| {
                self.irs
                    .get(&track.speaker)
                    .map(|pair| pair.get(track.side).data.clone())
                    .unwrap_or_default()
            })
            .collect();
        wav::write_wav(path, self.sample_rate, &tracks)
    }

    /// Loads a table written in the standard track order.
    ///
    /// Silent track pairs are kept as silent channels.
    pub fn read_wav(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_wav_with_order(path, &STANDARD_TRACK_ORDER)
    }

    pub fn read_wav_with_order(path: impl AsRef<Path>, order: &[Track]) -> Result<Self> {
        let (sample_rate, mut tracks) = wav::read_wav(path)?;
        if tracks.len() != order.len() {
            return Err(EarprintError::InvalidRecording(format!(
                "expected {} tracks, file has {}",
                order.len(),
                tracks.len()
            )));
        }
        let mut table = Self::new(SweepSpec::standard(sample_rate));
        for (track, data) in order.iter().zip(tracks.drain(..)) {
            let ir = ImpulseResponse::new(data, sample_rate);
            let (left, right) = match track.side {
                Side::Left => (Some(ir), None),
                Side::Right => (None, Some(ir)),
            };
            table.insert_ears(track.speaker, left, right)?;
        }
        Ok(table)
    }
}
