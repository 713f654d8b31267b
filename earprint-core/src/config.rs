//! Processing options for the correction pipeline.
//!
//! Loaded from JSON by the host application; every field has a default so a
//! partial file (or `{}`) is valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::balance::BalanceMethod;
use crate::speaker::Speaker;

/// Per-channel extra delay in seconds, applied when cropping heads.
pub type ChannelDelays = BTreeMap<Speaker, f32>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingConfig {
    /// Apply headphone compensation and channel balance FIRs. When off,
    /// balance groups only pass through an identity filter.
    pub apply_headphone_eq: bool,
    /// Skip tail cropping so the room's reverberation is kept intact.
    pub preserve_room_response: bool,
    /// Silence kept ahead of the leading-ear peak, in milliseconds.
    pub head_ms: f32,
    /// Window used to align symmetric speaker pairs, in milliseconds.
    pub align_segment_ms: f32,
    pub channel_delays: ChannelDelays,
    pub channel_balance: Option<BalanceMethod>,
    /// Normalization target for the combined peak level (dB).
    pub peak_target: Option<f32>,
    /// Normalization target for the combined 80-6000 Hz average level (dB).
    pub avg_target: Option<f32>,
    pub output_sample_rate: Option<u32>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            apply_headphone_eq: true,
            preserve_room_response: true,
            head_ms: 1.0,
            align_segment_ms: 30.0,
            channel_delays: ChannelDelays::new(),
            channel_balance: None,
            peak_target: Some(-0.1),
            avg_target: None,
            output_sample_rate: None,
        }
    }
}

impl ProcessingConfig {
    /// Clamps out-of-range values to something usable.
    pub fn normalize(&mut self) {
        if !self.head_ms.is_finite() || self.head_ms < 0.0 {
            self.head_ms = 1.0;
        }
        if !self.align_segment_ms.is_finite() || self.align_segment_ms <= 0.0 {
            self.align_segment_ms = 30.0;
        }
        self.channel_delays.retain(|_, d| d.is_finite() && *d >= 0.0);
        if self.output_sample_rate == Some(0) {
            self.output_sample_rate = None;
        }
    }

    pub fn channel_delay(&self, speaker: Speaker) -> f32 {
        self.channel_delays.get(&speaker).copied().unwrap_or(0.0)
    }
}
