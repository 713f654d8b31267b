//! End-to-end correction of a freshly measured impulse-response table.
//!
//! ```text
//! equalization FIRs → [headphone FIRs] → crop_heads → align pairs → crop_tails
//!     → channel balance → normalize → [resample → normalize]
//! ```

use serde::Serialize;
use tracing::info;

use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::ir::{AlignmentShift, ChannelItd, DecayAnalyzer, EnvelopeDecayAnalyzer, EqualizationFilter, HrirTable};
use crate::speaker::DEFAULT_ALIGN_PAIRS;

/// What a pipeline run did to the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionReport {
    #[serde(skip)]
    pub itds: Vec<ChannelItd>,
    #[serde(skip)]
    pub alignment: Vec<AlignmentShift>,
    /// Common length after tail cropping, `None` when tails were kept.
    pub tail_length: Option<usize>,
    pub balance_groups: usize,
    /// Gain of the final normalization pass, dB.
    pub normalization_gain_db: f32,
    pub resampled_to: Option<u32>,
    /// Channels whose leading ear contradicts their position.
    pub warnings: usize,
}

pub struct CorrectionPipeline {
    config: ProcessingConfig,
    decay: Box<dyn DecayAnalyzer>,
    equalization: Vec<EqualizationFilter>,
    headphone_firs: Option<[Vec<f32>; 2]>,
}

impl CorrectionPipeline {
    pub fn new(mut config: ProcessingConfig) -> Self {
        config.normalize();
        Self {
            config,
            decay: Box::new(EnvelopeDecayAnalyzer::default()),
            equalization: Vec::new(),
            headphone_firs: None,
        }
    }

    pub fn with_decay_analyzer(mut self, analyzer: impl DecayAnalyzer + 'static) -> Self {
        self.decay = Box::new(analyzer);
        self
    }

    /// Adds an equalization filter applied before any cropping. Filters run
    /// in the order they were added.
    pub fn with_equalization(mut self, filter: EqualizationFilter) -> Self {
        self.equalization.push(filter);
        self
    }

    /// Headphone compensation `[left, right]`, applied after the other
    /// equalization filters when `apply_headphone_eq` is set.
    pub fn with_headphone_firs(mut self, firs: [Vec<f32>; 2]) -> Self {
        self.headphone_firs = Some(firs);
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn run(&self, table: &mut HrirTable) -> Result<CorrectionReport> {
        let config = &self.config;

        for filter in &self.equalization {
            table.equalize(filter);
        }
        if let Some([left, right]) = self.headphone_firs.as_ref().filter(|_| config.apply_headphone_eq) {
            table.equalize(&EqualizationFilter::PerEar {
                left: left.clone(),
                right: right.clone(),
            });
        }

        let itds = table.crop_heads(config.head_ms, &config.channel_delays)?;
        let warnings = itds.iter().filter(|itd| !itd.is_consistent()).count();

        let alignment = table.align_ipsilateral_all(&DEFAULT_ALIGN_PAIRS, config.align_segment_ms);
        let tail_length = table.crop_tails(config, self.decay.as_ref())?;

        let balance_groups = match config.channel_balance {
            Some(method) => table.correct_channel_balance(method, config.apply_headphone_eq)?,
            None => 0,
        };

        let mut gain = table.normalize(config.peak_target, config.avg_target)?;

        let resampled_to = match config.output_sample_rate {
            Some(rate) if rate != table.sample_rate() => {
                table.resample(rate)?;
                gain = table.normalize(config.peak_target, config.avg_target)?;
                Some(rate)
            }
            _ => None,
        };

        info!(
            channels = table.len(),
            warnings,
            gain_db = gain,
            tail = ?tail_length,
            "correction finished"
        );
        Ok(CorrectionReport {
            itds,
            alignment,
            tail_length,
            balance_groups,
            normalization_gain_db: gain,
            resampled_to,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EarprintError;
    use crate::ir::{EarPair, ImpulseResponse, SweepSpec};
    use crate::speaker::Speaker;
    use approx::assert_abs_diff_eq;

    const FS: u32 = 48_000;

    fn spike(at: usize, gain: f32) -> ImpulseResponse {
        let mut data = vec![0.0f32; 4_800];
        data[at] = gain;
        ImpulseResponse::new(data, FS)
    }

    fn stereo_table() -> HrirTable {
        let mut table = HrirTable::new(SweepSpec::standard(FS));
        table
            .insert(Speaker::FrontLeft, EarPair::new(spike(100, 1.0), spike(110, 0.5)))
            .unwrap();
        table
            .insert(Speaker::FrontRight, EarPair::new(spike(110, 0.5), spike(100, 1.0)))
            .unwrap();
        table
    }

    #[test]
    fn default_run_crops_heads_and_normalizes() {
        let mut table = stereo_table();
        let report = CorrectionPipeline::new(ProcessingConfig::default())
            .run(&mut table)
            .unwrap();

        assert_eq!(report.itds.len(), 2);
        assert_eq!(report.warnings, 0);
        assert_eq!(report.tail_length, None);
        assert_eq!(report.resampled_to, None);
        // head_ms = 1.0 at 48 kHz keeps 48 samples ahead of the leading peak.
        let fl = table.get(Speaker::FrontLeft).unwrap();
        assert_eq!(fl.left.peak_index(), 48);
        assert_eq!(fl.right.peak_index(), 58);
        // The summed left ear peaks at 1.5 (DC) before normalization.
        let expected = -0.1 - 20.0 * 1.5f32.log10();
        assert_abs_diff_eq!(report.normalization_gain_db, expected, epsilon = 1e-3);
    }

    #[test]
    fn reversed_itd_is_counted_as_warning() {
        let mut table = HrirTable::new(SweepSpec::standard(FS));
        table
            .insert(Speaker::FrontLeft, EarPair::new(spike(120, 0.5), spike(100, 1.0)))
            .unwrap();
        let report = CorrectionPipeline::new(ProcessingConfig::default())
            .run(&mut table)
            .unwrap();
        assert_eq!(report.warnings, 1);
    }

    #[test]
    fn output_rate_resamples_and_renormalizes() {
        let mut table = stereo_table();
        let config = ProcessingConfig {
            output_sample_rate: Some(44_100),
            ..ProcessingConfig::default()
        };
        let report = CorrectionPipeline::new(config).run(&mut table).unwrap();
        assert_eq!(report.resampled_to, Some(44_100));
        assert_eq!(table.sample_rate(), 44_100);
    }

    #[test]
    fn conflicting_targets_fail() {
        let mut table = stereo_table();
        let config = ProcessingConfig {
            avg_target: Some(0.0),
            ..ProcessingConfig::default()
        };
        let err = CorrectionPipeline::new(config).run(&mut table).unwrap_err();
        assert!(matches!(err, EarprintError::NormalizeTarget));
    }

    #[test]
    fn balance_runs_when_configured() {
        let mut table = stereo_table();
        let config = ProcessingConfig {
            channel_balance: Some(crate::ir::balance::BalanceMethod::Gain(0.0)),
            ..ProcessingConfig::default()
        };
        let report = CorrectionPipeline::new(config).run(&mut table).unwrap();
        assert_eq!(report.balance_groups, 1);
    }

    fn peak(ir: &ImpulseResponse) -> f32 {
        ir.data.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    #[test]
    fn balance_without_headphone_eq_keeps_ear_ratio() {
        let mut table = stereo_table();
        let ratio = |t: &HrirTable| {
            let fl = t.get(Speaker::FrontLeft).unwrap();
            peak(&fl.right) / peak(&fl.left)
        };
        let before = ratio(&table);
        let config = ProcessingConfig {
            apply_headphone_eq: false,
            channel_balance: Some(crate::ir::balance::BalanceMethod::Gain(-6.0)),
            ..ProcessingConfig::default()
        };
        let report = CorrectionPipeline::new(config)
            .with_headphone_firs([vec![0.5], vec![0.25]])
            .run(&mut table)
            .unwrap();
        assert_eq!(report.balance_groups, 1);
        assert_abs_diff_eq!(ratio(&table), before, epsilon = 1e-4);
    }

    #[test]
    fn headphone_firs_apply_when_enabled() {
        let mut table = stereo_table();
        let report = CorrectionPipeline::new(ProcessingConfig::default())
            .with_headphone_firs([vec![1.0], vec![0.5]])
            .run(&mut table)
            .unwrap();
        assert_eq!(report.balance_groups, 0);
        let fl = table.get(Speaker::FrontLeft).unwrap();
        assert_abs_diff_eq!(peak(&fl.right) / peak(&fl.left), 0.25, epsilon = 1e-4);
    }
}
