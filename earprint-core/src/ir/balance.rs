//! Left/right channel balance correction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::table::HrirTable;
use super::{EarPair, ImpulseResponse};
use crate::dsp::response::{equalization, minimum_phase_fir, smooth, FrequencyResponse};
use crate::dsp::unit_impulse;
use crate::error::{EarprintError, Result};
use crate::speaker::{Speaker, BALANCE_GROUPS};

const MAX_GAIN_DB: f64 = 15.0;
const BROADBAND: (f64, f64) = (100.0, 10_000.0);
const MIDS: (f64, f64) = (100.0, 3_000.0);
const IDENTITY_EQ_LEN: usize = 128;

/// How the right ear is matched to the left (or both to a common target).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BalanceMethod {
    /// Equalize the right ear by the heavily smoothed L-R difference.
    Trend,
    /// Match the right ear to the left.
    Left,
    /// Match the left ear to the right.
    Right,
    /// Match both ears to their average.
    Avg,
    /// Match both ears to their pointwise minimum.
    Min,
    /// Broadband gain from the 100-3000 Hz levels.
    Mids,
    /// Fixed right-ear gain in dB.
    Gain(f32),
}

impl fmt::Display for BalanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trend => f.write_str("trend"),
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Mids => f.write_str("mids"),
            Self::Gain(db) => write!(f, "{db}"),
        }
    }
}

impl FromStr for BalanceMethod {
    type Err = EarprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trend" => Ok(Self::Trend),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "mids" => Ok(Self::Mids),
            other => other
                .parse::<f32>()
                .ok()
                .filter(|db| db.is_finite())
                .map(Self::Gain)
                .ok_or_else(|| EarprintError::InvalidBalanceMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for BalanceMethod {
    type Error = EarprintError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BalanceMethod> for String {
    fn from(value: BalanceMethod) -> Self {
        value.to_string()
    }
}

fn db_to_gain(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

/// Equalization curve matching `subject` to `target`, both on `frequency`.
fn match_curve(frequency: &[f64], subject: &[f64], target: &[f64]) -> Vec<f64> {
    let error: Vec<f64> = subject.iter().zip(target).map(|(s, t)| s - t).collect();
    equalization(&smooth(frequency, &error, 1.0 / 3.0), MAX_GAIN_DB)
}

/// Computes the `[left, right]` correction FIRs for a pair of ear responses.
pub fn channel_balance_firs(
    left: &ImpulseResponse,
    right: &ImpulseResponse,
    method: BalanceMethod,
) -> [Vec<f32>; 2] {
    let fs = left.sample_rate();
    let mut left_fr = left.frequency_response();
    let mut right_fr = right.frequency_response();
    let pure_gain_len = (fs as f64 * 0.1).round() as usize;

    match method {
        BalanceMethod::Mids => {
            let gain = right_fr.center(MIDS.0, MIDS.1) - left_fr.center(MIDS.0, MIDS.1);
            debug!(gain_db = gain, "mids balance gain");
            [
                unit_impulse(pure_gain_len, 1.0),
                unit_impulse(pure_gain_len, db_to_gain(gain)),
            ]
        }
        BalanceMethod::Gain(db) => [
            unit_impulse(pure_gain_len, 1.0),
            unit_impulse(pure_gain_len, db_to_gain(db as f64)),
        ],
        BalanceMethod::Trend => {
            let diff: Vec<f64> = left_fr.raw.iter().zip(&right_fr.raw).map(|(l, r)| l - r).collect();
            let trend = smooth(&left_fr.frequency, &diff, 2.0);
            let fir = minimum_phase_fir(&left_fr.frequency, &trend, fs);
            [unit_impulse(fir.len(), 1.0), fir]
        }
        BalanceMethod::Left | BalanceMethod::Right => {
            let (reference, subject) = match method {
                BalanceMethod::Left => (&mut left_fr, &mut right_fr),
                _ => (&mut right_fr, &mut left_fr),
            };
            let gain = reference.center(BROADBAND.0, BROADBAND.1);
            let target = reference.smoothed(1.0 / 3.0);
            for v in &mut subject.raw {
                *v += gain;
            }
            let eq = match_curve(&subject.frequency, &subject.raw, &target);
            let fir = minimum_phase_fir(&subject.frequency, &eq, fs);
            let identity = unit_impulse(fir.len(), 1.0);
            match method {
                BalanceMethod::Left => [identity, fir],
                _ => [fir, identity],
            }
        }
        BalanceMethod::Avg | BalanceMethod::Min => {
            let gain = (left_fr.clone().center(BROADBAND.0, BROADBAND.1)
                + right_fr.clone().center(BROADBAND.0, BROADBAND.1))
                / 2.0;
            for fr in [&mut left_fr, &mut right_fr] {
                for v in &mut fr.raw {
                    *v += gain;
                }
            }
            let target: Vec<f64> = left_fr
                .raw
                .iter()
                .zip(&right_fr.raw)
                .map(|(l, r)| match method {
                    BalanceMethod::Avg => (l + r) / 2.0,
                    _ => l.min(*r),
                })
                .collect();
            let fir_for = |fr: &FrequencyResponse| {
                let eq = match_curve(&fr.frequency, &fr.raw, &target);
                minimum_phase_fir(&fr.frequency, &eq, fs)
            };
            [fir_for(&left_fr), fir_for(&right_fr)]
        }
    }
}

fn averaged(irs: &[&ImpulseResponse]) -> ImpulseResponse {
    let len = irs.iter().map(|ir| ir.len()).max().unwrap_or(0);
    let mut data = vec![0.0f32; len];
    for ir in irs {
        for (acc, v) in data.iter_mut().zip(&ir.data) {
            *acc += v;
        }
    }
    let n = irs.len().max(1) as f32;
    for v in &mut data {
        *v /= n;
    }
    ImpulseResponse::new(data, irs.first().map_or(0, |ir| ir.sample_rate()))
}

impl HrirTable {
    /// Applies channel balance correction group by group.
    ///
    /// Only groups whose speakers are all present are corrected. The balance
    /// FIRs are derived from the group's averaged left and right responses.
    /// With `headphone_eq` off both ears of every group get a 128-tap
    /// identity filter instead and the balance method is not evaluated.
    pub fn correct_channel_balance(&mut self, method: BalanceMethod, headphone_eq: bool) -> Result<usize> {
        let mut corrected = 0;
        for group in BALANCE_GROUPS {
            let pairs: Option<Vec<&EarPair>> = group.iter().map(|s| self.get(*s)).collect();
            let Some(pairs) = pairs else {
                continue;
            };

            let [left_fir, right_fir] = if headphone_eq {
                let left = averaged(&pairs.iter().map(|p| &p.left).collect::<Vec<_>>());
                let right = averaged(&pairs.iter().map(|p| &p.right).collect::<Vec<_>>());
                channel_balance_firs(&left, &right, method)
            } else {
                [unit_impulse(IDENTITY_EQ_LEN, 1.0), unit_impulse(IDENTITY_EQ_LEN, 1.0)]
            };
            for &speaker in group.iter() {
                let pair = self
                    .get_mut(speaker)
                    .ok_or(EarprintError::MissingChannel(speaker))?;
                pair.left.equalize(&left_fir);
                pair.right.equalize(&right_fir);
            }
            corrected += 1;
        }
        info!(%method, headphone_eq, groups = corrected, "corrected channel balance");
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::recording::SweepSpec;
    use approx::assert_abs_diff_eq;

    const FS: u32 = 48_000;

    fn impulse(gain: f32) -> ImpulseResponse {
        ImpulseResponse::new(unit_impulse(2_048, gain), FS)
    }

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("Trend".parse::<BalanceMethod>().unwrap(), BalanceMethod::Trend);
        assert_eq!("-1.5".parse::<BalanceMethod>().unwrap(), BalanceMethod::Gain(-1.5));
        assert!(matches!(
            "loud".parse::<BalanceMethod>(),
            Err(EarprintError::InvalidBalanceMethod(_))
        ));
        let json = serde_json::to_string(&BalanceMethod::Avg).unwrap();
        assert_eq!(json, "\"avg\"");
    }

    #[test]
    fn numeric_gain_scales_right_ear() {
        let [l, r] = channel_balance_firs(&impulse(1.0), &impulse(1.0), BalanceMethod::Gain(-6.0));
        assert_eq!(l.len(), 4_800);
        assert_eq!(r.len(), 4_800);
        assert_abs_diff_eq!(l[0], 1.0);
        assert_abs_diff_eq!(r[0], 10f32.powf(-6.0 / 20.0), epsilon = 1e-6);
    }

    #[test]
    fn mids_gain_matches_right_to_left() {
        let [l, r] = channel_balance_firs(&impulse(1.0), &impulse(0.5), BalanceMethod::Mids);
        assert_abs_diff_eq!(l[0], 1.0);
        assert_abs_diff_eq!(r[0], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn left_reference_boosts_quieter_right() {
        let [l, r] = channel_balance_firs(&impulse(1.0), &impulse(0.5), BalanceMethod::Left);
        assert_abs_diff_eq!(l[0], 1.0);
        assert_abs_diff_eq!(r[0], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn avg_meets_in_the_middle() {
        let [l, r] = channel_balance_firs(&impulse(1.0), &impulse(0.25), BalanceMethod::Avg);
        // Target is the dB average: -6.02 dB, so left drops 6 dB and right rises 6 dB.
        assert_abs_diff_eq!(l[0], 0.5, epsilon = 1e-2);
        assert_abs_diff_eq!(r[0], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn trend_of_identical_ears_is_identity() {
        let [l, r] = channel_balance_firs(&impulse(1.0), &impulse(1.0), BalanceMethod::Trend);
        assert_abs_diff_eq!(l[0], 1.0);
        assert_abs_diff_eq!(r[0], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn only_complete_groups_are_corrected() {
        let mut table = HrirTable::new(SweepSpec::standard(FS));
        table
            .insert(Speaker::FrontLeft, EarPair::new(impulse(1.0), impulse(0.5)))
            .unwrap();
        table
            .insert(Speaker::FrontCenter, EarPair::new(impulse(1.0), impulse(0.5)))
            .unwrap();
        let groups = table.correct_channel_balance(BalanceMethod::Mids, true).unwrap();
        assert_eq!(groups, 1);

        let fc = table.get(Speaker::FrontCenter).unwrap();
        assert_abs_diff_eq!(fc.right.data[0], 1.0, epsilon = 1e-3);
        let fl = table.get(Speaker::FrontLeft).unwrap();
        assert_eq!(fl.right.len(), 2_048);
    }

    #[test]
    fn disabled_headphone_eq_keeps_balance_untouched() {
        let mut table = HrirTable::new(SweepSpec::standard(FS));
        table
            .insert(Speaker::FrontLeft, EarPair::new(impulse(1.0), impulse(0.5)))
            .unwrap();
        table
            .insert(Speaker::FrontRight, EarPair::new(impulse(0.5), impulse(1.0)))
            .unwrap();
        let groups = table
            .correct_channel_balance(BalanceMethod::Gain(-6.0), false)
            .unwrap();
        assert_eq!(groups, 1);

        let fl = table.get(Speaker::FrontLeft).unwrap();
        assert_eq!(fl.left.len(), 2_048 + IDENTITY_EQ_LEN - 1);
        assert_abs_diff_eq!(fl.left.data[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fl.right.data[0], 0.5, epsilon = 1e-6);
        let fr = table.get(Speaker::FrontRight).unwrap();
        assert_abs_diff_eq!(fr.right.data[0] / fr.left.data[0], 2.0, epsilon = 1e-5);
    }
}
