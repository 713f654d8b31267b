//! Loudspeaker channel identifiers, ear sides and standard track orders.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EarprintError;

/// Ear side of an impulse response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measured loudspeaker position.
///
/// Declaration order is the canonical channel order: tables iterate in this
/// order and the fixed-layout renderer expects its input channels in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "FL")]
    FrontLeft,
    #[serde(rename = "FR")]
    FrontRight,
    #[serde(rename = "FC")]
    FrontCenter,
    #[serde(rename = "LFE")]
    LowFrequency,
    #[serde(rename = "SL")]
    SideLeft,
    #[serde(rename = "SR")]
    SideRight,
    #[serde(rename = "BL")]
    BackLeft,
    #[serde(rename = "BR")]
    BackRight,
    #[serde(rename = "WL")]
    WideLeft,
    #[serde(rename = "WR")]
    WideRight,
    #[serde(rename = "TFL")]
    TopFrontLeft,
    #[serde(rename = "TFR")]
    TopFrontRight,
    #[serde(rename = "TSL")]
    TopSideLeft,
    #[serde(rename = "TSR")]
    TopSideRight,
    #[serde(rename = "TBL")]
    TopBackLeft,
    #[serde(rename = "TBR")]
    TopBackRight,
}

impl Speaker {
    pub const ALL: [Speaker; 16] = [
        Speaker::FrontLeft,
        Speaker::FrontRight,
        Speaker::FrontCenter,
        Speaker::LowFrequency,
        Speaker::SideLeft,
        Speaker::SideRight,
        Speaker::BackLeft,
        Speaker::BackRight,
        Speaker::WideLeft,
        Speaker::WideRight,
        Speaker::TopFrontLeft,
        Speaker::TopFrontRight,
        Speaker::TopSideLeft,
        Speaker::TopSideRight,
        Speaker::TopBackLeft,
        Speaker::TopBackRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Speaker::FrontLeft => "FL",
            Speaker::FrontRight => "FR",
            Speaker::FrontCenter => "FC",
            Speaker::LowFrequency => "LFE",
            Speaker::SideLeft => "SL",
            Speaker::SideRight => "SR",
            Speaker::BackLeft => "BL",
            Speaker::BackRight => "BR",
            Speaker::WideLeft => "WL",
            Speaker::WideRight => "WR",
            Speaker::TopFrontLeft => "TFL",
            Speaker::TopFrontRight => "TFR",
            Speaker::TopSideLeft => "TSL",
            Speaker::TopSideRight => "TSR",
            Speaker::TopBackLeft => "TBL",
            Speaker::TopBackRight => "TBR",
        }
    }

    /// The ear that should receive this speaker's direct sound first.
    ///
    /// `None` for centered channels where either ear may lead.
    pub fn side(self) -> Option<Side> {
        let name = self.name();
        if name == "LFE" {
            return None;
        }
        match name.as_bytes().last() {
            Some(b'L') => Some(Side::Left),
            Some(b'R') => Some(Side::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Speaker {
    type Err = EarprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Speaker::ALL
            .iter()
            .copied()
            .find(|sp| sp.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EarprintError::UnknownChannel(s.to_string()))
    }
}

/// One track of a multichannel impulse response file: a speaker heard by one ear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Track {
    pub speaker: Speaker,
    pub side: Side,
}

impl Track {
    pub const fn new(speaker: Speaker, side: Side) -> Self {
        Self { speaker, side }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.speaker, self.side)
    }
}

impl FromStr for Track {
    type Err = EarprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (speaker, side) = s
            .split_once('-')
            .ok_or_else(|| EarprintError::UnknownChannel(s.to_string()))?;
        let side = match side.trim().to_ascii_lowercase().as_str() {
            "left" => Side::Left,
            "right" => Side::Right,
            _ => return Err(EarprintError::UnknownChannel(s.to_string())),
        };
        Ok(Track::new(speaker.parse()?, side))
    }
}

const fn l(speaker: Speaker) -> Track {
    Track::new(speaker, Side::Left)
}

const fn r(speaker: Speaker) -> Track {
    Track::new(speaker, Side::Right)
}

use Speaker::*;

/// Standard 32-track order of `hrir.wav`.
#[rustfmt::skip]
pub const STANDARD_TRACK_ORDER: [Track; 32] = [
    l(FrontLeft), r(FrontLeft),
    l(FrontRight), r(FrontRight),
    l(FrontCenter), r(FrontCenter),
    l(LowFrequency), r(LowFrequency),
    l(BackLeft), r(BackLeft),
    l(BackRight), r(BackRight),
    l(SideLeft), r(SideLeft),
    l(SideRight), r(SideRight),
    l(WideLeft), r(WideLeft),
    l(WideRight), r(WideRight),
    l(TopFrontLeft), r(TopFrontLeft),
    l(TopFrontRight), r(TopFrontRight),
    l(TopSideLeft), r(TopSideLeft),
    l(TopSideRight), r(TopSideRight),
    l(TopBackLeft), r(TopBackLeft),
    l(TopBackRight), r(TopBackRight),
];

/// HeSuVi track order (mirrored right-side speakers, FC split across the halves).
#[rustfmt::skip]
pub const HESUVI_TRACK_ORDER: [Track; 30] = [
    l(FrontLeft), r(FrontLeft),
    l(SideLeft), r(SideLeft),
    l(BackLeft), r(BackLeft),
    l(FrontCenter),
    r(FrontRight), l(FrontRight),
    r(SideRight), l(SideRight),
    r(BackRight), l(BackRight),
    r(FrontCenter),
    l(WideLeft), r(WideLeft),
    l(WideRight), r(WideRight),
    l(TopFrontLeft), r(TopFrontLeft),
    l(TopFrontRight), r(TopFrontRight),
    l(TopSideLeft), r(TopSideLeft),
    l(TopSideRight), r(TopSideRight),
    l(TopBackLeft), r(TopBackLeft),
    l(TopBackRight), r(TopBackRight),
];

/// Symmetric speaker pairs whose direct sound is aligned to each other.
pub const DEFAULT_ALIGN_PAIRS: [(Speaker, Speaker); 7] = [
    (FrontLeft, FrontRight),
    (SideLeft, SideRight),
    (BackLeft, BackRight),
    (WideLeft, WideRight),
    (TopFrontLeft, TopFrontRight),
    (TopSideLeft, TopSideRight),
    (TopBackLeft, TopBackRight),
];

/// Channel groups corrected together for left/right balance.
pub const BALANCE_GROUPS: [&[Speaker]; 8] = [
    &[FrontCenter],
    &[FrontLeft, FrontRight],
    &[SideLeft, SideRight],
    &[BackLeft, BackRight],
    &[WideLeft, WideRight],
    &[TopFrontLeft, TopFrontRight],
    &[TopSideLeft, TopSideRight],
    &[TopBackLeft, TopBackRight],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_follows_name_suffix() {
        assert_eq!(Speaker::FrontLeft.side(), Some(Side::Left));
        assert_eq!(Speaker::TopBackRight.side(), Some(Side::Right));
        assert_eq!(Speaker::FrontCenter.side(), None);
        assert_eq!(Speaker::LowFrequency.side(), None);
    }

    #[test]
    fn parses_short_names_case_insensitively() {
        assert_eq!("tfl".parse::<Speaker>().unwrap(), Speaker::TopFrontLeft);
        assert!("XX".parse::<Speaker>().is_err());
        let track: Track = "SR-right".parse().unwrap();
        assert_eq!(track, Track::new(Speaker::SideRight, Side::Right));
        assert_eq!(track.to_string(), "SR-right");
    }

    #[test]
    fn speaker_serializes_as_short_name() {
        let json = serde_json::to_string(&Speaker::WideLeft).expect("serialize speaker");
        assert_eq!(json, "\"WL\"");
    }

    #[test]
    fn standard_order_covers_every_speaker_and_side() {
        for speaker in Speaker::ALL {
            for side in [Side::Left, Side::Right] {
                assert!(STANDARD_TRACK_ORDER.contains(&Track::new(speaker, side)));
            }
        }
    }
}
