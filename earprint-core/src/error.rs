use thiserror::Error;

use crate::speaker::Speaker;

/// All errors produced by earprint-core.
#[derive(Debug, Error)]
pub enum EarprintError {
    #[error("sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("crosstalk filters are {filters} Hz but the renderer runs at {render} Hz")]
    FilterSampleRate { filters: u32, render: u32 },

    #[error("one and only one of peak_target and avg_target must be given")]
    NormalizeTarget,

    #[error(
        "invalid input block shape: expected {expected_channels}x{expected_frames}, \
         got {channels}x{frames}"
    )]
    BlockShape {
        expected_channels: usize,
        expected_frames: usize,
        channels: usize,
        frames: usize,
    },

    #[error("\"{0}\" is not a valid channel balance method")]
    InvalidBalanceMethod(String),

    #[error("block size must be non-zero")]
    InvalidBlockSize,

    #[error("impulse response table is empty")]
    EmptyTable,

    #[error("channel {0} is missing from the impulse response table")]
    MissingChannel(Speaker),

    #[error("unknown channel name: {0}")]
    UnknownChannel(String),

    #[error("BRIR set contains no orientations")]
    EmptyBrirSet,

    #[error("BRIR set mixes yaw-only and yaw/pitch/roll orientation keys")]
    MixedOrientationKeys,

    #[error("invalid recording: {0}")]
    InvalidRecording(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EarprintError>;
