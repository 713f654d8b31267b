//! # earprint-core
//!
//! Personalised binaural rendering: impulse-response correction, crosstalk
//! cancellation design and a real-time convolution engine.
//!
//! ## Architecture
//!
//! ```text
//! sweep recordings ─► HrirTable::open_recording ─► CorrectionPipeline ─► HrirTable
//!                                                                          │
//!                         CrosstalkPaths ─► design_crosstalk_filters ─┐    │
//!                                                                     ▼    ▼
//! input device ─► SPSC RingBuffer ─► output callback ─► RealTimeConvolver ─► L/R
//!                                          ▲
//!                    OrientationFeed ─► OrientationHandle (atomics)
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens at construction
//! time or on the session thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod correction;
pub mod crosstalk;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod ir;
pub mod render;
pub mod speaker;
pub mod tracking;
pub mod wav;

// Convenience re-exports for downstream crates
pub use config::ProcessingConfig;
pub use correction::{CorrectionPipeline, CorrectionReport};
pub use crosstalk::{design_crosstalk_filters, CrosstalkFilterSet, CrosstalkPaths};
pub use engine::{DiagnosticsSnapshot, RenderSession, StreamOptions};
pub use error::{EarprintError, Result};
pub use events::{SessionStatus, SessionStatusEvent};
pub use ir::{balance::BalanceMethod, EarPair, HrirTable, ImpulseResponse, SweepSpec};
pub use render::{Brir, Orientation, OrientationHandle, OrientationKey, RealTimeConvolver, RenderConfig};
pub use speaker::{Side, Speaker};
pub use tracking::OrientationFeed;
