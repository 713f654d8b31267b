//! Session status events broadcast to hosts.

use serde::{Deserialize, Serialize};

/// Emitted whenever the session state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of a render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No stream open; `start()` may be called.
    Idle,
    /// Stream open and rendering.
    Running,
    /// The last start attempt failed. The session may be started again.
    Error,
}
