//! Counters bumped from the audio callback.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub blocks_processed: AtomicUsize,
    /// Callbacks that found the convolver locked and output silence.
    pub contention_misses: AtomicUsize,
    pub input_underruns: AtomicUsize,
    /// Captured samples discarded because the input ring was full.
    pub input_overruns: AtomicUsize,
    pub shape_errors: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.blocks_processed.store(0, Ordering::Relaxed);
        self.contention_misses.store(0, Ordering::Relaxed);
        self.input_underruns.store(0, Ordering::Relaxed);
        self.input_overruns.store(0, Ordering::Relaxed);
        self.shape_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            contention_misses: self.contention_misses.load(Ordering::Relaxed),
            input_underruns: self.input_underruns.load(Ordering::Relaxed),
            input_overruns: self.input_overruns.load(Ordering::Relaxed),
            shape_errors: self.shape_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_processed: usize,
    pub contention_misses: usize,
    pub input_underruns: usize,
    pub input_overruns: usize,
    pub shape_errors: usize,
}
