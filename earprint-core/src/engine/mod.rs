//! `RenderSession`: live playback lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RenderSession::new(convolver, backend)      status = Idle
//!     └─► start(options)   stream opened on the session thread, status = Running
//!         └─► stop()       stream stopped + dropped, thread joined, status = Idle
//! ```
//!
//! A failed `start()` leaves status = Error and the session can be started
//! again. With `StreamOptions::duration` set, the session thread closes the
//! stream by itself once the duration elapses; `stop()` then only joins.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS. Streams are therefore opened,
//! stopped and dropped on one dedicated session thread; a bounded channel
//! carries the open result back to the `start()` caller. The audio callback
//! reaches the convolver through `try_lock` and outputs silence when it is
//! held elsewhere, so it never blocks.

pub mod diagnostics;

use std::sync::{atomic::Ordering, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{AudioBackend, BlockProcessor, CpalBackend, StreamSpec},
    error::{EarprintError, Result},
    events::{SessionStatus, SessionStatusEvent},
    render::{Orientation, OrientationHandle, RealTimeConvolver},
};

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

/// Status events buffered for slow subscribers.
const BROADCAST_CAP: usize = 64;

/// Per-start stream options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    /// Preferred capture device name; `None` uses the system default.
    pub input_device: Option<String>,
    /// Preferred playback device name; `None` uses the system default.
    pub output_device: Option<String>,
    /// Close the stream automatically after this long.
    pub duration: Option<Duration>,
}

/// Bridges the audio callback to the shared convolver.
struct SessionProcessor {
    convolver: Arc<Mutex<RealTimeConvolver>>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl BlockProcessor for SessionProcessor {
    fn process(&mut self, input: &[Vec<f32>], left: &mut [f32], right: &mut [f32]) {
        let Some(mut convolver) = self.convolver.try_lock() else {
            left.fill(0.0);
            right.fill(0.0);
            self.diagnostics.contention_misses.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if convolver.process_block(input, left, right).is_err() {
            left.fill(0.0);
            right.fill(0.0);
            self.diagnostics.shape_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.diagnostics.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn input_underrun(&mut self) {
        self.diagnostics.input_underruns.fetch_add(1, Ordering::Relaxed);
    }

    fn input_overrun(&mut self, dropped: usize) {
        self.diagnostics.input_overruns.fetch_add(dropped, Ordering::Relaxed);
    }
}

struct SessionWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

type BackendSlot = Arc<Mutex<Option<Box<dyn AudioBackend>>>>;

fn session_thread() -> thread::Builder {
    thread::Builder::new().name("earprint-session".into())
}

fn publish(
    status: &Mutex<SessionStatus>,
    status_tx: &broadcast::Sender<SessionStatusEvent>,
    new_status: SessionStatus,
    detail: Option<String>,
) {
    *status.lock() = new_status;
    let _ = status_tx.send(SessionStatusEvent {
        status: new_status,
        detail,
    });
}

/// Owns a convolver and an audio backend and runs live playback.
///
/// `RenderSession` is `Send + Sync`; all fields use interior mutability.
pub struct RenderSession {
    convolver: Arc<Mutex<RealTimeConvolver>>,
    orientation: OrientationHandle,
    /// `None` while the session thread holds it.
    backend: BackendSlot,
    worker: Mutex<Option<SessionWorker>>,
    spawner: fn() -> thread::Builder,
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl RenderSession {
    pub fn new(convolver: RealTimeConvolver, backend: Box<dyn AudioBackend>) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            orientation: convolver.orientation_handle(),
            convolver: Arc::new(Mutex::new(convolver)),
            backend: Arc::new(Mutex::new(Some(backend))),
            worker: Mutex::new(None),
            spawner: session_thread,
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }

    /// Session on the system's audio devices.
    pub fn with_system_audio(convolver: RealTimeConvolver) -> Self {
        Self::new(convolver, Box::new(CpalBackend::new()))
    }

    /// Opens the stream and starts rendering.
    ///
    /// Blocks until the backend confirms the stream is open (or fails).
    ///
    /// # Errors
    /// - `EarprintError::AlreadyRunning` if a stream is open.
    /// - `EarprintError::AudioDevice` / `AudioStream` / `NoDefault*Device` from
    ///   the backend.
    /// - `EarprintError::Io` if the session thread cannot be spawned; the
    ///   backend stays with the session.
    pub fn start(&self, options: StreamOptions) -> Result<()> {
        let mut worker = self.worker.lock();
        if let Some(current) = worker.as_ref() {
            if !current.handle.is_finished() {
                return Err(EarprintError::AlreadyRunning);
            }
        }
        if let Some(finished) = worker.take() {
            self.reclaim(finished)?;
        }

        let backend_name = match self.backend.lock().as_ref() {
            Some(backend) => backend.name(),
            None => {
                return Err(EarprintError::Other(anyhow::anyhow!(
                    "audio backend lost after a session thread panic"
                )))
            }
        };

        let spec = {
            let convolver = self.convolver.lock();
            StreamSpec {
                sample_rate: convolver.sample_rate(),
                block_size: convolver.block_size(),
                input_channels: convolver.input_channels(),
                input_device: options.input_device.clone(),
                output_device: options.output_device.clone(),
            }
        };
        self.diagnostics.reset();

        let processor = Box::new(SessionProcessor {
            convolver: Arc::clone(&self.convolver),
            diagnostics: Arc::clone(&self.diagnostics),
        });
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        let duration = options.duration;
        let slot = Arc::clone(&self.backend);
        let sample_rate = spec.sample_rate;

        let (open_tx, open_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let spawned = (self.spawner)().spawn(move || {
            // Open, stop and drop all happen on this thread.
            let Some(mut backend) = slot.lock().take() else {
                return;
            };
            let mut stream = match backend.open(&spec, processor) {
                Ok(stream) => stream,
                Err(e) => {
                    *slot.lock() = Some(backend);
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            publish(&status, &status_tx, SessionStatus::Running, None);
            let _ = open_tx.send(Ok(()));

            let elapsed = match duration {
                Some(limit) => matches!(
                    stop_rx.recv_timeout(limit),
                    Err(RecvTimeoutError::Timeout)
                ),
                None => {
                    let _ = stop_rx.recv();
                    false
                }
            };

            if let Err(e) = stream.stop() {
                warn!("stream did not stop cleanly: {e}");
            }
            drop(stream);

            *slot.lock() = Some(backend);
            if elapsed {
                info!("session duration elapsed, stream closed");
                publish(&status, &status_tx, SessionStatus::Idle, None);
            }
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                return Err(e.into());
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => {
                *worker = Some(SessionWorker { stop_tx, handle });
                info!(
                    backend = backend_name,
                    sample_rate,
                    "session started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.reclaim(SessionWorker { stop_tx, handle })?;
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent: the thread panicked.
                let _ = handle.join();
                self.set_status(
                    SessionStatus::Error,
                    Some("session thread failed to start".into()),
                );
                Err(EarprintError::Other(anyhow::anyhow!(
                    "session thread died unexpectedly"
                )))
            }
        }
    }

    /// Stops the stream and joins the session thread. No callback fires
    /// after this returns.
    ///
    /// # Errors
    /// - `EarprintError::NotRunning` if `start()` has not succeeded.
    pub fn stop(&self) -> Result<()> {
        let worker = self.worker.lock().take().ok_or(EarprintError::NotRunning)?;
        self.reclaim(worker)?;
        self.set_status(SessionStatus::Idle, None);
        info!("session stopped");
        Ok(())
    }

    /// Whether a stream is currently open.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of callback counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Lock-free orientation update, safe while the stream runs.
    pub fn set_orientation(&self, yaw: f32, pitch: f32, roll: f32) {
        self.orientation.set(Orientation::new(yaw, pitch, roll));
    }

    pub fn orientation_handle(&self) -> OrientationHandle {
        self.orientation.clone()
    }

    /// Runs `f` with exclusive access to the convolver. While it runs the
    /// audio callback outputs silence.
    pub fn with_convolver<R>(&self, f: impl FnOnce(&mut RealTimeConvolver) -> R) -> R {
        f(&mut self.convolver.lock())
    }

    /// Signals the session thread and joins it. The thread puts the backend
    /// back into its slot before exiting.
    fn reclaim(&self, worker: SessionWorker) -> Result<()> {
        let _ = worker.stop_tx.send(());
        worker
            .handle
            .join()
            .map_err(|_| EarprintError::Other(anyhow::anyhow!("session thread panicked")))
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        publish(&self.status, &self.status_tx, new_status, detail);
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stub::StubBackend;
    use crate::render::{Brir, OrientationKey, RenderConfig};

    fn passthrough() -> RealTimeConvolver {
        let brirs = vec![Brir::new(OrientationKey::Yaw(0.0), vec![1.0], vec![1.0])];
        RealTimeConvolver::from_brirs(brirs, 48_000, &RenderConfig::new(64)).unwrap()
    }

    fn session() -> RenderSession {
        RenderSession::new(passthrough(), Box::new(StubBackend::new(Vec::new())))
    }

    fn oversized_thread() -> thread::Builder {
        // No address space can hold this stack, so spawning fails.
        thread::Builder::new().stack_size(1 << 60)
    }

    #[test]
    fn failed_spawn_keeps_backend_for_retry() {
        let mut session = session();
        session.spawner = oversized_thread;
        assert!(session.start(StreamOptions::default()).is_err());
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.backend.lock().is_some());
        assert!(!session.is_running());

        session.spawner = session_thread;
        session.start(StreamOptions::default()).unwrap();
        assert!(session.is_running());
        session.stop().unwrap();
        assert!(session.backend.lock().is_some());
    }

    #[test]
    fn overruns_are_counted() {
        let diagnostics = Arc::new(SessionDiagnostics::default());
        let mut processor = SessionProcessor {
            convolver: Arc::new(Mutex::new(passthrough())),
            diagnostics: Arc::clone(&diagnostics),
        };
        processor.input_overrun(7);
        processor.input_overrun(5);
        assert_eq!(diagnostics.snapshot().input_overruns, 12);
    }
}
