//! `StubBackend`: hardware-free backend that drives a [`BlockProcessor`]
//! from a worker thread.
//!
//! Feeds a fixed planar source block by block (silence once it runs out),
//! records every output block and keeps calling the processor until the
//! stream is stopped. Used to exercise the session lifecycle without audio
//! devices.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::{AudioBackend, AudioStream, BlockProcessor, StreamSpec};
use crate::error::{EarprintError, Result};

/// Output blocks recorded by a [`StubBackend`].
#[derive(Debug, Clone, Default)]
pub struct StubCapture {
    inner: Arc<Mutex<[Vec<f32>; 2]>>,
    callbacks: Arc<AtomicUsize>,
}

impl StubCapture {
    /// Left and right output recorded so far.
    pub fn output(&self) -> [Vec<f32>; 2] {
        self.inner.lock().clone()
    }

    pub fn callbacks(&self) -> usize {
        self.callbacks.load(Ordering::Acquire)
    }
}

pub struct StubBackend {
    source: Vec<Vec<f32>>,
    period: Duration,
    fail_open: bool,
    capture: StubCapture,
    last_spec: Arc<Mutex<Option<StreamSpec>>>,
}

impl StubBackend {
    pub fn new(source: Vec<Vec<f32>>) -> Self {
        Self {
            source,
            period: Duration::from_millis(1),
            fail_open: false,
            capture: StubCapture::default(),
            last_spec: Arc::new(Mutex::new(None)),
        }
    }

    /// A backend whose `open` always fails, as if no device were present.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new())
        }
    }

    /// Time between simulated callbacks.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn capture(&self) -> StubCapture {
        self.capture.clone()
    }

    /// Stream parameters passed to the most recent `open`.
    pub fn spec_handle(&self) -> Arc<Mutex<Option<StreamSpec>>> {
        Arc::clone(&self.last_spec)
    }
}

impl AudioBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn open(&mut self, spec: &StreamSpec, mut processor: Box<dyn BlockProcessor>) -> Result<Box<dyn AudioStream>> {
        *self.last_spec.lock() = Some(spec.clone());
        if self.fail_open {
            return Err(EarprintError::AudioDevice("stub device unavailable".into()));
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_worker = Arc::clone(&running);
        let source = self.source.clone();
        let capture = self.capture.clone();
        let period = self.period;
        let block = spec.block_size;
        let channels = spec.input_channels;

        let handle = thread::Builder::new()
            .name("earprint-stub-audio".into())
            .spawn(move || {
                let mut input = vec![vec![0.0f32; block]; channels];
                let mut left = vec![0.0f32; block];
                let mut right = vec![0.0f32; block];
                let mut start = 0usize;
                while running_worker.load(Ordering::Acquire) {
                    for (ch, dst) in input.iter_mut().enumerate() {
                        dst.fill(0.0);
                        let src = source.get(ch).map_or(&[][..], Vec::as_slice);
                        if start < src.len() {
                            let end = (start + block).min(src.len());
                            dst[..end - start].copy_from_slice(&src[start..end]);
                        }
                    }
                    processor.process(&input, &mut left, &mut right);
                    {
                        let mut out = capture.inner.lock();
                        out[0].extend_from_slice(&left);
                        out[1].extend_from_slice(&right);
                    }
                    capture.callbacks.fetch_add(1, Ordering::AcqRel);
                    start += block;
                    thread::sleep(period);
                }
                debug!(blocks = start / block.max(1), "stub stream finished");
            })?;

        Ok(Box::new(StubStream {
            running,
            handle: Some(handle),
        }))
    }
}

struct StubStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioStream for StubStream {
    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| EarprintError::AudioStream("stub audio thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for StubStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
