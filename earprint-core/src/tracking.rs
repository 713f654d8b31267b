//! Head-tracker polling thread.
//!
//! The reader is any closure returning the latest head orientation (or `None`
//! when no new reading is available). Each reading is published to an
//! [`OrientationHandle`] that the renderer samples once per block.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::render::{Orientation, OrientationHandle};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct OrientationFeed {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl OrientationFeed {
    /// Spawns the polling thread.
    pub fn start<F>(mut reader: F, target: OrientationHandle, poll_interval: Duration) -> Result<Self>
    where
        F: FnMut() -> Option<Orientation> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("earprint-tracker".into())
            .spawn(move || {
                let mut updates = 0u64;
                while flag.load(Ordering::Acquire) {
                    if let Some(orientation) = reader() {
                        if target.set(orientation) {
                            updates += 1;
                        }
                    }
                    thread::sleep(poll_interval);
                }
                updates
            })?;
        info!(poll_ms = poll_interval.as_millis() as u64, "orientation feed started");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops polling and joins the thread. Returns the number of readings
    /// published.
    pub fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::Release);
        let updates = self
            .handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0);
        debug!(updates, "orientation feed stopped");
        updates
    }
}

impl Drop for OrientationFeed {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn readings_reach_the_handle() {
        let handle = OrientationHandle::new();
        let mut yaw = 0.0f32;
        let mut feed = OrientationFeed::start(
            move || {
                yaw = (yaw + 1.0).min(90.0);
                Some(Orientation::new(yaw, 0.0, 0.0))
            },
            handle.clone(),
            Duration::from_millis(1),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.get().yaw < 5.0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(feed.is_running());
        let updates = feed.stop();
        assert!(updates >= 5);
        assert!(!feed.is_running());
        assert!(handle.get().yaw >= 5.0);
    }

    #[test]
    fn empty_readings_leave_orientation_untouched() {
        let handle = OrientationHandle::new();
        handle.set(Orientation::new(30.0, 0.0, 0.0));
        let mut feed =
            OrientationFeed::start(|| None, handle.clone(), Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(feed.stop(), 0);
        assert_eq!(handle.get().yaw, 30.0);
    }
}
