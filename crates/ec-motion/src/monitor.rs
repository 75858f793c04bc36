//! Background status monitor.
//!
//! A dedicated thread takes a snapshot every interval, warns while an alarm
//! is active and hands each snapshot to a callback. Read failures are logged
//! and the loop keeps going.

use crate::ports::StatusPort;
use crate::status::StatusReport;
use ec_common::error::{ActuatorError, EcResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared state between the owner and the monitor thread.
#[derive(Debug, Default)]
struct MonitorState {
    /// Flag to signal the monitor thread to stop.
    stop_requested: AtomicBool,
    /// Snapshots delivered to the callback.
    snapshots: AtomicU64,
    /// Snapshot reads that failed.
    failures: AtomicU64,
}

/// Periodic status poller.
#[derive(Debug)]
pub struct StatusMonitor {
    state: Arc<MonitorState>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl StatusMonitor {
    /// Create a stopped monitor polling every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Arc::new(MonitorState::default()),
            handle: None,
            interval: interval.max(Duration::from_millis(1)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start polling `port`, calling `on_status` with every snapshot.
    pub fn start<P, F>(&mut self, port: Arc<P>, mut on_status: F) -> EcResult<()>
    where
        P: StatusPort + 'static,
        F: FnMut(&P::Snapshot) + Send + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(ActuatorError::InvalidArgument(String::from(
                "status monitor already running",
            )));
        }

        info!(interval_ms = self.interval.as_millis(), "Starting status monitor");
        self.state.stop_requested.store(false, Ordering::Release);

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        self.running.store(true, Ordering::Release);

        let handle = match thread::Builder::new()
            .name("ec-status-monitor".into())
            .spawn(move || {
                debug!("Status monitor thread started");

                while !state.stop_requested.load(Ordering::Acquire) {
                    match port.snapshot() {
                        Ok(snapshot) => {
                            if let Some(alarm) = snapshot.active_alarm() {
                                warn!(%alarm, "Alarm active");
                            }
                            state.snapshots.fetch_add(1, Ordering::AcqRel);
                            on_status(&snapshot);
                        }
                        Err(e) => {
                            state.failures.fetch_add(1, Ordering::AcqRel);
                            error!(error = %e, "Status read failed");
                        }
                    }
                    thread::sleep(interval);
                }

                running.store(false, Ordering::Release);
                debug!("Status monitor thread stopped");
            }) {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(ActuatorError::Io(format!(
                    "failed to spawn status monitor thread: {e}"
                )));
            }
        };

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the monitor thread and wait for it to exit.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::Acquire) && self.handle.is_none() {
            return;
        }

        info!("Stopping status monitor");
        self.state.stop_requested.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("Status monitor thread panicked: {:?}", e);
            }
        }
    }

    /// Whether the monitor thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshots delivered so far.
    #[must_use]
    pub fn snapshots_taken(&self) -> u64 {
        self.state.snapshots.load(Ordering::Acquire)
    }

    /// Failed snapshot reads so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.state.failures.load(Ordering::Acquire)
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
