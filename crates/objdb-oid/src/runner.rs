//! Background checkpoint thread with adaptive pacing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, trace};

use crate::config::OidIndexConfig;
use crate::error::OidResult;
use crate::index::BitmapIdIndex;

/// Cooperative stop signal. Waiters wake as soon as it is raised.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    flag: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                flag: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn shutdown(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let _guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// The raw flag, for passing as a checkpoint cancel flag.
    pub fn flag(&self) -> &AtomicBool {
        &self.inner.flag
    }

    /// Sleep up to `duration`. Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_shutdown() {
            return true;
        }
        let _ = self
            .inner
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_shutdown())
            .unwrap_or_else(|e| e.into_inner());
        self.is_shutdown()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep interval and change cap of the checkpoint loop.
///
/// A drained pass doubles the interval; reaching the maximum restores the
/// configured cap. A pass cut short halves the interval; reaching the
/// minimum lifts the cap until the WAL drains again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdaptiveSchedule {
    wait: Duration,
    max_changes: usize,
    min_sleep: Duration,
    max_sleep: Duration,
    configured_max_changes: usize,
}

/// Floor under the sleep interval, whatever the config says.
const MIN_WAIT: Duration = Duration::from_millis(1);

impl AdaptiveSchedule {
    pub fn new(config: &OidIndexConfig) -> Self {
        let min_sleep = config.min_sleep().max(MIN_WAIT);
        let max_sleep = config.max_sleep().max(min_sleep);
        Self {
            wait: max_sleep,
            max_changes: config.checkpoint_max_changes,
            min_sleep,
            max_sleep,
            configured_max_changes: config.checkpoint_max_changes,
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Current per-pass cap; 0 means unlimited.
    pub fn max_changes(&self) -> usize {
        self.max_changes
    }

    pub fn after_pass(&mut self, drained: bool) {
        if drained {
            self.wait = self.wait.saturating_mul(2);
            if self.wait >= self.max_sleep {
                self.wait = self.max_sleep;
                self.max_changes = self.configured_max_changes;
            }
        } else {
            self.wait /= 2;
            if self.wait <= self.min_sleep {
                self.wait = self.min_sleep;
                self.max_changes = 0;
            }
        }
    }
}

/// Runs checkpoint passes on a named background thread until stopped.
pub struct CheckpointRunner {
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl CheckpointRunner {
    pub fn start(index: Arc<BitmapIdIndex>) -> OidResult<Self> {
        let signal = ShutdownSignal::new();
        let thread_signal = signal.clone();
        let mut schedule = AdaptiveSchedule::new(index.config());

        let handle = std::thread::Builder::new()
            .name("oid-checkpoint".into())
            .spawn(move || {
                info!(
                    max_sleep_ms = schedule.wait().as_millis() as u64,
                    max_changes = schedule.max_changes(),
                    "checkpoint runner started"
                );
                while !thread_signal.wait_timeout(schedule.wait()) {
                    match index.checkpoint(thread_signal.flag(), schedule.max_changes()) {
                        Ok(report) if report.cancelled => break,
                        Ok(report) => {
                            schedule.after_pass(report.drained);
                            trace!(
                                changes = report.changes,
                                next_wait_ms = schedule.wait().as_millis() as u64,
                                max_changes = schedule.max_changes(),
                                "checkpoint pass done"
                            );
                        }
                        Err(e) => error!(error = %e, "checkpoint failed; WAL kept for next pass"),
                    }
                }
                info!("checkpoint runner stopped");
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Signal the runner and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.signal.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CheckpointRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
