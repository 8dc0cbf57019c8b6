//! Snapshot scheduler — background thread that calls `Store::snapshot()`
//! every `interval`.
//!
//! - Errors of a periodic snapshot are logged (Store::snapshot already logs
//!   them) and the loop keeps going; the next tick simply tries again.
//! - stop() is idempotent and may be called from any thread. When it returns,
//!   the thread has exited and no further automatic snapshot will be taken.
//! - The loop waits on a channel with recv_timeout: dropping the sender wakes it
//!   immediately, so stop() never waits for a full interval.

use log::{debug, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::store::Store;
use crate::util::format_duration;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("snapshot interval must be a positive duration")]
    InvalidInterval,
    #[error("spawn snapshot thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Running {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SnapshotScheduler {
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl SnapshotScheduler {
    /// Start the loop right away. Zero interval is rejected.
    pub fn start(store: Arc<Store>, interval: Duration) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("qm-snapshot".to_string())
            .spawn(move || {
                debug!("snapshot loop started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            // ошибка уже залогирована в Store::snapshot
                            let _ = store.snapshot();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("snapshot loop stopped");
            })?;

        info!("snapshot scheduler started: interval={}", format_duration(interval));
        Ok(Self {
            interval,
            running: Mutex::new(Some(Running { stop_tx, handle })),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the loop and wait for the thread to exit. Second call is a no-op.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running { stop_tx, handle }) = running else {
            return;
        };

        drop(stop_tx);
        // Снапшот, начатый до stop, доработает до конца; после join новых нет.
        if handle.join().is_err() {
            log::error!("snapshot thread panicked");
        }
        info!("snapshot scheduler stopped");
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SnapshotScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotScheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
