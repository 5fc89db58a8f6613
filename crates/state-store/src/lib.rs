#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use types::DeviceSnapshot;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no snapshot published after waiting {waited_ms}ms")]
    NotReady { waited_ms: u64 },
}

/// Holds the latest complete snapshot and the device availability signal.
///
/// Cloning yields another handle onto the same store. Snapshots are swapped in
/// whole, so readers see either the previous or the new one.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    published: watch::Sender<Option<Arc<DeviceSnapshot>>>,
    available: AtomicBool,
    last_cycle: Mutex<Option<Duration>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (published, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                published,
                available: AtomicBool::new(false),
                last_cycle: Mutex::new(None),
            }),
        }
    }

    /// Replaces the current snapshot and wakes any reader waiting for the first one.
    pub fn publish(&self, snapshot: DeviceSnapshot) {
        let previous = self.inner.published.send_replace(Some(Arc::new(snapshot)));
        if previous.is_none() {
            debug!("first snapshot published, store ready");
        }
    }

    /// Waits up to `wait` for the first snapshot, then returns the latest one.
    pub async fn read(&self, wait: Duration) -> Result<Arc<DeviceSnapshot>, StoreError> {
        if let Some(snapshot) = self.try_read() {
            return Ok(snapshot);
        }

        let mut rx = self.inner.published.subscribe();
        let first_publish = async move {
            loop {
                let current = rx.borrow_and_update().as_ref().cloned();
                if current.is_some() {
                    return current;
                }
                // The sender lives as long as this handle, so `changed` only
                // fails once the store itself is gone.
                rx.changed().await.ok()?;
            }
        };

        match timeout(wait, first_publish).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            _ => Err(StoreError::NotReady {
                waited_ms: wait.as_millis() as u64,
            }),
        }
    }

    pub fn try_read(&self) -> Option<Arc<DeviceSnapshot>> {
        self.inner.published.borrow().as_ref().map(Arc::clone)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.published.borrow().is_some()
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire)
    }

    pub fn record_cycle_duration(&self, elapsed: Duration) {
        if let Ok(mut last) = self.inner.last_cycle.lock() {
            *last = Some(elapsed);
        }
    }

    /// Duration of the last completed poll cycle, if any.
    pub fn last_cycle_duration(&self) -> Option<Duration> {
        self.inner.last_cycle.lock().ok().and_then(|last| *last)
    }
}
