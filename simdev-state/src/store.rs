use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use super::models::{Interval, Reported};

#[derive(Debug)]
struct Inner {
    // never zero, see `Interval`
    interval: AtomicU64,
    reported: Mutex<Reported>,
}

/// Shared twin state of the device.
///
/// The telemetry interval can be read at any time without blocking, while
/// every access to the reported properties goes through a single lock so
/// that changes and the pushes that follow them are serialized.
#[derive(Clone, Debug)]
pub struct TwinStore {
    inner: Arc<Inner>,
}

impl Default for TwinStore {
    fn default() -> Self {
        Self::new(Interval::default())
    }
}

impl TwinStore {
    pub fn new(interval: Interval) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval: AtomicU64::new(interval.as_millis()),
                reported: Mutex::new(Reported::new()),
            }),
        }
    }

    /// Current telemetry interval
    pub fn interval(&self) -> Interval {
        let millis = self.inner.interval.load(Ordering::Acquire);
        Interval::from_millis(millis).unwrap_or_default()
    }

    pub fn set_interval(&self, interval: Interval) {
        self.inner
            .interval
            .store(interval.as_millis(), Ordering::Release);
    }

    /// Lock the reported properties for a read-modify-push cycle
    pub async fn lock_reported(&self) -> MutexGuard<'_, Reported> {
        self.inner.reported.lock().await
    }

    /// Snapshot of the reported properties
    pub async fn reported(&self) -> Reported {
        self.inner.reported.lock().await.clone()
    }
}
