//! Aegis RRD Store Handle - Async Driver
//!
//! Shares a layered store between tasks and runs its debounced snapshot
//! flushes on the tokio runtime. The first write after a quiet period arms the
//! store's flush scheduler and spawns one timer task; writes that land while
//! the flush is armed or in flight ride along with it.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::config::StoreConfig;
use crate::store::{LayeredStore, StoreStats};
use crate::types::{Point, Timestamp};
use aegis_rrd_common::{Result, RrdError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    store: Mutex<LayeredStore>,
    pending: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<RrdError>>,
}

impl Shared {
    /// Body of the debounce timer task.
    async fn run_scheduled_flush(self: Arc<Self>) {
        let delay = self.store.lock().flush_delay();
        tokio::time::sleep(delay).await;

        let job = self.store.lock().begin_scheduled_flush();
        let result = match job {
            Some(job) => job.execute(),
            None => Ok(0),
        };

        // record the failure before a later write can re-arm
        let mut store = self.store.lock();
        store.finish_scheduled_flush(&result);
        if let Err(e) = result {
            tracing::error!("Scheduled snapshot flush failed: {}", e);
            *self.last_error.lock() = Some(e);
        }
        drop(store);
    }
}

// =============================================================================
// Store Handle
// =============================================================================

/// Cloneable, thread-safe handle to a [`LayeredStore`].
///
/// Writes must happen inside a tokio runtime when persistence is enabled,
/// since arming a flush spawns a task.
#[derive(Clone)]
pub struct StoreHandle {
    shared: Arc<Shared>,
}

impl StoreHandle {
    /// Open a store from configuration and wrap it.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Ok(Self::new(LayeredStore::open(config)?))
    }

    /// Wrap an existing store.
    ///
    /// A flush the store armed before it was wrapped is taken over: it is
    /// rescheduled on the current runtime, or left for the next write to arm
    /// when called outside one.
    pub fn new(mut store: LayeredStore) -> Self {
        let carried = store.disarm_flush();
        let handle = Self {
            shared: Arc::new(Shared {
                store: Mutex::new(store),
                pending: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        };

        if carried && tokio::runtime::Handle::try_current().is_ok() {
            let mut store = handle.shared.store.lock();
            if store.schedule_flush(Instant::now()) {
                handle.spawn_flush();
            }
            drop(store);
        }
        handle
    }

    /// Write one sample, arming a debounced flush if none is pending.
    pub fn write(&self, timestamp: Timestamp, value: f64) {
        let mut store = self.shared.store.lock();
        if store.write_and_schedule(timestamp, value, Instant::now()) {
            self.spawn_flush();
        }
    }

    /// Start the timer task for a freshly armed flush. Callers hold the store
    /// lock so the pending task always matches the armed scheduler.
    fn spawn_flush(&self) {
        let task = tokio::spawn(Arc::clone(&self.shared).run_scheduled_flush());
        *self.shared.pending.lock() = Some(task);
    }

    /// Write a full snapshot immediately, outside the debounce.
    pub async fn flush_now(&self) -> Result<()> {
        let job = self.shared.store.lock().flush_job();
        let Some(job) = job else {
            return Ok(());
        };

        let written = job.execute()?;
        self.shared.store.lock().record_flush(written);
        Ok(())
    }

    pub fn read(&self, start: Timestamp, end: Timestamp) -> Vec<Point> {
        self.shared.store.lock().read(start, end)
    }

    pub fn size(&self) -> usize {
        self.shared.store.lock().size()
    }

    pub fn stats(&self) -> StoreStats {
        self.shared.store.lock().stats()
    }

    /// Whether a debounced flush is armed or running.
    pub fn flush_pending(&self) -> bool {
        self.shared.store.lock().scheduler().is_pending()
    }

    /// Take the most recent debounced flush failure, if any.
    pub fn take_flush_error(&self) -> Option<RrdError> {
        self.shared.last_error.lock().take()
    }

    /// Run a closure against the locked store.
    pub fn with_store<R>(&self, f: impl FnOnce(&LayeredStore) -> R) -> R {
        f(&self.shared.store.lock())
    }

    /// Wait for any pending flush to finish and report its failure, if any.
    pub async fn close(&self) -> Result<()> {
        let pending = self.shared.pending.lock().take();
        if let Some(task) = pending {
            if let Err(e) = task.await {
                return Err(RrdError::FlushFailed(format!("flush task aborted: {}", e)));
            }
        }

        match self.take_flush_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("store", &*self.shared.store.lock())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
