//! Reconciliation store: merged snapshots per display identity.
//!
//! The store is an explicitly constructed value, shared by cloning, and
//! partitioned by [`Identity`]. Each partition has exactly one
//! [`StoreWriter`]; opening a second one fails with
//! [`StoreError::WriterAlreadyOpen`]. Readers never mutate.
//!
//! ```text
//!   StoreWriter::merge ──► pending snapshot, revision += 1
//!                               │ notify
//!                               ▼
//!                       debounce task (trailing, resets on every merge)
//!                               │ watch::send_replace
//!                               ▼
//!                         StoreReader::changed
//! ```
//!
//! Ordering: the last merge applied wins per field. Messages are not
//! reordered by their timestamps.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use linewatch_common::{Identity, Snapshot, SnapshotPatch};

use crate::errors::StoreError;

/// Default publish coalescing delay.
const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Per-partition logical revision. Advances on every merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// What readers see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Published {
    pub snapshot: Snapshot,
    pub revision: Revision,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl StoreConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Partition {
    published: watch::Receiver<Published>,
    cancel: CancellationToken,
}

struct StoreInner {
    config: StoreConfig,
    partitions: Mutex<HashMap<Identity, Partition>>,
}

#[derive(Clone)]
pub struct ReconciliationStore {
    inner: Arc<StoreInner>,
}

impl Default for ReconciliationStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl ReconciliationStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                partitions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create the partition for `identity` and hand out its only writer.
    /// Must be called from within a Tokio runtime.
    pub fn open(&self, identity: Identity) -> Result<StoreWriter, StoreError> {
        let mut partitions = lock(&self.inner.partitions);
        if partitions.contains_key(&identity) {
            return Err(StoreError::WriterAlreadyOpen {
                identity: identity.to_string(),
            });
        }

        let (tx, rx) = watch::channel(Published::default());
        let pending = Arc::new(Mutex::new(Published::default()));
        let dirty = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        tokio::spawn(debounce_loop(
            self.inner.config.debounce,
            pending.clone(),
            dirty.clone(),
            tx,
            cancel.clone(),
        ));

        partitions.insert(
            identity.clone(),
            Partition {
                published: rx,
                cancel: cancel.clone(),
            },
        );
        debug!(%identity, "store partition opened");

        Ok(StoreWriter {
            identity,
            store: self.clone(),
            pending,
            dirty,
            cancel,
        })
    }

    pub fn reader(&self, identity: &Identity) -> Option<StoreReader> {
        lock(&self.inner.partitions)
            .get(identity)
            .map(|p| StoreReader {
                identity: identity.clone(),
                rx: p.published.clone(),
            })
    }

    pub fn is_open(&self, identity: &Identity) -> bool {
        lock(&self.inner.partitions).contains_key(identity)
    }

    pub fn open_count(&self) -> usize {
        lock(&self.inner.partitions).len()
    }

    fn close(&self, identity: &Identity) {
        if let Some(partition) = lock(&self.inner.partitions).remove(identity) {
            partition.cancel.cancel();
            debug!(%identity, "store partition closed");
        }
    }
}

async fn debounce_loop(
    debounce: Duration,
    pending: Arc<Mutex<Published>>,
    dirty: Arc<Notify>,
    tx: watch::Sender<Published>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = dirty.notified() => {}
        }
        // Trailing edge: wait for a quiet period.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = dirty.notified() => continue,
                _ = tokio::time::sleep(debounce) => break,
            }
        }
        let published = lock(&pending).clone();
        trace!(revision = %published.revision, "publishing snapshot");
        tx.send_replace(published);
    }
}

/// The single writer for one partition. Dropping it closes the partition
/// and cancels its pending publish.
pub struct StoreWriter {
    identity: Identity,
    store: ReconciliationStore,
    pending: Arc<Mutex<Published>>,
    dirty: Arc<Notify>,
    cancel: CancellationToken,
}

impl StoreWriter {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Shallow-merge `patch` and advance the revision, even when nothing
    /// changed. Publication is debounced.
    pub fn merge(&self, patch: &SnapshotPatch) -> Result<Revision, StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::PartitionClosed {
                identity: self.identity.to_string(),
            });
        }
        let revision = {
            let mut pending = lock(&self.pending);
            pending.snapshot.merge(patch);
            pending.revision = Revision(pending.revision.0 + 1);
            pending.revision
        };
        self.dirty.notify_one();
        Ok(revision)
    }

    /// Latest merged state, including merges not yet published.
    pub fn current(&self) -> Published {
        lock(&self.pending).clone()
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.store.close(&self.identity);
    }
}

/// Read side of a partition.
#[derive(Clone)]
pub struct StoreReader {
    identity: Identity,
    rx: watch::Receiver<Published>,
}

impl StoreReader {
    pub fn current(&self) -> Published {
        self.rx.borrow().clone()
    }

    /// Wait for the next publication.
    pub async fn changed(&mut self) -> Result<Published, StoreError> {
        self.rx
            .changed()
            .await
            .map_err(|_| StoreError::PartitionClosed {
                identity: self.identity.to_string(),
            })?;
        Ok(self.rx.borrow_and_update().clone())
    }
}
