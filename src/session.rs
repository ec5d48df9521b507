//! One live display: subscription, store partition, fetches and highlights
//! wired together for a single [`Identity`].
//!
//! ```text
//!   RealtimeClient ──Inbound──► handler ──patch──► StoreWriter::merge
//!        │                         │ no patch / refresh request
//!        │ ConnectionState         ▼
//!        └──► FallbackPoller ──► refresh ──fetch──► StoreWriter::merge
//!
//!   StoreReader::changed ──► ChangeDetector ──► HighlightSet
//!                        └──► ViewState::Ready
//! ```
//!
//! The view never goes back to `Loading` once data has arrived. A failed
//! refresh keeps the last published snapshot in `ViewState::Failed`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use linewatch_common::{Identity, SnapshotPatch};

use crate::client::{FallbackPoller, Handler, Inbound, PollerConfig, RealtimeClient, Refresher};
use crate::detect::{ChangeDetector, DEFAULT_HIGHLIGHT, HighlightSet, TrackedFields};
use crate::errors::{FetchError, StoreError};
use crate::fetch::{BackendClient, FetchOutcome};
use crate::store::{Published, ReconciliationStore, StoreConfig, StoreReader, StoreWriter};

/// Where full snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, identity: &Identity) -> Result<FetchOutcome, FetchError>;
}

#[async_trait]
impl SnapshotSource for BackendClient {
    async fn fetch(&self, identity: &Identity) -> Result<FetchOutcome, FetchError> {
        self.fetch_snapshot(identity).await
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poller: PollerConfig,
    pub debounce: Duration,
    pub highlight: Duration,
    pub tracked: TrackedFields,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            debounce: StoreConfig::default().debounce,
            highlight: DEFAULT_HIGHLIGHT,
            tracked: TrackedFields::default(),
        }
    }
}

impl SessionConfig {
    /// Store settings matching this session's debounce.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default().with_debounce(self.debounce)
    }
}

/// What the board shows.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// Nothing has arrived yet.
    Loading,
    Ready(Published),
    /// The last refresh failed.
    Failed {
        message: String,
        last_known: Option<Published>,
    },
    /// The backend has no data for this identity.
    NoData,
}

impl ViewState {
    /// Snapshot to draw, if any.
    pub fn published(&self) -> Option<&Published> {
        match self {
            Self::Ready(p) => Some(p),
            Self::Failed { last_known, .. } => last_known.as_ref(),
            Self::Loading | Self::NoData => None,
        }
    }
}

struct Shared {
    identity: Identity,
    writer: StoreWriter,
    source: Arc<dyn SnapshotSource>,
    state: watch::Sender<ViewState>,
    refresh_requested: Arc<Notify>,
}

impl Shared {
    fn has_data(&self) -> bool {
        self.writer.current().revision.0 > 0
    }

    fn on_inbound(&self, inbound: &Inbound) {
        match inbound {
            Inbound::Update(message) => match message.extract_patch() {
                Some(patch) if carries_metrics(&patch) => {
                    if let Err(e) = self.writer.merge(&patch) {
                        debug!(identity = %self.identity, error = %e, "update after close");
                    }
                }
                _ => {
                    debug!(identity = %self.identity, "update without a record, refetching");
                    self.refresh_requested.notify_one();
                }
            },
            Inbound::RefreshRequested => self.refresh_requested.notify_one(),
        }
    }

    async fn refresh(&self) {
        match self.source.fetch(&self.identity).await {
            Ok(FetchOutcome::Data(snapshot)) => {
                if let Err(e) = self.writer.merge(&SnapshotPatch::from(snapshot)) {
                    debug!(identity = %self.identity, error = %e, "fetch finished after close");
                }
            }
            Ok(FetchOutcome::Empty) => {
                if self.has_data() {
                    debug!(identity = %self.identity, "empty refresh, keeping last snapshot");
                } else {
                    self.state.send_replace(ViewState::NoData);
                }
            }
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "refresh fetch failed");
                let last_known = self.has_data().then(|| self.writer.current());
                self.state.send_replace(ViewState::Failed {
                    message: e.to_string(),
                    last_known,
                });
            }
        }
    }
}

/// True when a patch has more than the identity fields.
fn carries_metrics(patch: &SnapshotPatch) -> bool {
    use linewatch_common::MetricField::{Factory, Line, LineCode, Team};
    patch.hourly.is_some()
        || patch
            .touched()
            .iter()
            .any(|f| !matches!(f, LineCode | Factory | Line | Team))
}

struct SessionRefresher(Weak<Shared>);

#[async_trait]
impl Refresher for SessionRefresher {
    async fn refresh(&self) {
        if let Some(shared) = self.0.upgrade() {
            shared.refresh().await;
        }
    }
}

/// A running display for one identity.
pub struct DisplaySession {
    shared: Arc<Shared>,
    client: RealtimeClient,
    handler: Handler,
    highlights: HighlightSet,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DisplaySession {
    /// Open the store partition, subscribe, and schedule the initial fetch.
    /// Must be called from within a Tokio runtime.
    pub fn start(
        client: &RealtimeClient,
        store: &ReconciliationStore,
        source: Arc<dyn SnapshotSource>,
        identity: Identity,
        config: SessionConfig,
    ) -> Result<Self, StoreError> {
        let writer = store.open(identity.clone())?;
        let reader = store
            .reader(&identity)
            .ok_or_else(|| StoreError::PartitionClosed {
                identity: identity.to_string(),
            })?;
        let (state, _) = watch::channel(ViewState::Loading);
        let shared = Arc::new(Shared {
            identity: identity.clone(),
            writer,
            source,
            state,
            refresh_requested: Arc::new(Notify::new()),
        });
        let cancel = CancellationToken::new();
        let highlights = HighlightSet::new(config.highlight);

        let tasks = vec![
            tokio::spawn(follow_store(
                reader,
                Arc::downgrade(&shared),
                ChangeDetector::new(config.tracked.clone()),
                highlights.clone(),
                cancel.clone(),
            )),
            tokio::spawn(refresh_worker(
                Arc::downgrade(&shared),
                shared.refresh_requested.clone(),
                cancel.clone(),
            )),
            FallbackPoller::new(
                config.poller.clone(),
                client.watch_state(),
                Arc::new(SessionRefresher(Arc::downgrade(&shared))),
                cancel.child_token(),
            )
            .spawn(),
        ];

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let handler: Handler = Arc::new(move |inbound: &Inbound| {
            if let Some(shared) = weak.upgrade() {
                shared.on_inbound(inbound);
            }
        });
        client.subscribe(identity.clone(), handler.clone());

        // Initial load.
        shared.refresh_requested.notify_one();
        info!(%identity, "display session started");

        Ok(Self {
            shared,
            client: client.clone(),
            handler,
            highlights,
            cancel,
            tasks,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    pub fn state(&self) -> ViewState {
        self.shared.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ViewState> {
        self.shared.state.subscribe()
    }

    pub fn highlights(&self) -> &HighlightSet {
        &self.highlights
    }

    /// Fetch now and merge the result.
    pub async fn refresh(&self) {
        self.shared.refresh().await;
    }

    fn stop(&self) {
        self.client.unsubscribe(&self.handler);
        self.cancel.cancel();
        self.highlights.teardown();
    }

    /// Unsubscribe, stop every task and timer, and close the partition.
    /// Returns once every task has exited, without waiting for an
    /// in-flight fetch.
    pub async fn teardown(mut self) {
        self.stop();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        info!(identity = %self.shared.identity, "display session stopped");
    }
}

/// Dropping a session without `teardown` still stops its tasks. The
/// partition closes once they have observed the cancellation.
impl Drop for DisplaySession {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!(identity = %self.shared.identity, "display session dropped");
            self.stop();
        }
    }
}

async fn refresh_worker(shared: Weak<Shared>, requested: Arc<Notify>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = requested.notified() => {}
        }
        let Some(shared) = shared.upgrade() else {
            return;
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = shared.refresh() => {}
        }
    }
}

async fn follow_store(
    mut reader: StoreReader,
    shared: Weak<Shared>,
    mut detector: ChangeDetector,
    highlights: HighlightSet,
    cancel: CancellationToken,
) {
    loop {
        let published = tokio::select! {
            _ = cancel.cancelled() => return,
            next = reader.changed() => match next {
                Ok(published) => published,
                Err(_) => return,
            },
        };
        if let Some(changes) = detector.observe(&published.snapshot) {
            highlights.apply(changes);
        }
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.state.send_replace(ViewState::Ready(published));
    }
}
