//! Fixed-interval fallback polling while the push channel is down.
//!
//! The poller watches [`ConnectionState`]. On a transition to
//! `Disconnected` it fires once after the initial delay and then every
//! interval. On a transition to `Connected` it stops before the next tick.
//! It never fires while connected.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ConnectionState;

/// Default interval for live boards.
const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Delay before the first poll after a disconnect.
const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
        }
    }
}

impl PollerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Caller-supplied refresh action.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self);
}

type BoxedRefresh = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct FnRefresher(BoxedRefresh);

#[async_trait]
impl Refresher for FnRefresher {
    async fn refresh(&self) {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`Refresher`].
pub fn refresher_fn<F, Fut>(f: F) -> Arc<dyn Refresher>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnRefresher(Box::new(move || Box::pin(f()))))
}

pub struct FallbackPoller {
    config: PollerConfig,
    state: watch::Receiver<ConnectionState>,
    refresher: Arc<dyn Refresher>,
    cancel: CancellationToken,
}

impl FallbackPoller {
    pub fn new(
        config: PollerConfig,
        state: watch::Receiver<ConnectionState>,
        refresher: Arc<dyn Refresher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            refresher,
            cancel,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        // Once the state sender is gone the last known state is final.
        let mut watching = true;

        loop {
            // Idle while connected.
            while *self.state.borrow_and_update() == ConnectionState::Connected {
                if !watching {
                    return;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    changed = self.state.changed() => {
                        if changed.is_err() {
                            watching = false;
                        }
                    }
                }
            }

            info!(interval = ?self.config.interval, "fallback polling started");
            let mut next = Instant::now() + self.config.initial_delay;

            loop {
                tokio::select! {
                    biased;

                    _ = self.cancel.cancelled() => return,

                    changed = self.state.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                        } else if *self.state.borrow_and_update() == ConnectionState::Connected {
                            info!("fallback polling stopped");
                            break;
                        }
                    }

                    _ = sleep_until(next) => {
                        debug!("fallback poll");
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = self.refresher.refresh() => {}
                        }
                        next = Instant::now() + self.config.interval;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<dyn Refresher>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let refresher = refresher_fn(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        (refresher, count)
    }

    fn config() -> PollerConfig {
        PollerConfig::new(Duration::from_secs(30)).with_initial_delay(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fires_while_connected() {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        let (refresher, count) = counter();
        let cancel = CancellationToken::new();
        let handle = FallbackPoller::new(config(), rx, refresher, cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fires_within_one_interval() {
        let (tx, rx) = watch::channel(ConnectionState::Connected);
        let (refresher, count) = counter();
        let cancel = CancellationToken::new();
        let handle = FallbackPoller::new(config(), rx, refresher, cancel.clone()).spawn();

        tx.send(ConnectionState::Disconnected).unwrap();
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_stops_polling() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let (refresher, count) = counter();
        let cancel = CancellationToken::new();
        let handle = FallbackPoller::new(config(), rx, refresher, cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tx.send(ConnectionState::Connected).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // And resumes on the next disconnect.
        tx.send(ConnectionState::Disconnected).unwrap();
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_a_polling_loop() {
        let (_tx, rx) = watch::channel(ConnectionState::Disconnected);
        let (refresher, count) = counter();
        let cancel = CancellationToken::new();
        let handle = FallbackPoller::new(config(), rx, refresher, cancel.clone()).spawn();

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_a_pending_refresh() {
        let (_tx, rx) = watch::channel(ConnectionState::Disconnected);
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let refresher = refresher_fn(move || {
            let s = s.clone();
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
        });
        let cancel = CancellationToken::new();
        let handle = FallbackPoller::new(config(), rx, refresher, cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller should exit while a refresh is pending")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_state_sender_keeps_polling() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let (refresher, count) = counter();
        let cancel = CancellationToken::new();
        let handle = FallbackPoller::new(config(), rx, refresher, cancel.clone()).spawn();
        drop(tx);

        tokio::time::sleep(Duration::from_millis(31_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        cancel.cancel();
        handle.await.unwrap();
    }
}
