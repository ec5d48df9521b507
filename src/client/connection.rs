//! WebSocket connection to the production backend.
//!
//! One [`RealtimeClient`] serves every display in the process. It keeps a
//! single socket open, re-subscribes every registered identity after each
//! (re)connect and publishes [`ConnectionState`] transitions to observers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use linewatch_common::Identity;

use super::registry::SubscriptionRegistry;
use super::throttle::Throttle;
use super::{ConnectionState, Handler, StateObserver};
use crate::wire::{ClientFrame, ServerFrame};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Backend WebSocket URL
    pub url: String,
    /// Delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts before giving up (0 = never)
    pub max_reconnect_attempts: u32,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Warn if a subscribe is not confirmed within this long
    pub confirm_timeout: Duration,
    /// Lossy delivery window per identity
    pub throttle_window: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001/ws".to_string(),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            ping_interval: Duration::from_secs(30),
            confirm_timeout: Duration::from_secs(5),
            throttle_window: Duration::from_millis(100),
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }
}

/// How a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

struct Inner {
    config: ConnectionConfig,
    registry: Mutex<SubscriptionRegistry>,
    throttle: Mutex<Throttle<Identity>>,
    observers: Mutex<Vec<StateObserver>>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<(Identity, ClientFrame)>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Identity, ClientFrame)>>,
    cancel: CancellationToken,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to the realtime connection. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let throttle = Throttle::new(config.throttle_window);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(SubscriptionRegistry::new()),
                throttle: Mutex::new(throttle),
                observers: Mutex::new(Vec::new()),
                state_tx,
                outbound_tx,
                outbound_rx: tokio::sync::Mutex::new(outbound_rx),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Register interest in `identity`. Re-registering the same handler for
    /// the same identity does not duplicate delivery.
    pub fn subscribe(&self, identity: Identity, handler: Handler) {
        let first = lock(&self.inner.registry).subscribe(identity.clone(), handler);
        if first {
            debug!(%identity, "subscribing");
            let frame = ClientFrame::subscribe(&identity);
            let _ = self.inner.outbound_tx.send((identity, frame));
        }
    }

    /// Detach `handler` from every identity. Safe to call repeatedly and for
    /// handlers that were never registered.
    pub fn unsubscribe(&self, handler: &Handler) {
        let emptied = lock(&self.inner.registry).unsubscribe(handler);
        for identity in emptied {
            debug!(%identity, "unsubscribing");
            lock(&self.inner.throttle).forget(&identity);
            let frame = ClientFrame::unsubscribe(&identity);
            let _ = self.inner.outbound_tx.send((identity, frame));
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Call `observer` on every connected/disconnected transition.
    pub fn on_state_change(&self, observer: StateObserver) {
        lock(&self.inner.observers).push(observer);
    }

    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.inner.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(%state, "realtime connection state changed");
            let observers = lock(&self.inner.observers).clone();
            for observer in observers {
                observer(state);
            }
        }
    }

    /// Connect and keep reconnecting until shutdown or until the attempt
    /// budget is spent. The state stays `Disconnected` afterwards so the
    /// fallback poller carries the displays.
    pub async fn run(&self) {
        let mut failed_attempts = 0u32;
        let config = &self.inner.config;

        loop {
            if self.inner.cancel.is_cancelled() {
                break;
            }
            info!(url = %config.url, "connecting to realtime backend");

            match self.connect_and_listen().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Lost(reason)) => {
                    warn!(%reason, "realtime connection lost");
                    failed_attempts = 0;
                }
                Err(e) => {
                    failed_attempts += 1;
                    warn!(error = %e, attempt = failed_attempts, "realtime connect failed");
                    if config.max_reconnect_attempts > 0
                        && failed_attempts >= config.max_reconnect_attempts
                    {
                        error!(
                            attempts = failed_attempts,
                            "giving up on realtime connection; fallback polling only"
                        );
                        break;
                    }
                }
            }
            self.set_state(ConnectionState::Disconnected);

            tokio::select! {
                _ = sleep(config.reconnect_delay) => {}
                _ = self.inner.cancel.cancelled() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("realtime client stopped");
    }

    async fn connect_and_listen(&self) -> Result<SessionEnd> {
        let config = &self.inner.config;
        let (ws_stream, _) = tokio::select! {
            result = connect_async(config.url.as_str()) => {
                result.with_context(|| format!("WebSocket connect to {} failed", config.url))?
            }
            _ = self.inner.cancel.cancelled() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        let mut outbound = self.inner.outbound_rx.lock().await;
        // Anything queued while offline is superseded by the full resubscribe.
        while outbound.try_recv().is_ok() {}

        self.set_state(ConnectionState::Connected);

        let identities = lock(&self.inner.registry).identities();
        let mut awaiting_confirm: Vec<Identity> = Vec::new();
        for identity in identities {
            let text = ClientFrame::subscribe(&identity).encode()?;
            write.send(Message::text(text)).await.context("resubscribe failed")?;
            awaiting_confirm.push(identity);
        }
        let mut confirm_deadline =
            (!awaiting_confirm.is_empty()).then(|| Instant::now() + config.confirm_timeout);

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    let _ = write.close().await;
                    return Ok(SessionEnd::Shutdown);
                }

                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(Default::default())).await {
                        return Ok(SessionEnd::Lost(format!("ping failed: {e}")));
                    }
                }

                _ = sleep_until_opt(confirm_deadline) => {
                    let pending: Vec<String> = awaiting_confirm.iter().map(ToString::to_string).collect();
                    warn!(?pending, "no subscription confirmation received");
                    awaiting_confirm.clear();
                    confirm_deadline = None;
                }

                queued = outbound.recv() => {
                    let Some((identity, frame)) = queued else { continue };
                    let text = frame.encode()?;
                    if let Err(e) = write.send(Message::text(text)).await {
                        return Ok(SessionEnd::Lost(format!("send failed: {e}")));
                    }
                    if !matches!(frame, ClientFrame::UnsubscribeProduction(_)) {
                        if awaiting_confirm.is_empty() {
                            confirm_deadline = Some(Instant::now() + config.confirm_timeout);
                        }
                        awaiting_confirm.push(identity);
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(text.as_str()) && !awaiting_confirm.is_empty() {
                                awaiting_confirm.remove(0);
                                if awaiting_confirm.is_empty() {
                                    confirm_deadline = None;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => debug!("pong"),
                        Some(Ok(Message::Close(_))) => {
                            return Ok(SessionEnd::Lost("server closed connection".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Ok(SessionEnd::Lost(e.to_string())),
                        None => return Ok(SessionEnd::Lost("stream ended".into())),
                    }
                }
            }
        }
    }

    /// Decode and route one text frame. Returns `true` for a subscription
    /// confirmation.
    pub fn handle_text(&self, text: &str) -> bool {
        let frame = match ServerFrame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("ignoring unhandled event");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return false;
            }
        };
        if frame.is_confirmation() {
            debug!("subscription confirmed");
            return true;
        }
        if let ServerFrame::ConnectionEstablished(_) = frame {
            debug!("connection established");
            return false;
        }

        let deliveries = {
            let registry = lock(&self.inner.registry);
            let mut throttle = lock(&self.inner.throttle);
            registry.dispatch(&frame, &mut throttle)
        };
        for (handler, inbound) in deliveries {
            handler(&inbound);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Inbound;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (Handler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: Handler = Arc::new(move |inbound| {
            if let Inbound::Update(_) = inbound {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        (handler, count)
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.confirm_timeout, Duration::from_secs(5));
        assert_eq!(config.throttle_window, Duration::from_millis(100));
    }

    #[test]
    fn test_config_builders() {
        let config = ConnectionConfig::new("ws://h:1")
            .with_max_reconnect_attempts(0)
            .with_reconnect_delay(Duration::from_millis(10));
        assert_eq!(config.url, "ws://h:1");
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.reconnect_delay, Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_text_routes_and_throttles() {
        let client = RealtimeClient::new(ConnectionConfig::default());
        let (handler, count) = counting_handler();
        client.subscribe(Identity::line("L01").unwrap(), handler.clone());

        let frame = json!({"event": "production-update", "data": {"timestamp": "t", "maChuyenLine": "L01"}})
            .to_string();
        client.handle_text(&frame);
        client.handle_text(&frame);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        client.unsubscribe(&handler);
        tokio::time::advance(Duration::from_millis(200)).await;
        client.handle_text(&frame);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_text_reports_confirmations() {
        let client = RealtimeClient::new(ConnectionConfig::default());
        assert!(client.handle_text(r#"{"event":"subscription-confirmed","data":{}}"#));
        assert!(!client.handle_text(r#"{"event":"connection-established"}"#));
        assert!(!client.handle_text("garbage"));
    }

    #[test]
    fn test_observers_see_transitions_once() {
        let client = RealtimeClient::new(ConnectionConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        client.on_state_change(Arc::new(move |state| lock(&s).push(state)));

        client.set_state(ConnectionState::Connected);
        client.set_state(ConnectionState::Connected);
        client.set_state(ConnectionState::Disconnected);
        assert_eq!(
            *lock(&seen),
            vec![ConnectionState::Connected, ConnectionState::Disconnected]
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let client = RealtimeClient::new(
            ConnectionConfig::new("ws://127.0.0.1:9/ws")
                .with_max_reconnect_attempts(2)
                .with_reconnect_delay(Duration::from_millis(10)),
        );
        tokio::time::timeout(Duration::from_secs(10), client.run())
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let client = RealtimeClient::new(
            ConnectionConfig::new("ws://127.0.0.1:9/ws")
                .with_max_reconnect_attempts(0)
                .with_reconnect_delay(Duration::from_secs(3600)),
        );
        let handle = client.spawn();
        client.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
