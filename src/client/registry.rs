//! Subscriber bookkeeping and inbound routing.

use std::sync::Arc;

use tracing::debug;

use linewatch_common::{Identity, LineType};

use super::throttle::Throttle;
use super::{Handler, Inbound};
use crate::wire::{ServerFrame, UpdateMessage};

struct Entry {
    identity: Identity,
    handlers: Vec<Handler>,
}

/// Registered `(identity, handler)` pairs.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Entry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `identity`. Returns `true` when the identity
    /// had no subscribers before, i.e. a subscribe frame must be sent.
    /// Registering the same pair twice is a no-op.
    pub fn subscribe(&mut self, identity: Identity, handler: Handler) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.identity == identity) {
            if !entry.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                entry.handlers.push(handler);
            }
            return false;
        }
        self.entries.push(Entry {
            identity,
            handlers: vec![handler],
        });
        true
    }

    /// Remove `handler` everywhere. Returns the identities left without
    /// subscribers. Unknown handlers are ignored.
    pub fn unsubscribe(&mut self, handler: &Handler) -> Vec<Identity> {
        for entry in &mut self.entries {
            entry.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
        let (emptied, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.handlers.is_empty());
        self.entries = kept;
        emptied.into_iter().map(|e| e.identity).collect()
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.entries.iter().map(|e| e.identity.clone()).collect()
    }

    pub fn handler_count(&self) -> usize {
        self.entries.iter().map(|e| e.handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Work out who receives `frame`. Handlers are returned rather than
    /// called so the caller can invoke them without holding any lock.
    pub fn dispatch(
        &self,
        frame: &ServerFrame,
        throttle: &mut Throttle<Identity>,
    ) -> Vec<(Handler, Inbound)> {
        match frame {
            ServerFrame::SystemUpdate(update) => self.fan_out(|id| update.triggers_refresh(id)),
            ServerFrame::CdDataRefresh(_) => {
                self.fan_out(|id| id.line_type() == Some(LineType::Cd))
            }
            _ => match frame.update() {
                Some(message) => self.route_update(frame, message, throttle),
                None => Vec::new(),
            },
        }
    }

    fn fan_out(&self, wants: impl Fn(&Identity) -> bool) -> Vec<(Handler, Inbound)> {
        self.entries
            .iter()
            .filter(|e| wants(&e.identity))
            .flat_map(|e| e.handlers.iter().map(|h| (h.clone(), Inbound::RefreshRequested)))
            .collect()
    }

    fn route_update(
        &self,
        frame: &ServerFrame,
        message: &UpdateMessage,
        throttle: &mut Throttle<Identity>,
    ) -> Vec<(Handler, Inbound)> {
        if let Err(reason) = message.validate() {
            debug!(%reason, "dropping malformed update");
            return Vec::new();
        }
        let fields = message.identity_fields();
        let mut out = Vec::new();
        for entry in &self.entries {
            if !channel_serves(frame, &entry.identity) {
                continue;
            }
            if !entry.identity.matches(&fields) {
                debug!(identity = %entry.identity, "update for another identity ignored");
                continue;
            }
            if !throttle.admit(&entry.identity) {
                debug!(identity = %entry.identity, "update throttled");
                continue;
            }
            out.extend(
                entry
                    .handlers
                    .iter()
                    .map(|h| (h.clone(), Inbound::Update(message.clone()))),
            );
        }
        out
    }
}

/// Which identities an update event kind is addressed to.
fn channel_serves(frame: &ServerFrame, identity: &Identity) -> bool {
    match frame {
        ServerFrame::CenterTvUpdate(_) => matches!(identity, Identity::Center { .. }),
        ServerFrame::CdUpdate(_) => identity.line_type() == Some(LineType::Cd),
        ServerFrame::ProductionUpdate(_) | ServerFrame::ProductionImmediate(_) => {
            !matches!(identity, Identity::Center { .. })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::SystemUpdate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_handler() -> (Handler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: Handler = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    fn update_frame(code: &str) -> ServerFrame {
        ServerFrame::ProductionUpdate(
            serde_json::from_value(json!({"timestamp": "t", "maChuyenLine": code})).unwrap(),
        )
    }

    fn deliver(registry: &SubscriptionRegistry, frame: &ServerFrame, throttle: &mut Throttle<Identity>) -> usize {
        let deliveries = registry.dispatch(frame, throttle);
        let n = deliveries.len();
        for (handler, inbound) in deliveries {
            handler(&inbound);
        }
        n
    }

    #[test]
    fn test_subscribe_is_idempotent_per_pair() {
        let mut registry = SubscriptionRegistry::new();
        let (handler, _) = counting_handler();
        let id = Identity::line("L01").unwrap();
        assert!(registry.subscribe(id.clone(), handler.clone()));
        assert!(!registry.subscribe(id.clone(), handler.clone()));
        assert_eq!(registry.handler_count(), 1);

        let (other, _) = counting_handler();
        assert!(!registry.subscribe(id, other));
        assert_eq!(registry.handler_count(), 2);
    }

    #[test]
    fn test_unsubscribe_unknown_handler_is_a_no_op() {
        let mut registry = SubscriptionRegistry::new();
        let (handler, _) = counting_handler();
        assert!(registry.unsubscribe(&handler).is_empty());
        assert!(registry.unsubscribe(&handler).is_empty());
    }

    #[test]
    fn test_unsubscribe_reports_emptied_identities() {
        let mut registry = SubscriptionRegistry::new();
        let (a, _) = counting_handler();
        let (b, _) = counting_handler();
        let l1 = Identity::line("L01").unwrap();
        let l2 = Identity::line("L02").unwrap();
        registry.subscribe(l1.clone(), a.clone());
        registry.subscribe(l2.clone(), a.clone());
        registry.subscribe(l2.clone(), b.clone());

        assert_eq!(registry.unsubscribe(&a), vec![l1]);
        assert_eq!(registry.identities(), vec![l2.clone()]);
        assert_eq!(registry.unsubscribe(&b), vec![l2]);
        assert!(registry.is_empty());
        assert!(registry.unsubscribe(&b).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_subscription_does_not_duplicate_delivery() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (handler, count) = counting_handler();
        let id = Identity::line("L01").unwrap();
        registry.subscribe(id.clone(), handler.clone());
        registry.subscribe(id, handler);
        deliver(&registry, &update_frame("L01"), &mut throttle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_delivers_only_the_first_update() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (handler, count) = counting_handler();
        registry.subscribe(Identity::line("L01").unwrap(), handler);
        for _ in 0..5 {
            deliver(&registry, &update_frame("L01"), &mut throttle);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        deliver(&registry, &update_frame("L01"), &mut throttle);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_updates_do_not_consume_the_window() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (handler, count) = counting_handler();
        registry.subscribe(Identity::line("L01").unwrap(), handler);

        let malformed = ServerFrame::ProductionUpdate(
            serde_json::from_value(json!({"maChuyenLine": "L01"})).unwrap(),
        );
        assert_eq!(deliver(&registry, &malformed, &mut throttle), 0);
        assert_eq!(deliver(&registry, &update_frame("L01"), &mut throttle), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_identity_is_ignored() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (handler, count) = counting_handler();
        registry.subscribe(Identity::line("L01").unwrap(), handler);
        deliver(&registry, &update_frame("L02"), &mut throttle);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_center_updates_only_reach_center_views() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (line_handler, line_count) = counting_handler();
        let (center_handler, center_count) = counting_handler();
        registry.subscribe(Identity::line("L01").unwrap(), line_handler);
        registry.subscribe(Identity::center("TS1", "1").unwrap(), center_handler);

        let frame = ServerFrame::CenterTvUpdate(
            serde_json::from_value(json!({"timestamp": "t", "factory": "TS1", "line": "1"})).unwrap(),
        );
        deliver(&registry, &frame, &mut throttle);
        assert_eq!(line_count.load(Ordering::SeqCst), 0);
        assert_eq!(center_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_system_refresh_fans_out_without_throttle() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (handler, count) = counting_handler();
        registry.subscribe(Identity::line("L01").unwrap(), handler);
        let frame = ServerFrame::SystemUpdate(SystemUpdate {
            kind: "data-refresh".into(),
            data: json!({"changesCount": 2}),
        });
        deliver(&registry, &frame, &mut throttle);
        deliver(&registry, &frame, &mut throttle);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cd_refresh_only_reaches_cd_lines() {
        let mut registry = SubscriptionRegistry::new();
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let (htm, htm_count) = counting_handler();
        let (cd, cd_count) = counting_handler();
        registry.subscribe(Identity::line("KV07M01").unwrap(), htm);
        registry.subscribe(Identity::line("KV07CD01").unwrap(), cd);
        deliver(&registry, &ServerFrame::CdDataRefresh(json!({})), &mut throttle);
        assert_eq!(htm_count.load(Ordering::SeqCst), 0);
        assert_eq!(cd_count.load(Ordering::SeqCst), 1);
    }
}
