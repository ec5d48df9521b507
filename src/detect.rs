//! Change detection and transient highlights.
//!
//! [`diff`] compares two snapshots over an explicit list of tracked keys
//! using strict inequality. Hourly values are compared per
//! `(slot, sub-field)` so a change in one hour never flags another.
//! [`HighlightSet`] turns a change set into a highlight that clears itself
//! after a fixed duration; a newer change set replaces the older one.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use linewatch_common::{FieldValue, HourlyField, MetricField, Snapshot, TimeSlot};

/// Default highlight lifetime.
pub const DEFAULT_HIGHLIGHT: Duration = Duration::from_millis(2000);

/// A highlightable cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Metric(MetricField),
    Hourly { slot: TimeSlot, field: HourlyField },
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric(m) => f.write_str(m.wire_name()),
            Self::Hourly { slot, field } => write!(f, "hourly-{}-{}", slot, field.wire_name()),
        }
    }
}

pub type ChangeSet = BTreeSet<FieldKey>;

/// The keys a display highlights. Anything else is never reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFields {
    pub metrics: Vec<MetricField>,
    pub hourly_slots: Vec<TimeSlot>,
    pub hourly_fields: Vec<HourlyField>,
}

impl Default for TrackedFields {
    fn default() -> Self {
        Self::line_board()
    }
}

impl TrackedFields {
    /// Cells of the sewing-line board.
    pub fn line_board() -> Self {
        use MetricField::*;
        Self {
            metrics: vec![
                WorkingTime,
                StaffLayout,
                StaffPresent,
                ProductCode,
                DailyTarget,
                CumulativePlan,
                CumulativeActual,
                CompletionPct,
                DiffCumulativeTarget,
                DiffCompletion100,
                HourlyTarget,
                PphPlan,
                PphActual,
                PphCompletionPct,
                RatioPph,
                DiffPphCompletion100,
                InspectedTotal,
                FirstPass,
                PassedTotal,
                DefectTotal,
                Rft,
                DiffRftTarget,
            ],
            hourly_slots: TimeSlot::ALL.to_vec(),
            hourly_fields: vec![HourlyField::Quantity, HourlyField::Percentage],
        }
    }

    pub fn none() -> Self {
        Self {
            metrics: Vec::new(),
            hourly_slots: Vec::new(),
            hourly_fields: Vec::new(),
        }
    }

    pub fn metrics_only(metrics: Vec<MetricField>) -> Self {
        Self {
            metrics,
            ..Self::none()
        }
    }

    pub fn keys(&self) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = self.metrics.iter().copied().map(FieldKey::Metric).collect();
        for slot in &self.hourly_slots {
            for field in &self.hourly_fields {
                keys.push(FieldKey::Hourly {
                    slot: *slot,
                    field: *field,
                });
            }
        }
        keys
    }
}

fn hourly_value(snapshot: &Snapshot, slot: TimeSlot, field: HourlyField) -> Option<f64> {
    snapshot.hourly.slot(slot).map(|s| s.get(field))
}

/// Tracked keys whose value differs between `prev` and `curr`.
///
/// An hourly slot present on one side and absent on the other counts as a
/// change for each tracked sub-field.
pub fn diff(prev: &Snapshot, curr: &Snapshot, tracked: &TrackedFields) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for metric in &tracked.metrics {
        let changed = match (prev.field(*metric), curr.field(*metric)) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a != b,
            (FieldValue::Number(a), FieldValue::Number(b)) => a != b,
            _ => true,
        };
        if changed {
            changes.insert(FieldKey::Metric(*metric));
        }
    }
    for slot in &tracked.hourly_slots {
        for field in &tracked.hourly_fields {
            if hourly_value(prev, *slot, *field) != hourly_value(curr, *slot, *field) {
                changes.insert(FieldKey::Hourly {
                    slot: *slot,
                    field: *field,
                });
            }
        }
    }
    changes
}

/// Remembers the previous snapshot and diffs each new one against it.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    tracked: TrackedFields,
    previous: Option<Snapshot>,
}

impl ChangeDetector {
    pub fn new(tracked: TrackedFields) -> Self {
        Self {
            tracked,
            previous: None,
        }
    }

    /// `None` for the first snapshot (nothing to compare against).
    pub fn observe(&mut self, current: &Snapshot) -> Option<ChangeSet> {
        let changes = self
            .previous
            .as_ref()
            .map(|prev| diff(prev, current, &self.tracked));
        self.previous = Some(current.clone());
        changes
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

struct HighlightState {
    generation: u64,
    timer: Option<CancellationToken>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Currently highlighted keys with a cancellable self-clear.
#[derive(Clone)]
pub struct HighlightSet {
    duration: Duration,
    state: Arc<Mutex<HighlightState>>,
    active: Arc<watch::Sender<ChangeSet>>,
    lifetime: CancellationToken,
}

impl HighlightSet {
    pub fn new(duration: Duration) -> Self {
        let (tx, _) = watch::channel(ChangeSet::new());
        Self {
            duration,
            state: Arc::new(Mutex::new(HighlightState {
                generation: 0,
                timer: None,
            })),
            active: Arc::new(tx),
            lifetime: CancellationToken::new(),
        }
    }

    /// Replace the highlighted population with `changes` and schedule its
    /// clear. Empty change sets are ignored. Must run inside a Tokio runtime.
    pub fn apply(&self, changes: ChangeSet) {
        if changes.is_empty() || self.lifetime.is_cancelled() {
            return;
        }
        let timer = self.lifetime.child_token();
        let generation = {
            let mut state = lock(&self.state);
            if let Some(previous) = state.timer.replace(timer.clone()) {
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };
        trace!(count = changes.len(), generation, "highlighting changes");
        self.active.send_replace(changes);

        let duration = self.duration;
        let state = self.state.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let mut state = lock(&state);
                    if state.generation == generation {
                        state.timer = None;
                        active.send_replace(ChangeSet::new());
                    }
                }
            }
        });
    }

    pub fn active(&self) -> ChangeSet {
        self.active.borrow().clone()
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.active.borrow().contains(key)
    }

    pub fn watch(&self) -> watch::Receiver<ChangeSet> {
        self.active.subscribe()
    }

    /// Cancel every pending clear and drop the highlight. Later `apply`
    /// calls are ignored.
    pub fn teardown(&self) {
        self.lifetime.cancel();
        lock(&self.state).timer = None;
        self.active.send_replace(ChangeSet::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linewatch_common::SnapshotPatch;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_diff_reports_only_tracked_changes() {
        let prev = snapshot(json!({"lkth": 100, "rft": 90, "congKh": 5}));
        let curr = snapshot(json!({"lkth": 110, "rft": 90, "congKh": 6}));
        let changes = diff(&prev, &curr, &TrackedFields::line_board());
        assert_eq!(
            changes,
            ChangeSet::from([FieldKey::Metric(MetricField::CumulativeActual)])
        );
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let s = snapshot(json!({"lkth": 100, "maHang": "A", "hourlyData": {"hourly": {"h830": {"sanluong": 3}}}}));
        assert!(diff(&s, &s.clone(), &TrackedFields::line_board()).is_empty());
    }

    #[test]
    fn test_diff_compares_hourly_per_slot_and_field() {
        let prev = snapshot(json!({"hourlyData": {"hourly": {
            "h830": {"sanluong": 10, "percentage": 90},
            "h930": {"sanluong": 20, "percentage": 95}
        }}}));
        let curr = snapshot(json!({"hourlyData": {"hourly": {
            "h830": {"sanluong": 10, "percentage": 90},
            "h930": {"sanluong": 25, "percentage": 95}
        }}}));
        let changes = diff(&prev, &curr, &TrackedFields::line_board());
        assert_eq!(
            changes,
            ChangeSet::from([FieldKey::Hourly {
                slot: TimeSlot::H0930,
                field: HourlyField::Quantity
            }])
        );
    }

    #[test]
    fn test_new_hourly_slot_counts_as_change() {
        let prev = snapshot(json!({}));
        let curr = snapshot(json!({"hourlyData": {"hourly": {"h1030": {"sanluong": 0, "percentage": 0}}}}));
        let changes = diff(&prev, &curr, &TrackedFields::line_board());
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_text_fields_compare_strictly() {
        let prev = snapshot(json!({"maHang": "A1"}));
        let curr = snapshot(json!({"maHang": "a1"}));
        let tracked = TrackedFields::metrics_only(vec![MetricField::ProductCode]);
        assert_eq!(diff(&prev, &curr, &tracked).len(), 1);
    }

    #[test]
    fn test_field_key_display_matches_cell_ids() {
        let key = FieldKey::Hourly {
            slot: TimeSlot::H0830,
            field: HourlyField::Quantity,
        };
        assert_eq!(key.to_string(), "hourly-h830-sanluong");
        assert_eq!(FieldKey::Metric(MetricField::Rft).to_string(), "rft");
    }

    #[test]
    fn test_detector_skips_first_snapshot() {
        let mut detector = ChangeDetector::new(TrackedFields::line_board());
        let mut s = snapshot(json!({"lkth": 1}));
        assert!(detector.observe(&s).is_none());
        s.merge(&SnapshotPatch::from_json(&json!({"lkth": 2})).unwrap());
        let changes = detector.observe(&s).unwrap();
        assert!(changes.contains(&FieldKey::Metric(MetricField::CumulativeActual)));
        detector.reset();
        assert!(detector.observe(&s).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_highlight_self_clears() {
        let highlights = HighlightSet::new(DEFAULT_HIGHLIGHT);
        let key = FieldKey::Metric(MetricField::Rft);
        highlights.apply(ChangeSet::from([key]));
        assert!(highlights.contains(&key));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(highlights.contains(&key));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(highlights.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_changes_supersede_and_restart_the_clear() {
        let highlights = HighlightSet::new(DEFAULT_HIGHLIGHT);
        let a = FieldKey::Metric(MetricField::Rft);
        let b = FieldKey::Metric(MetricField::CumulativeActual);
        highlights.apply(ChangeSet::from([a]));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        highlights.apply(ChangeSet::from([b]));

        assert_eq!(highlights.active(), ChangeSet::from([b]));
        // The first timer would have fired here.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(highlights.active(), ChangeSet::from([b]));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(highlights.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_change_set_is_ignored() {
        let highlights = HighlightSet::new(DEFAULT_HIGHLIGHT);
        let a = FieldKey::Metric(MetricField::Rft);
        highlights.apply(ChangeSet::from([a]));
        highlights.apply(ChangeSet::new());
        assert!(highlights.contains(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_clear() {
        let highlights = HighlightSet::new(DEFAULT_HIGHLIGHT);
        let mut rx = highlights.watch();
        highlights.apply(ChangeSet::from([FieldKey::Metric(MetricField::Rft)]));
        highlights.teardown();
        assert!(highlights.active().is_empty());
        rx.borrow_and_update();

        highlights.apply(ChangeSet::from([FieldKey::Metric(MetricField::Rft)]));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!rx.has_changed().unwrap());
    }
}
