use super::record::{Connection, EnrichedRecord, Snapshot};
use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Result of comparing one snapshot against the previous active set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffOutcome {
    /// Records present in the new snapshot, in snapshot order.
    pub active: Vec<EnrichedRecord>,
    /// Previously active records missing from the new snapshot.
    pub newly_closed: Vec<EnrichedRecord>,
    /// Records dropped for lacking an id.
    pub dropped: usize,
    /// First-seen records whose start lies ahead of `now`.
    pub skewed: usize,
}

/// Enriches `snapshot` with per-record deltas against `previous`.
///
/// Throughput is the counter growth since the previous snapshot, clamped at
/// zero so a daemon-side counter reset never yields a negative rate. Ids seen
/// for the first time start at zero. Duplicate ids in one snapshot resolve to
/// the last occurrence.
pub fn diff_snapshot(
    previous: &[EnrichedRecord],
    snapshot: &[Connection],
    now: DateTime<Utc>,
) -> DiffOutcome {
    if previous.is_empty() && snapshot.is_empty() {
        return DiffOutcome::default();
    }

    let prev_by_id: HashMap<&str, &EnrichedRecord> =
        previous.iter().map(|r| (r.id(), r)).collect();

    let mut last_index: HashMap<&str, usize> = HashMap::with_capacity(snapshot.len());
    let mut dropped = 0;
    for (idx, conn) in snapshot.iter().enumerate() {
        if conn.id.is_empty() {
            dropped += 1;
        } else {
            last_index.insert(conn.id.as_str(), idx);
        }
    }
    if dropped > 0 {
        warn!(dropped, irregularity = "malformed_record", "dropped connections without an id");
    }

    let mut active = Vec::with_capacity(last_index.len());
    let mut skewed = 0;
    for (idx, conn) in snapshot.iter().enumerate() {
        if last_index.get(conn.id.as_str()) != Some(&idx) {
            continue;
        }
        let (upload_speed, download_speed) = match prev_by_id.get(conn.id.as_str()) {
            Some(prev) => (
                conn.upload.saturating_sub(prev.conn.upload),
                conn.download.saturating_sub(prev.conn.download),
            ),
            None => {
                if conn.started_at().is_some_and(|start| start > now) {
                    skewed += 1;
                }
                (0, 0)
            }
        };
        active.push(EnrichedRecord {
            conn: conn.clone(),
            upload_speed,
            download_speed,
            closed: false,
            closed_at: None,
        });
    }

    let newly_closed: Vec<EnrichedRecord> = previous
        .iter()
        .filter(|r| !last_index.contains_key(r.id()))
        .map(|r| EnrichedRecord {
            closed: true,
            closed_at: Some(now),
            ..r.clone()
        })
        .collect();

    if skewed > 0 {
        info!(
            skewed,
            irregularity = "clock_skew",
            "connection start is ahead of local clock"
        );
    }

    DiffOutcome {
        active,
        newly_closed,
        dropped,
        skewed,
    }
}

/// Newest-first buffer of closed records with FIFO eviction.
#[derive(Debug, Clone)]
pub struct ClosedHistory {
    entries: VecDeque<EnrichedRecord>,
    capacity: usize,
}

impl ClosedHistory {
    pub fn new(capacity: usize) -> Result<Self> {
        ensure!(capacity > 0, "closed history capacity must be positive");
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Prepends a batch of closures, keeping the batch's own order, then
    /// evicts the oldest entries beyond capacity.
    pub fn merge(&mut self, newly_closed: Vec<EnrichedRecord>) {
        for record in newly_closed.into_iter().rev() {
            self.entries.push_front(record);
        }
        self.entries.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnrichedRecord> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Aggregate throughput of the latest snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throughput {
    pub upload_total: u64,
    pub download_total: u64,
    pub upload_speed: u64,
    pub download_speed: u64,
}

/// Owns the active set and closed history across snapshots.
#[derive(Debug, Clone)]
pub struct RecordDiffTracker {
    active: Vec<EnrichedRecord>,
    closed: ClosedHistory,
    throughput: Throughput,
    last_update: Option<DateTime<Utc>>,
}

impl RecordDiffTracker {
    pub fn new(closed_capacity: usize) -> Result<Self> {
        Ok(Self {
            active: Vec::new(),
            closed: ClosedHistory::new(closed_capacity)?,
            throughput: Throughput::default(),
            last_update: None,
        })
    }

    /// Applies the next snapshot and returns the records it closed.
    /// Snapshots must arrive in order.
    pub fn apply(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<EnrichedRecord> {
        if snapshot.connections.is_empty() {
            debug!(irregularity = "empty_snapshot", "snapshot carries no connections");
        }
        let DiffOutcome {
            active,
            newly_closed,
            ..
        } = diff_snapshot(&self.active, &snapshot.connections, now);

        self.throughput = Throughput {
            upload_total: snapshot
                .upload_total
                .unwrap_or_else(|| active.iter().map(|r| r.conn.upload).sum()),
            download_total: snapshot
                .download_total
                .unwrap_or_else(|| active.iter().map(|r| r.conn.download).sum()),
            upload_speed: active.iter().map(|r| r.upload_speed).sum(),
            download_speed: active.iter().map(|r| r.download_speed).sum(),
        };

        self.active = active;
        self.closed.merge(newly_closed.clone());
        self.last_update = Some(now);
        newly_closed
    }

    pub fn active(&self) -> &[EnrichedRecord] {
        &self.active
    }

    pub fn closed(&self) -> &ClosedHistory {
        &self.closed
    }

    pub fn throughput(&self) -> Throughput {
        self.throughput
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Forgets everything, e.g. after switching to another daemon.
    pub fn reset(&mut self) {
        self.active.clear();
        self.closed.clear();
        self.throughput = Throughput::default();
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::tests::conn;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn ids(records: &[EnrichedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_first_observation_has_zero_speed() {
        let out = diff_snapshot(&[], &[conn("a", "h", 100, 200)], at(0));
        assert_eq!(out.active[0].upload_speed, 0);
        assert_eq!(out.active[0].download_speed, 0);
        assert!(!out.active[0].closed);
    }

    #[test]
    fn test_speed_is_counter_delta() {
        let first = diff_snapshot(&[], &[conn("a", "h", 100, 200)], at(0));
        let second = diff_snapshot(&first.active, &[conn("a", "h", 150, 260)], at(1));
        assert_eq!(second.active[0].upload_speed, 50);
        assert_eq!(second.active[0].download_speed, 60);
    }

    #[test]
    fn test_counter_reset_never_goes_negative() {
        let first = diff_snapshot(&[], &[conn("a", "h", 100, 200)], at(0));
        let second = diff_snapshot(&first.active, &[conn("a", "h", 10, 20)], at(1));
        assert_eq!(second.active[0].upload_speed, 0);
        assert_eq!(second.active[0].download_speed, 0);
    }

    #[test]
    fn test_same_snapshot_twice_is_idle() {
        let snap = vec![conn("a", "h", 5, 9), conn("b", "h", 7, 3)];
        let first = diff_snapshot(&[], &snap, at(0));
        let second = diff_snapshot(&first.active, &snap, at(1));
        assert!(second
            .active
            .iter()
            .all(|r| r.upload_speed == 0 && r.download_speed == 0));
        assert!(second.newly_closed.is_empty());
    }

    #[test]
    fn test_empty_to_empty_is_noop() {
        assert_eq!(diff_snapshot(&[], &[], at(0)), DiffOutcome::default());
    }

    #[test]
    fn test_closed_and_added_scenario() {
        let mut tracker = RecordDiffTracker::new(100).unwrap();
        let snap1 = Snapshot::new(vec![conn("A", "a", 0, 0), conn("B", "b", 0, 0), conn("C", "c", 0, 0)]);
        tracker.apply(&snap1, at(0));

        let snap2 = Snapshot::new(vec![conn("A", "a", 1, 1), conn("C", "c", 1, 1), conn("D", "d", 0, 0)]);
        let newly_closed = tracker.apply(&snap2, at(1));

        assert_eq!(ids(tracker.active()), vec!["A", "C", "D"]);
        assert_eq!(ids(&newly_closed), vec!["B"]);
        assert!(newly_closed[0].closed);
        assert_eq!(newly_closed[0].closed_at, Some(at(1)));

        let closed: Vec<&str> = tracker.closed().iter().map(|r| r.id()).collect();
        assert_eq!(closed, vec!["B"]);
    }

    #[test]
    fn test_missing_id_is_dropped() {
        let out = diff_snapshot(&[], &[conn("", "h", 0, 0), conn("a", "h", 0, 0)], at(0));
        assert_eq!(ids(&out.active), vec!["a"]);
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn test_duplicate_ids_last_write_wins() {
        let out = diff_snapshot(
            &[],
            &[conn("a", "first", 0, 0), conn("b", "b", 0, 0), conn("a", "second", 0, 0)],
            at(0),
        );
        assert_eq!(ids(&out.active), vec!["b", "a"]);
        assert_eq!(out.active[1].conn.metadata.host, "second");
    }

    #[test]
    fn test_closed_history_capacity_keeps_newest() {
        let capacity = 100;
        let mut history = ClosedHistory::new(capacity).unwrap();
        for i in 0..capacity + 7 {
            let mut record = EnrichedRecord::opened(conn(&format!("c{i}"), "h", 0, 0));
            record.closed = true;
            history.merge(vec![record]);
        }
        assert_eq!(history.len(), capacity);
        let first = history.iter().next().unwrap();
        let last = history.iter().last().unwrap();
        assert_eq!(first.id(), "c106");
        assert_eq!(last.id(), "c7");
    }

    #[test]
    fn test_batch_order_preserved_on_merge() {
        let mut history = ClosedHistory::new(10).unwrap();
        history.merge(vec![EnrichedRecord::opened(conn("old", "h", 0, 0))]);
        history.merge(vec![
            EnrichedRecord::opened(conn("x", "h", 0, 0)),
            EnrichedRecord::opened(conn("y", "h", 0, 0)),
        ]);
        let order: Vec<&str> = history.iter().map(|r| r.id()).collect();
        assert_eq!(order, vec!["x", "y", "old"]);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(ClosedHistory::new(0).is_err());
        assert!(RecordDiffTracker::new(0).is_err());
    }

    #[test]
    fn test_throughput_uses_envelope_totals() {
        let mut tracker = RecordDiffTracker::new(10).unwrap();
        tracker.apply(&Snapshot::new(vec![conn("a", "h", 10, 20)]), at(0));
        let mut snap = Snapshot::new(vec![conn("a", "h", 15, 40)]);
        snap.upload_total = Some(1_000);
        tracker.apply(&snap, at(1));
        let t = tracker.throughput();
        assert_eq!(t.upload_total, 1_000);
        assert_eq!(t.download_total, 40);
        assert_eq!(t.upload_speed, 5);
        assert_eq!(t.download_speed, 20);
    }

    #[test]
    fn test_reset_forgets_everything() {
        let mut tracker = RecordDiffTracker::new(10).unwrap();
        tracker.apply(&Snapshot::new(vec![conn("a", "h", 1, 1)]), at(0));
        tracker.apply(&Snapshot::default(), at(1));
        assert_eq!(tracker.closed().len(), 1);
        tracker.reset();
        assert!(tracker.active().is_empty());
        assert!(tracker.closed().is_empty());
        assert_eq!(tracker.last_update(), None);
    }

    mod skew_capture {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tracing::field::{Field, Visit};
        use tracing_subscriber::layer::Context;
        use tracing_subscriber::Layer;

        /// Counts events tagged `irregularity = "clock_skew"`.
        pub struct SkewCounter(pub Arc<AtomicUsize>);

        struct Irregularity(Option<String>);

        impl Visit for Irregularity {
            fn record_str(&mut self, field: &Field, value: &str) {
                if field.name() == "irregularity" {
                    self.0 = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
        }

        impl<S: tracing::Subscriber> Layer<S> for SkewCounter {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                let mut visitor = Irregularity(None);
                event.record(&mut visitor);
                if visitor.0.as_deref() == Some("clock_skew") {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    #[test]
    fn test_clock_skew_reported_on_first_observation_only() {
        use crate::core::record::StartTime;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tracing_subscriber::layer::SubscriberExt;

        let mut ahead = conn("ahead", "h", 0, 0);
        ahead.start = Some(StartTime::from(at(60)));
        let mut behind = conn("behind", "h", 0, 0);
        behind.start = Some(StartTime::from(at(-60)));
        let snapshot = Snapshot::new(vec![ahead, behind]);

        let first = diff_snapshot(&[], &snapshot.connections, at(0));
        assert_eq!(first.skewed, 1);
        let again = diff_snapshot(&first.active, &snapshot.connections, at(1));
        assert_eq!(again.skewed, 0);

        let events = Arc::new(AtomicUsize::new(0));
        let subscriber =
            tracing_subscriber::registry().with(skew_capture::SkewCounter(events.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let mut tracker = RecordDiffTracker::new(10).unwrap();
            for secs in 0..5 {
                tracker.apply(&snapshot, at(secs));
            }
        });
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }
}
