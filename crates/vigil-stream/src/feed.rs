use std::collections::{HashSet, VecDeque};

use vigil_schema::{Alert, Insight, StreamEvent, StreamItem};

use crate::buffer::{BoundedBuffer, InsertOrder};
use crate::counters::{ActionCounts, InsightCounts, SeverityCounts};
use crate::DEFAULT_CAPACITY;

/// Reconciled alert view. Alerts arrive as authoritative snapshots (bulk
/// fetch or poll tick), so the ledger is recounted from the buffer after
/// every update; the new-item badge counter is derived by diffing inbound
/// ids against the previous seen-set.
#[derive(Debug)]
pub struct AlertFeed {
    buffer: BoundedBuffer<Alert>,
    severity: SeverityCounts,
    actions: ActionCounts,
    new_count: u64,
    primed: bool,
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BoundedBuffer::new(capacity, InsertOrder::Head),
            severity: SeverityCounts::default(),
            actions: ActionCounts::default(),
            new_count: 0,
            primed: false,
        }
    }

    /// Apply a full authoritative alert listing. The first snapshot primes
    /// the baseline without growing the badge counter.
    pub fn apply_snapshot(&mut self, alerts: Vec<Alert>) {
        if self.primed {
            let fresh: HashSet<&str> = alerts
                .iter()
                .map(Alert::item_id)
                .filter(|id| !self.buffer.contains(id))
                .collect();
            self.new_count += fresh.len() as u64;
        } else {
            self.primed = true;
        }
        self.buffer.bulk_replace(alerts);
        self.severity = SeverityCounts::recount(self.buffer.iter());
        self.actions = ActionCounts::recount(self.buffer.iter());
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.buffer.iter()
    }

    pub fn blocked(&self) -> Vec<&Alert> {
        self.buffer.iter().filter(|a| a.blocked).collect()
    }

    pub fn alerted_only(&self) -> Vec<&Alert> {
        self.buffer.iter().filter(|a| !a.blocked).collect()
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        self.severity
    }

    pub fn action_counts(&self) -> ActionCounts {
        self.actions
    }

    pub fn new_count(&self) -> u64 {
        self.new_count
    }

    pub fn clear_new_count(&mut self) {
        self.new_count = 0;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Reconciled insight view. Insights arrive one at a time over the push
/// channel, so the ledger is delta-maintained on admission (cumulative
/// across evictions); explicit removal retracts the removed item's bucket.
#[derive(Debug)]
pub struct InsightFeed {
    buffer: BoundedBuffer<Insight>,
    counts: InsightCounts,
    new_count: u64,
}

impl Default for InsightFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl InsightFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BoundedBuffer::new(capacity, InsertOrder::Head),
            counts: InsightCounts::default(),
            new_count: 0,
        }
    }

    /// Incremental admission from the push channel. Returns false (and
    /// changes nothing) for a redelivered id.
    pub fn admit(&mut self, insight: Insight) -> bool {
        let contribution = insight.severity;
        if !self.buffer.admit(insight) {
            return false;
        }
        self.counts.record_severity(contribution);
        self.new_count += 1;
        true
    }

    /// Re-admission of an item that was delivered live while a snapshot was
    /// in flight. Counts its bucket but leaves the new-item badge alone;
    /// the item already grew the badge on first arrival.
    pub fn restore(&mut self, insight: Insight) -> bool {
        let contribution = insight.severity;
        if !self.buffer.admit(insight) {
            return false;
        }
        self.counts.record_severity(contribution);
        true
    }

    /// Bulk refresh from the REST snapshot; re-establishes ground truth and
    /// recounts the ledger from the post-truncation buffer.
    pub fn apply_snapshot(&mut self, insights: Vec<Insight>) {
        self.buffer.bulk_replace(insights);
        self.counts = InsightCounts::recount(self.buffer.iter());
    }

    pub fn remove(&mut self, id: &str) -> Option<Insight> {
        let removed = self.buffer.remove(id)?;
        self.counts.retract(&removed);
        Some(removed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.buffer.contains(id)
    }

    pub fn insights(&self) -> impl Iterator<Item = &Insight> {
        self.buffer.iter()
    }

    pub fn counts(&self) -> InsightCounts {
        self.counts
    }

    pub fn new_count(&self) -> u64 {
        self.new_count
    }

    pub fn clear_new_count(&mut self) {
        self.new_count = 0;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Bounded newest-first window over raw probe events. Raw events carry no
/// id, so there is no dedup here, just the capacity bound.
#[derive(Debug)]
pub struct EventFeed {
    events: VecDeque<StreamEvent>,
    capacity: usize,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: StreamEvent) {
        self.events.push_front(event);
        if self.events.len() > self.capacity {
            self.events.pop_back();
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &StreamEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
