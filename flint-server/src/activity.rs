//! Activity ring for the API's activity feed.
//!
//! A process-wide bounded FIFO of mutation events. Writers append under the
//! write lock; readers snapshot under the read lock. At capacity the oldest
//! event is evicted.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flint_hypervisor::{ActivitySink, ActivityStatus};

/// One entry in the activity ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Monotonically increasing id
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// Dotted action name, e.g. `vm.create`
    pub action: String,
    /// Affected resource (domain name/uuid, pool/volume, network, image)
    pub target: String,
    pub status: ActivityStatus,
    pub message: String,
}

struct Inner {
    events: VecDeque<ActivityEvent>,
    next_id: u64,
}

/// Thread-safe bounded activity ring.
pub struct ActivityLog {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                events: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest at capacity.
    pub fn push(&self, action: &str, target: &str, status: ActivityStatus, message: &str) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        if inner.events.len() >= self.capacity {
            inner.events.pop_front();
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.events.push_back(ActivityEvent {
            id,
            timestamp: Utc::now(),
            action: action.to_string(),
            target: target.to_string(),
            status,
            message: message.to_string(),
        });
    }

    /// Snapshot of all events, newest first.
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.inner
            .read()
            .map(|inner| inner.events.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivitySink for ActivityLog {
    fn record(&self, action: &str, target: &str, status: ActivityStatus, message: &str) {
        self.push(action, target, status, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_come_back_newest_first() {
        let log = ActivityLog::new(10);
        log.push("vm.create", "web-01", ActivityStatus::Success, "created");
        log.push("vm.start", "web-01", ActivityStatus::Success, "started");

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "vm.start");
        assert_eq!(events[1].action, "vm.create");
        assert!(events[0].id > events[1].id);
    }

    #[test]
    fn capacity_evicts_oldest_fifo() {
        let log = ActivityLog::new(3);
        for i in 0..10 {
            log.push("vm.create", &format!("vm-{i}"), ActivityStatus::Success, "");
        }

        let events = log.snapshot();
        assert_eq!(events.len(), 3);
        // Exactly the most recent three survive
        assert_eq!(events[0].target, "vm-9");
        assert_eq!(events[1].target, "vm-8");
        assert_eq!(events[2].target, "vm-7");
    }

    #[test]
    fn ids_keep_increasing_across_eviction() {
        let log = ActivityLog::new(2);
        for _ in 0..5 {
            log.push("vm.create", "x", ActivityStatus::Success, "");
        }
        let events = log.snapshot();
        assert_eq!(events[0].id, 5);
        assert_eq!(events[1].id, 4);
    }
}
