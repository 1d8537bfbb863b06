//! Normal vs sticky poll routing
//!
//! A worker with a sticky queue splits its workflow pollers between the
//! shared normal queue and its own sticky queue. The balancer leans on the
//! server's backlog hint: while sticky tasks are known to be backed up, every
//! poll goes sticky; otherwise polls are split by the configured sticky
//! share. An empty or failed sticky poll means the hint is stale, so the
//! backlog resets and routing reverts toward the normal queue.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use tracing::trace;
use windlass_proto::TaskQueueKind;

pub struct StickyQueueBalancer {
    sticky_enabled: bool,
    /// Fraction of polls directed at the sticky queue absent backlog signal,
    /// 0.0..=1.0
    sticky_share: f64,
    /// Last backlog hint reported by a sticky task, 0 when unknown
    sticky_backlog: AtomicI64,
    poll_counter: AtomicU64,
}

impl StickyQueueBalancer {
    pub fn new(sticky_enabled: bool, sticky_share: f64) -> Self {
        Self {
            sticky_enabled,
            sticky_share: sticky_share.clamp(0.0, 1.0),
            sticky_backlog: AtomicI64::new(0),
            poll_counter: AtomicU64::new(0),
        }
    }

    /// Pick the queue the next poll should target.
    pub fn make_poll_decision(&self) -> TaskQueueKind {
        if !self.sticky_enabled {
            return TaskQueueKind::Normal;
        }
        if self.sticky_backlog.load(Ordering::Acquire) > 0 {
            return TaskQueueKind::Sticky;
        }
        // Interleave by share: over any window of 100 polls, roughly
        // share*100 go sticky
        let n = self.poll_counter.fetch_add(1, Ordering::Relaxed) % 100;
        if (n as f64) < self.sticky_share * 100.0 {
            TaskQueueKind::Sticky
        } else {
            TaskQueueKind::Normal
        }
    }

    /// Record a successful poll and the backlog hint it carried.
    pub fn record_task(&self, kind: TaskQueueKind, backlog_count_hint: i64) {
        if kind == TaskQueueKind::Sticky {
            trace!(backlog_count_hint, "sticky backlog hint updated");
            self.sticky_backlog
                .store(backlog_count_hint.max(0), Ordering::Release);
        }
    }

    /// Record a poll that returned nothing or failed. A sticky outcome like
    /// this invalidates the backlog hint.
    pub fn record_empty_or_failed(&self, kind: TaskQueueKind) {
        if kind == TaskQueueKind::Sticky {
            self.sticky_backlog.store(0, Ordering::Release);
        }
    }

    pub fn sticky_backlog(&self) -> i64 {
        self.sticky_backlog.load(Ordering::Acquire)
    }
}
