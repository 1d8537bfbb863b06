//! Slot usage tracking
//!
//! Wraps any [`SlotSupplier`] to count outstanding permits, publish
//! used/available gauges and tally release reasons. Release is idempotent per
//! permit id; a permit this wrapper did not issue leaves the accounting
//! untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::supplier::{
    SlotError, SlotPermit, SlotReleaseReason, SlotReservationContext, SlotSupplier,
};
use crate::metrics::{names, SharedMetrics};

/// Supplier decorator that accounts for every permit it hands out.
pub struct TrackingSlotSupplier {
    inner: Arc<dyn SlotSupplier>,
    /// Nominal capacity for the available gauge, if the inner supplier has one
    capacity: Option<usize>,
    metrics: SharedMetrics,
    issued: Mutex<HashSet<u64>>,
    release_counts: Mutex<HashMap<SlotReleaseReason, u64>>,
}

impl TrackingSlotSupplier {
    pub fn new(inner: Arc<dyn SlotSupplier>, capacity: Option<usize>, metrics: SharedMetrics) -> Self {
        Self {
            inner,
            capacity,
            metrics,
            issued: Mutex::new(HashSet::new()),
            release_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Permits currently out.
    pub fn used(&self) -> usize {
        self.issued.lock().len()
    }

    /// How many times each release reason has been observed.
    pub fn release_count(&self, reason: SlotReleaseReason) -> u64 {
        self.release_counts.lock().get(&reason).copied().unwrap_or(0)
    }

    fn track_issue(&self, permit: &SlotPermit) {
        self.issued.lock().insert(permit.id());
        self.publish_gauges();
    }

    fn publish_gauges(&self) {
        let used = self.issued.lock().len();
        self.metrics.gauge(names::SLOTS_USED, used as f64);
        if let Some(capacity) = self.capacity {
            self.metrics
                .gauge(names::SLOTS_AVAILABLE, capacity.saturating_sub(used) as f64);
        }
    }
}

#[async_trait]
impl SlotSupplier for TrackingSlotSupplier {
    async fn reserve_slot(&self, ctx: &SlotReservationContext) -> Result<SlotPermit, SlotError> {
        let permit = self.inner.reserve_slot(ctx).await?;
        self.track_issue(&permit);
        Ok(permit)
    }

    fn try_reserve_slot(&self, ctx: &SlotReservationContext) -> Option<SlotPermit> {
        let permit = self.inner.try_reserve_slot(ctx)?;
        self.track_issue(&permit);
        Some(permit)
    }

    fn release_slot(&self, permit: SlotPermit, reason: SlotReleaseReason) {
        // A permit this wrapper never issued (or already released) does not
        // touch the accounting
        if !self.issued.lock().remove(&permit.id()) {
            return;
        }
        *self.release_counts.lock().entry(reason).or_insert(0) += 1;
        self.inner.release_slot(permit, reason);
        self.publish_gauges();
    }
}
