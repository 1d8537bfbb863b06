//! Metrics seam
//!
//! The runtime reports named counters, gauges and timers through a narrow
//! sink trait; wiring the sink to an actual backend is the embedding
//! process's job.

use std::sync::Arc;
use std::time::Duration;

/// Metric names emitted by the runtime.
pub mod names {
    pub const STICKY_CACHE_HIT: &str = "sticky_cache_hit";
    pub const STICKY_CACHE_MISS: &str = "sticky_cache_miss";
    pub const STICKY_CACHE_SIZE: &str = "sticky_cache_size";
    pub const STICKY_CACHE_FORCED_EVICTION: &str = "sticky_cache_forced_eviction";

    pub const WORKFLOW_POLL_NO_TASK: &str = "workflow_poll_no_task";
    pub const ACTIVITY_POLL_NO_TASK: &str = "activity_poll_no_task";
    pub const ACTIVITY_SCHEDULE_TO_START_LATENCY: &str = "activity_schedule_to_start_latency";

    pub const SLOTS_USED: &str = "worker_slots_used";
    pub const SLOTS_AVAILABLE: &str = "worker_slots_available";
}

/// Sink for named counters, gauges and timers.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter
    fn counter(&self, name: &'static str, delta: u64);

    /// Set a gauge to an absolute value
    fn gauge(&self, name: &'static str, value: f64);

    /// Record a duration sample
    fn timer(&self, name: &'static str, value: Duration);
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &'static str, _delta: u64) {}
    fn gauge(&self, _name: &'static str, _value: f64) {}
    fn timer(&self, _name: &'static str, _value: Duration) {}
}

/// Convenience alias used across the runtime.
pub type SharedMetrics = Arc<dyn MetricsSink>;
