//! Worker configuration
//!
//! One record for everything a worker instance needs to know about itself:
//! identity, queues, cache capacity, slot budgets and poller counts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} must be at least 1")]
    ZeroCapacity { field: &'static str },

    #[error("sticky_poll_share must be within 0.0..=1.0, got {0}")]
    InvalidStickyShare(f64),
}

/// Worker instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Identity reported to the server on every poll
    pub identity: String,

    /// Normal task queue this worker serves
    pub task_queue: String,

    /// This worker's run-specific sticky queue
    pub sticky_queue_name: String,

    /// Whether sticky execution is used at all
    pub sticky_queue_enabled: bool,

    /// Share of workflow polls directed at the sticky queue absent backlog
    /// signal, 0.0..=1.0
    pub sticky_poll_share: f64,

    /// Maximum cached workflow runs
    pub cache_capacity: usize,

    /// Concurrent workflow task slots
    pub max_workflow_task_slots: usize,

    /// Concurrent activity task slots
    pub max_activity_task_slots: usize,

    /// Concurrent local activity slots
    pub max_local_activity_slots: usize,

    /// Concurrent workflow poll loops
    pub workflow_poll_loops: usize,

    /// Concurrent activity poll loops
    pub activity_poll_loops: usize,
}

impl WorkerConfig {
    /// Create a configuration with defaults and a unique sticky queue name.
    pub fn new(task_queue: impl Into<String>, identity: impl Into<String>) -> Self {
        let task_queue = task_queue.into();
        let sticky_queue_name = format!("{}-sticky-{}", task_queue, Uuid::new_v4());
        Self {
            identity: identity.into(),
            task_queue,
            sticky_queue_name,
            sticky_queue_enabled: true,
            sticky_poll_share: 0.8,
            cache_capacity: 600,
            max_workflow_task_slots: 100,
            max_activity_task_slots: 100,
            max_local_activity_slots: 100,
            workflow_poll_loops: 2,
            activity_poll_loops: 5,
        }
    }

    /// Disable sticky execution; every poll targets the normal queue and
    /// nothing is cached between tasks.
    pub fn without_sticky_queue(mut self) -> Self {
        self.sticky_queue_enabled = false;
        self
    }

    /// Set the sticky poll share
    pub fn with_sticky_poll_share(mut self, share: f64) -> Self {
        self.sticky_poll_share = share;
        self
    }

    /// Set the cached-run capacity
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set per-kind slot budgets
    pub fn with_slot_capacities(
        mut self,
        workflow: usize,
        activity: usize,
        local_activity: usize,
    ) -> Self {
        self.max_workflow_task_slots = workflow;
        self.max_activity_task_slots = activity;
        self.max_local_activity_slots = local_activity;
        self
    }

    /// Set poll loop counts
    pub fn with_poll_loops(mut self, workflow: usize, activity: usize) -> Self {
        self.workflow_poll_loops = workflow;
        self.activity_poll_loops = activity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), WorkerConfigError> {
        if self.identity.is_empty() {
            return Err(WorkerConfigError::EmptyField { field: "identity" });
        }
        if self.task_queue.is_empty() {
            return Err(WorkerConfigError::EmptyField { field: "task_queue" });
        }
        if self.sticky_queue_enabled && self.sticky_queue_name.is_empty() {
            return Err(WorkerConfigError::EmptyField {
                field: "sticky_queue_name",
            });
        }
        if !(0.0..=1.0).contains(&self.sticky_poll_share) {
            return Err(WorkerConfigError::InvalidStickyShare(self.sticky_poll_share));
        }
        for (field, value) in [
            ("cache_capacity", self.cache_capacity),
            ("max_workflow_task_slots", self.max_workflow_task_slots),
            ("max_activity_task_slots", self.max_activity_task_slots),
            ("max_local_activity_slots", self.max_local_activity_slots),
            ("workflow_poll_loops", self.workflow_poll_loops),
            ("activity_poll_loops", self.activity_poll_loops),
        ] {
            if value == 0 {
                return Err(WorkerConfigError::ZeroCapacity { field });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::new("orders", "worker-1");
        config.validate().unwrap();
        assert!(config.sticky_queue_enabled);
        assert!(config.sticky_queue_name.starts_with("orders-sticky-"));
    }

    #[test]
    fn test_sticky_queue_names_are_unique_per_worker() {
        let a = WorkerConfig::new("orders", "worker-1");
        let b = WorkerConfig::new("orders", "worker-2");
        assert_ne!(a.sticky_queue_name, b.sticky_queue_name);
    }

    #[test]
    fn test_builder_setters() {
        let config = WorkerConfig::new("orders", "worker-1")
            .with_cache_capacity(10)
            .with_slot_capacities(4, 8, 2)
            .with_poll_loops(1, 3)
            .with_sticky_poll_share(0.5);

        assert_eq!(config.cache_capacity, 10);
        assert_eq!(config.max_workflow_task_slots, 4);
        assert_eq!(config.max_activity_task_slots, 8);
        assert_eq!(config.max_local_activity_slots, 2);
        assert_eq!(config.workflow_poll_loops, 1);
        assert_eq!(config.activity_poll_loops, 3);
        assert_eq!(config.sticky_poll_share, 0.5);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = WorkerConfig::new("orders", "");
        assert!(matches!(
            config.validate(),
            Err(WorkerConfigError::EmptyField { field: "identity" })
        ));

        let config = WorkerConfig::new("orders", "worker-1").with_sticky_poll_share(1.5);
        assert!(matches!(
            config.validate(),
            Err(WorkerConfigError::InvalidStickyShare(_))
        ));

        let config = WorkerConfig::new("orders", "worker-1").with_cache_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(WorkerConfigError::ZeroCapacity {
                field: "cache_capacity"
            })
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = WorkerConfig::new("orders", "worker-1");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WorkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
