//! # Windlass Worker Runtime
//!
//! The worker-side runtime of a durable workflow-orchestration client. It
//! turns a server-supplied, append-only event history into deterministic
//! replay of workflow state machines, turns emitted commands back into
//! protocol messages, and manages the concurrency budget with which a process
//! polls for and executes tasks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Poller                                │
//! │  (reserve slot → long poll → dispatch handle, per kind)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WorkflowExecutorCache                        │
//! │  (sticky run cache, run lock, lock-aware eviction)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WorkflowStateMachines                        │
//! │  (per-command entity machines, event replay, command sink)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow: a poller reserves a slot, polls the server, looks up or creates
//! a cached execution under the run lock, replays the task's history events
//! through the entity state machines, drains the resulting commands for the
//! completion, and releases the slot.

pub mod cache;
pub mod client;
pub mod config;
pub mod machines;
pub mod metrics;
pub mod poller;
pub mod service;
pub mod slots;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cache::{CacheError, WorkflowExecutorCache, WorkflowRunLockManager};
    pub use crate::client::{get_workflow_execution_result, WorkflowResultError};
    pub use crate::config::{WorkerConfig, WorkerConfigError};
    pub use crate::machines::{
        EntityStateMachine, StateMachineError, WorkflowStateMachines,
    };
    pub use crate::metrics::{MetricsSink, NoopMetrics};
    pub use crate::poller::{
        Poller, PollerConfig, PollerError, StickyQueueBalancer, WorkflowTaskDispatchHandle,
    };
    pub use crate::service::{RpcError, WorkflowService};
    pub use crate::slots::{
        FixedSizeSlotSupplier, SlotKind, SlotPermit, SlotReleaseReason, SlotSupplier,
        TrackingSlotSupplier,
    };
}

// Re-export key types at crate root
pub use cache::{WorkflowExecutorCache, WorkflowRunLockManager, WorkflowRunTaskHandler};
pub use config::WorkerConfig;
pub use machines::{StateMachineError, WorkflowStateMachines};
pub use metrics::{MetricsSink, NoopMetrics};
pub use poller::{Poller, StickyQueueBalancer, WorkflowTaskDispatchHandle};
pub use service::{RpcError, WorkflowService};
pub use slots::{
    FixedSizeSlotSupplier, SlotKind, SlotPermit, SlotReleaseReason, SlotSupplier,
    TrackingSlotSupplier,
};
