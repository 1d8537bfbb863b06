//! Task polling
//!
//! Everything between "the worker has capacity" and "a task is in hand":
//! - [`StickyQueueBalancer`] - routes workflow polls between normal and
//!   sticky queues
//! - [`WorkflowPollTask`] / [`ActivityPollTask`] - slot-gated single poll
//!   attempts
//! - [`Poller`] - concurrent poll loops with error backoff and shutdown
//! - [`WorkflowTaskDispatchHandle`] - eager dispatch bypassing the poll loop

mod dispatch;
mod poll_task;
#[allow(clippy::module_inception)]
mod poller;
mod sticky_queue;

pub use dispatch::WorkflowTaskDispatchHandle;
pub use poll_task::{
    ActivityPollTask, ActivityTask, PollTask, SlotReleaseHandle, WorkflowPollTask, WorkflowTask,
};
pub use poller::{Poller, PollerConfig};
pub use sticky_queue::StickyQueueBalancer;

use crate::service::RpcError;
use crate::slots::SlotError;

/// Errors from the polling layer.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// The poll RPC itself failed
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Slot reservation failed (worker shutting down)
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// A task was offered from a queue this worker does not poll
    #[error("task offered from foreign task queue {queue}")]
    ForeignTaskQueue { queue: String },
}
