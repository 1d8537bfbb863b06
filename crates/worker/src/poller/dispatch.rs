//! Eager workflow task dispatch
//!
//! A dispatch handle is a pre-reserved slot plus a one-shot delivery path
//! into the workflow task processor. The server (or a completing activity)
//! can hand the worker a follow-up workflow task directly, skipping the poll
//! round trip; if nothing is ever dispatched the handle's slot goes back as
//! `NeverUsed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;
use windlass_proto::{PollWorkflowTaskResponse, TaskQueueKind};

use super::poll_task::{SlotReleaseHandle, WorkflowTask};
use super::PollerError;
use crate::slots::SlotReleaseReason;

type Dispatcher = Box<dyn Fn(WorkflowTask) + Send + Sync>;

/// One-shot delivery of a workflow task into the processing pipeline.
///
/// `dispatch` and `close` race safely in either order: whichever wins the
/// completed flag decides whether the slot admits a task or is returned
/// unused.
pub struct WorkflowTaskDispatchHandle {
    completed: AtomicBool,
    slot: Arc<SlotReleaseHandle>,
    /// Queues this worker owns; tasks from anywhere else are rejected
    accepted_queues: Vec<String>,
    dispatcher: Dispatcher,
}

impl WorkflowTaskDispatchHandle {
    pub fn new(
        slot: Arc<SlotReleaseHandle>,
        accepted_queues: Vec<String>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            completed: AtomicBool::new(false),
            slot,
            accepted_queues,
            dispatcher,
        }
    }

    /// Deliver a task through this handle.
    ///
    /// Returns `Ok(true)` if the task was accepted, `Ok(false)` if the handle
    /// was already used or closed. A task from a queue this worker does not
    /// poll is an error and does not consume the handle.
    pub fn dispatch(
        &self,
        task: PollWorkflowTaskResponse,
        from_queue: &str,
        kind: TaskQueueKind,
    ) -> Result<bool, PollerError> {
        if !self.accepted_queues.iter().any(|q| q == from_queue) {
            return Err(PollerError::ForeignTaskQueue {
                queue: from_queue.to_string(),
            });
        }
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }
        (self.dispatcher)(WorkflowTask {
            task,
            kind,
            slot: self.slot.clone(),
        });
        Ok(true)
    }

    /// Give up on the handle. If nothing was dispatched the slot is released
    /// as never used.
    pub fn close(&self) {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("dispatch handle closed unused, returning slot");
            self.slot.release(SlotReleaseReason::NeverUsed);
        }
    }
}

impl Drop for WorkflowTaskDispatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}
