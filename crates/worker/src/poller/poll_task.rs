//! Slot-gated poll attempts
//!
//! One poll attempt is: reserve a slot, long-poll the server, and either
//! hand the slot to the task that came back or release it with `NeverUsed`.
//! The slot travels inside a [`SlotReleaseHandle`] so whoever finishes the
//! task releases exactly once, and a dropped task still returns its slot.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;
use windlass_proto::{PollActivityTaskResponse, PollWorkflowTaskResponse, TaskQueueKind};

use super::sticky_queue::StickyQueueBalancer;
use super::PollerError;
use crate::metrics::{names, SharedMetrics};
use crate::slots::{SlotKind, SlotPermit, SlotReleaseReason, SlotReservationContext, SlotSupplier};
use crate::service::{PollActivityTaskRequest, PollWorkflowTaskRequest, WorkflowService};

/// Releases one slot permit exactly once.
///
/// If the handle is dropped without an explicit release the slot goes back
/// with `NeverUsed`, so no code path can leak capacity.
pub struct SlotReleaseHandle {
    supplier: Arc<dyn SlotSupplier>,
    permit: Mutex<Option<SlotPermit>>,
}

impl SlotReleaseHandle {
    pub fn new(supplier: Arc<dyn SlotSupplier>, permit: SlotPermit) -> Self {
        Self {
            supplier,
            permit: Mutex::new(Some(permit)),
        }
    }

    /// Release the slot. Later calls are no-ops.
    pub fn release(&self, reason: SlotReleaseReason) {
        if let Some(permit) = self.permit.lock().take() {
            self.supplier.release_slot(permit, reason);
        }
    }

    pub fn is_released(&self) -> bool {
        self.permit.lock().is_none()
    }
}

impl Drop for SlotReleaseHandle {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.lock().take() {
            self.supplier.release_slot(permit, SlotReleaseReason::NeverUsed);
        }
    }
}

/// A workflow task admitted by a slot.
pub struct WorkflowTask {
    pub task: PollWorkflowTaskResponse,
    /// Queue the task was polled from
    pub kind: TaskQueueKind,
    pub slot: Arc<SlotReleaseHandle>,
}

/// An activity task admitted by a slot.
pub struct ActivityTask {
    pub task: PollActivityTaskResponse,
    pub slot: Arc<SlotReleaseHandle>,
}

/// One kind of slot-gated poll, driven in a loop by the poller.
#[async_trait]
pub trait PollTask: Send + Sync {
    type Output: Send + 'static;

    /// Run one reserve-then-poll attempt. `Ok(None)` is an empty poll.
    async fn poll(&self) -> Result<Option<Self::Output>, PollerError>;
}

/// Workflow task polling against the normal and sticky queues.
pub struct WorkflowPollTask {
    service: Arc<dyn WorkflowService>,
    slots: Arc<dyn SlotSupplier>,
    balancer: Arc<StickyQueueBalancer>,
    task_queue: String,
    sticky_queue: String,
    identity: String,
    metrics: SharedMetrics,
}

impl WorkflowPollTask {
    pub fn new(
        service: Arc<dyn WorkflowService>,
        slots: Arc<dyn SlotSupplier>,
        balancer: Arc<StickyQueueBalancer>,
        task_queue: String,
        sticky_queue: String,
        identity: String,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            service,
            slots,
            balancer,
            task_queue,
            sticky_queue,
            identity,
            metrics,
        }
    }

    fn reservation_context(&self) -> SlotReservationContext {
        SlotReservationContext {
            task_queue: self.task_queue.clone(),
            worker_identity: self.identity.clone(),
            kind: SlotKind::WorkflowTask,
        }
    }
}

#[async_trait]
impl PollTask for WorkflowPollTask {
    type Output = WorkflowTask;

    async fn poll(&self) -> Result<Option<WorkflowTask>, PollerError> {
        let permit = self.slots.reserve_slot(&self.reservation_context()).await?;
        let slot = SlotReleaseHandle::new(self.slots.clone(), permit);

        let kind = self.balancer.make_poll_decision();
        let queue = match kind {
            TaskQueueKind::Normal => self.task_queue.clone(),
            TaskQueueKind::Sticky => self.sticky_queue.clone(),
        };

        let result = self
            .service
            .poll_workflow_task(PollWorkflowTaskRequest {
                task_queue: queue,
                kind,
                identity: self.identity.clone(),
            })
            .await;

        match result {
            Ok(Some(task)) => {
                self.balancer.record_task(kind, task.backlog_count_hint);
                Ok(Some(WorkflowTask {
                    task,
                    kind,
                    slot: Arc::new(slot),
                }))
            }
            Ok(None) => {
                self.balancer.record_empty_or_failed(kind);
                self.metrics.counter(names::WORKFLOW_POLL_NO_TASK, 1);
                slot.release(SlotReleaseReason::NeverUsed);
                Ok(None)
            }
            Err(err) => {
                self.balancer.record_empty_or_failed(kind);
                slot.release(SlotReleaseReason::NeverUsed);
                Err(err.into())
            }
        }
    }
}

/// Activity task polling.
pub struct ActivityPollTask {
    service: Arc<dyn WorkflowService>,
    slots: Arc<dyn SlotSupplier>,
    task_queue: String,
    identity: String,
    metrics: SharedMetrics,
}

impl ActivityPollTask {
    pub fn new(
        service: Arc<dyn WorkflowService>,
        slots: Arc<dyn SlotSupplier>,
        task_queue: String,
        identity: String,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            service,
            slots,
            task_queue,
            identity,
            metrics,
        }
    }

    fn record_schedule_to_start(&self, task: &PollActivityTaskResponse) {
        let Some(scheduled_at) = task.scheduled_at_millis else {
            return;
        };
        let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => now.as_millis() as u64,
            Err(_) => return,
        };
        let latency = Duration::from_millis(now.saturating_sub(scheduled_at));
        self.metrics
            .timer(names::ACTIVITY_SCHEDULE_TO_START_LATENCY, latency);
    }
}

#[async_trait]
impl PollTask for ActivityPollTask {
    type Output = ActivityTask;

    async fn poll(&self) -> Result<Option<ActivityTask>, PollerError> {
        let permit = self
            .slots
            .reserve_slot(&SlotReservationContext {
                task_queue: self.task_queue.clone(),
                worker_identity: self.identity.clone(),
                kind: SlotKind::ActivityTask,
            })
            .await?;
        let slot = SlotReleaseHandle::new(self.slots.clone(), permit);

        let result = self
            .service
            .poll_activity_task(PollActivityTaskRequest {
                task_queue: self.task_queue.clone(),
                identity: self.identity.clone(),
            })
            .await;

        match result {
            Ok(Some(task)) => {
                self.record_schedule_to_start(&task);
                Ok(Some(ActivityTask {
                    task,
                    slot: Arc::new(slot),
                }))
            }
            Ok(None) => {
                self.metrics.counter(names::ACTIVITY_POLL_NO_TASK, 1);
                slot.release(SlotReleaseReason::NeverUsed);
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "activity poll failed, returning slot");
                slot.release(SlotReleaseReason::NeverUsed);
                Err(err.into())
            }
        }
    }
}
