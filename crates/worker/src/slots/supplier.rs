//! Slot permits and the supplier seam
//!
//! A slot is one unit of the worker's concurrency budget for a task kind.
//! Pollers reserve a slot before polling so the worker never accepts more
//! work than it can execute; the permit travels with the task and is released
//! exactly once with a reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Task kind a slot admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    WorkflowTask,
    ActivityTask,
    LocalActivityTask,
}

/// Why a slot is being handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotReleaseReason {
    /// The task the slot admitted ran to completion
    TaskComplete,
    /// The slot was reserved but no task ever used it (empty poll, poll
    /// error, dispatch handle closed unused)
    NeverUsed,
    /// The task exceeded its processing deadline
    TimedOut,
}

/// Context handed to a supplier when a reservation is requested.
#[derive(Debug, Clone)]
pub struct SlotReservationContext {
    pub task_queue: String,
    pub worker_identity: String,
    pub kind: SlotKind,
}

/// An admitted unit of concurrency.
///
/// The permit id is unique per process and lets wrappers track a permit's
/// lifecycle without owning it.
#[derive(Debug)]
pub struct SlotPermit {
    kind: SlotKind,
    id: u64,
    _permit: Option<OwnedSemaphorePermit>,
}

static NEXT_PERMIT_ID: AtomicU64 = AtomicU64::new(1);

impl SlotPermit {
    pub(crate) fn new(kind: SlotKind, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            kind,
            id: NEXT_PERMIT_ID.fetch_add(1, Ordering::Relaxed),
            _permit: permit,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Errors from slot reservation.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The supplier stopped issuing permits (worker shutting down)
    #[error("slot supplier shut down")]
    Shutdown,
}

/// Source of slot permits for one task kind.
///
/// Reservation must be cancel-safe: dropping a pending `reserve_slot` future
/// leaks no capacity.
#[async_trait]
pub trait SlotSupplier: Send + Sync {
    /// Wait until a slot is available and reserve it.
    async fn reserve_slot(&self, ctx: &SlotReservationContext) -> Result<SlotPermit, SlotError>;

    /// Reserve a slot only if one is available right now.
    fn try_reserve_slot(&self, ctx: &SlotReservationContext) -> Option<SlotPermit>;

    /// Hand a permit back. Consumes the permit, so a slot cannot be released
    /// twice through this path.
    fn release_slot(&self, permit: SlotPermit, reason: SlotReleaseReason);
}

/// Static-capacity supplier backed by a semaphore.
pub struct FixedSizeSlotSupplier {
    kind: SlotKind,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl FixedSizeSlotSupplier {
    pub fn new(kind: SlotKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl SlotSupplier for FixedSizeSlotSupplier {
    async fn reserve_slot(&self, _ctx: &SlotReservationContext) -> Result<SlotPermit, SlotError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SlotError::Shutdown)?;
        Ok(SlotPermit::new(self.kind, Some(permit)))
    }

    fn try_reserve_slot(&self, _ctx: &SlotReservationContext) -> Option<SlotPermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(SlotPermit::new(self.kind, Some(permit))),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    fn release_slot(&self, permit: SlotPermit, _reason: SlotReleaseReason) {
        // Dropping the permit returns capacity to the semaphore
        drop(permit);
    }
}

#[cfg(test)]
pub(crate) fn test_context(kind: SlotKind) -> SlotReservationContext {
    SlotReservationContext {
        task_queue: "q".to_string(),
        worker_identity: "worker-1".to_string(),
        kind,
    }
}
