//! Task admission slots
//!
//! Slots bound how much work of each kind a worker has in flight at once.
//! A poller must reserve a slot before polling, the permit rides with the
//! resulting task, and release carries a reason so the accounting can tell
//! productive work from wasted reservations. Suppliers range from a fixed
//! semaphore to PID-controlled throttling against host resource targets.

mod resource_based;
mod supplier;
mod tracking;

pub use resource_based::{
    RealSystemResourceInfo, ResourceBasedController, ResourceBasedControllerOptions,
    ResourceBasedSlotOptions, ResourceBasedSlotSupplier, SystemResourceInfo,
};
pub use supplier::{
    FixedSizeSlotSupplier, SlotError, SlotKind, SlotPermit, SlotReleaseReason,
    SlotReservationContext, SlotSupplier,
};
pub use tracking::TrackingSlotSupplier;
