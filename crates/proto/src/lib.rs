//! # Windlass Protocol Types
//!
//! Inert data types shared between the worker runtime and the orchestration
//! server:
//!
//! - [`Command`] - an intent produced by workflow code during one workflow task
//! - [`HistoryEvent`] - an immutable, ordered fact recorded by the server
//! - [`WorkflowExecution`] - run identity (workflow id + run id)
//! - Poll request/response records consumed by the worker's pollers
//!
//! Commands are immutable once sent. History events are append-only and
//! identified by a monotonically increasing `event_id` within a run; they are
//! consumed during replay and never mutated.

mod command;
mod event;
mod execution;
mod task;

pub use command::{Command, CommandType};
pub use event::{EventAttributes, EventType, HistoryEvent};
pub use execution::{Failure, Payload, WorkflowExecution};
pub use task::{
    GetHistoryRequest, GetHistoryResponse, PollActivityTaskResponse, PollWorkflowTaskResponse,
    TaskQueueKind,
};
