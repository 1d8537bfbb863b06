//! Replay state machines
//!
//! Every protocol interaction a workflow can have in flight (an activity
//! invocation, a timer, a signal to an external workflow, ...) is modeled as
//! one entity state machine bound to a declarative transition table. All
//! machines share one generic engine, which is what gives every command kind
//! the same replay-safety guarantee: replay must reproduce the exact same
//! sequence of emitted commands given the same sequence of history events,
//! independent of wall-clock time or thread scheduling.
//!
//! A history event arriving in a state that has no matching edge is a
//! determinism or protocol violation and fails loudly; it is never silently
//! absorbed.
//!
//! This module provides:
//! - [`StateMachineDefinition`] - the `(state, trigger) -> (state, action)` table
//! - [`Machine`] - the generic engine every entity machine plugs into
//! - [`WorkflowStateMachines`] - the replay driver owning a run's machine set
//! - One entity machine per command kind (signal-external, timer, activity,
//!   continue-as-new, local activity)

mod activity;
mod command_sink;
mod continue_as_new;
mod definition;
mod entity;
mod local_activity;
mod signal_external;
mod timer;
mod workflow_machines;

pub use activity::{ActivityMachine, ScheduleActivityParameters};
pub use command_sink::{CancellableCommand, CommandSink};
pub use continue_as_new::ContinueAsNewMachine;
pub use definition::{StateMachineDefinition, Transition, Trigger};
pub use entity::{CompletionCallback, EntityStateMachine, Machine};
pub use local_activity::{LocalActivityMachine, LocalActivityParameters};
pub use signal_external::SignalExternalMachine;
pub use timer::TimerMachine;
pub use workflow_machines::{MachineHandle, WorkflowStateMachines};

/// Errors raised by the state-machine layer.
///
/// All of these indicate either a server/client protocol skew or
/// non-deterministic workflow code; they are unrecoverable for the current
/// workflow task and propagate up to the task-processing layer.
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    /// A trigger arrived in a state with no matching edge
    #[error("{machine}: no transition from state {state} for trigger {trigger}")]
    UnexpectedTransition {
        machine: &'static str,
        state: String,
        trigger: String,
    },

    /// History events must be applied in strict sequence order
    #[error("history event {got} applied out of order, last handled was {last}")]
    OutOfOrderEvent { got: i64, last: i64 },

    /// A completion event referenced an initiated event no machine owns
    #[error("no entity state machine registered for initiated event id {0}")]
    UnknownInitiatedEvent(i64),

    /// A command event did not match the oldest pending command
    #[error(
        "command event {event_type:?} at id {event_id} does not match pending command {pending:?}"
    )]
    CommandMismatch {
        event_type: windlass_proto::EventType,
        event_id: i64,
        pending: Option<windlass_proto::CommandType>,
    },

    /// A command event arrived with no pending command to match
    #[error("command event {event_type:?} at id {event_id} arrived with no pending command")]
    NoPendingCommand {
        event_type: windlass_proto::EventType,
        event_id: i64,
    },
}
