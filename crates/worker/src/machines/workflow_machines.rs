//! Replay driver
//!
//! [`WorkflowStateMachines`] owns the entity machine set for one run and the
//! shared command sink. Workflow-side code raises intents (start a timer,
//! schedule an activity, ...) which create machines and queue commands;
//! history events are applied in strict `event_id` order and routed either to
//! the oldest pending command (command-originated events, the determinism
//! check) or to the machine that owns the referenced initiated event
//! (completion events).

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;
use windlass_proto::{
    Command, CommandType, EventType, Failure, HistoryEvent, Payload, WorkflowExecution,
};

use super::activity::{ActivityMachine, ScheduleActivityParameters};
use super::command_sink::{CancellableCommand, CommandSink};
use super::continue_as_new::ContinueAsNewMachine;
use super::entity::{CompletionCallback, EntityStateMachine};
use super::local_activity::{LocalActivityMachine, LocalActivityParameters};
use super::signal_external::SignalExternalMachine;
use super::timer::TimerMachine;
use super::StateMachineError;

/// Machine id used for close commands that have no entity machine.
const MACHINELESS: u64 = 0;

/// Opaque handle to a live entity machine, used to request cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineHandle(u64);

/// Entity machine set and command sink for one workflow run.
pub struct WorkflowStateMachines {
    next_machine_id: u64,
    machines_by_id: HashMap<u64, Box<dyn EntityStateMachine>>,
    /// Initiated (command-produced) event id -> owning machine id
    machines_by_initiated_event: HashMap<i64, u64>,
    sink: CommandSink,
    last_handled_event_id: i64,
}

impl Default for WorkflowStateMachines {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStateMachines {
    pub fn new() -> Self {
        Self {
            next_machine_id: MACHINELESS + 1,
            machines_by_id: HashMap::new(),
            machines_by_initiated_event: HashMap::new(),
            sink: CommandSink::new(),
            last_handled_event_id: 0,
        }
    }

    /// Id of the last history event applied, 0 before any.
    pub fn last_handled_event_id(&self) -> i64 {
        self.last_handled_event_id
    }

    /// Number of machines still waiting on an outcome.
    pub fn active_machine_count(&self) -> usize {
        self.machines_by_id.len()
    }

    fn allocate_machine_id(&mut self) -> u64 {
        let id = self.next_machine_id;
        self.next_machine_id += 1;
        id
    }

    // ---- intent API -------------------------------------------------------

    pub fn signal_external_workflow(
        &mut self,
        execution: WorkflowExecution,
        signal_name: String,
        input: Payload,
        callback: CompletionCallback,
    ) -> Result<MachineHandle, StateMachineError> {
        let id = self.allocate_machine_id();
        let machine =
            SignalExternalMachine::new(execution, signal_name, input, callback, self.sink.clone(), id)?;
        self.machines_by_id.insert(id, Box::new(machine));
        Ok(MachineHandle(id))
    }

    pub fn start_timer(
        &mut self,
        timer_id: String,
        fire_after: Duration,
        callback: CompletionCallback,
    ) -> Result<MachineHandle, StateMachineError> {
        let id = self.allocate_machine_id();
        let machine = TimerMachine::new(timer_id, fire_after, callback, self.sink.clone(), id)?;
        self.machines_by_id.insert(id, Box::new(machine));
        Ok(MachineHandle(id))
    }

    pub fn schedule_activity(
        &mut self,
        parameters: ScheduleActivityParameters,
        callback: CompletionCallback,
    ) -> Result<MachineHandle, StateMachineError> {
        let id = self.allocate_machine_id();
        let machine = ActivityMachine::new(parameters, callback, self.sink.clone(), id)?;
        self.machines_by_id.insert(id, Box::new(machine));
        Ok(MachineHandle(id))
    }

    /// Record a locally executed activity outcome as a marker.
    pub fn record_local_activity(
        &mut self,
        parameters: LocalActivityParameters,
        result: Option<Payload>,
        failure: Option<Failure>,
        callback: CompletionCallback,
    ) -> Result<MachineHandle, StateMachineError> {
        let id = self.allocate_machine_id();
        let machine =
            LocalActivityMachine::new(parameters, result, failure, callback, self.sink.clone(), id)?;
        self.machines_by_id.insert(id, Box::new(machine));
        Ok(MachineHandle(id))
    }

    pub fn continue_as_new(
        &mut self,
        workflow_type: String,
        input: Payload,
    ) -> Result<MachineHandle, StateMachineError> {
        let id = self.allocate_machine_id();
        let machine = ContinueAsNewMachine::new(workflow_type, input, self.sink.clone(), id)?;
        self.machines_by_id.insert(id, Box::new(machine));
        Ok(MachineHandle(id))
    }

    /// Request cancellation of an in-flight interaction. Cancelling a machine
    /// that already reached its outcome is a no-op.
    pub fn cancel(&mut self, handle: MachineHandle) -> Result<(), StateMachineError> {
        match self.machines_by_id.get_mut(&handle.0) {
            Some(machine) => machine.cancel(),
            None => Ok(()),
        }
    }

    pub fn complete_workflow(&mut self, result: Payload) {
        self.sink
            .push(CancellableCommand::new(MACHINELESS, Command::CompleteWorkflow { result }));
    }

    pub fn fail_workflow(&mut self, failure: Failure) {
        self.sink
            .push(CancellableCommand::new(MACHINELESS, Command::FailWorkflow { failure }));
    }

    pub fn cancel_workflow(&mut self) {
        self.sink
            .push(CancellableCommand::new(MACHINELESS, Command::CancelWorkflow));
    }

    /// Drain the non-cancelled commands accumulated since the last drain.
    pub fn take_commands(&mut self) -> Vec<Command> {
        self.sink.take_command_snapshot()
    }

    // ---- history application ----------------------------------------------

    /// Apply one history event. Events must arrive in strictly increasing
    /// `event_id` order.
    pub fn handle_event(&mut self, event: &HistoryEvent) -> Result<(), StateMachineError> {
        if event.event_id <= self.last_handled_event_id {
            return Err(StateMachineError::OutOfOrderEvent {
                got: event.event_id,
                last: self.last_handled_event_id,
            });
        }
        self.last_handled_event_id = event.event_id;

        let event_type = event.event_type();
        if let Some(expected) = command_type_for_event(event_type) {
            self.handle_command_event(event, event_type, expected)
        } else if let Some(initiated) = event.initiated_event_id() {
            self.handle_completion_event(event, initiated)
        } else {
            // Lifecycle events (execution started, workflow task boundaries,
            // server-imposed closes) carry no machine routing
            Ok(())
        }
    }

    /// A command-originated event must match the oldest pending command, both
    /// in presence and in type. Any disagreement means the workflow code
    /// produced different commands than the recorded history, which is
    /// non-determinism.
    fn handle_command_event(
        &mut self,
        event: &HistoryEvent,
        event_type: EventType,
        expected: CommandType,
    ) -> Result<(), StateMachineError> {
        let Some(pending) = self.sink.pop_matching_front() else {
            return Err(StateMachineError::NoPendingCommand {
                event_type,
                event_id: event.event_id,
            });
        };
        if pending.command_type() != Some(expected) {
            return Err(StateMachineError::CommandMismatch {
                event_type,
                event_id: event.event_id,
                pending: pending.command_type(),
            });
        }

        let machine_id = pending.machine_id();
        if machine_id == MACHINELESS {
            return Ok(());
        }
        if let Some(machine) = self.machines_by_id.get_mut(&machine_id) {
            debug!(machine = machine.name(), event_id = event.event_id, ?event_type, "command event matched");
            machine.handle_history_event(event)?;
            if is_initiating_event(event_type) {
                self.machines_by_initiated_event.insert(event.event_id, machine_id);
            }
            self.retire_if_final(machine_id);
        }
        Ok(())
    }

    fn handle_completion_event(
        &mut self,
        event: &HistoryEvent,
        initiated: i64,
    ) -> Result<(), StateMachineError> {
        let Some(&machine_id) = self.machines_by_initiated_event.get(&initiated) else {
            return Err(StateMachineError::UnknownInitiatedEvent(initiated));
        };
        if let Some(machine) = self.machines_by_id.get_mut(&machine_id) {
            machine.handle_history_event(event)?;
            self.retire_if_final(machine_id);
        }
        Ok(())
    }

    fn retire_if_final(&mut self, machine_id: u64) {
        let terminal = self
            .machines_by_id
            .get(&machine_id)
            .is_some_and(|m| m.is_final_state());
        if terminal {
            self.machines_by_id.remove(&machine_id);
            self.machines_by_initiated_event.retain(|_, id| *id != machine_id);
        }
    }
}

/// Command type a command-originated event must match at the FIFO front, or
/// `None` for events that do not originate from a command.
fn command_type_for_event(event_type: EventType) -> Option<CommandType> {
    match event_type {
        EventType::ActivityTaskScheduled => Some(CommandType::ScheduleActivity),
        EventType::ActivityTaskCancelRequested => Some(CommandType::RequestCancelActivity),
        EventType::TimerStarted => Some(CommandType::StartTimer),
        EventType::TimerCanceled => Some(CommandType::CancelTimer),
        EventType::SignalExternalWorkflowInitiated => Some(CommandType::SignalExternalWorkflow),
        EventType::MarkerRecorded => Some(CommandType::RecordMarker),
        EventType::WorkflowExecutionContinuedAsNew => Some(CommandType::ContinueAsNewWorkflow),
        EventType::WorkflowExecutionCompleted => Some(CommandType::CompleteWorkflow),
        EventType::WorkflowExecutionFailed => Some(CommandType::FailWorkflow),
        EventType::WorkflowExecutionCanceled => Some(CommandType::CancelWorkflow),
        _ => None,
    }
}

/// Events whose id becomes the routing key for later completion events.
fn is_initiating_event(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::ActivityTaskScheduled
            | EventType::TimerStarted
            | EventType::SignalExternalWorkflowInitiated
    )
}
