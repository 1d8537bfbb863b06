//! Continue-as-new entity state machine

use std::sync::LazyLock;

use windlass_proto::{Command, EventType, HistoryEvent, Payload};

use super::command_sink::{CancellableCommand, CommandSink};
use super::definition::{StateMachineDefinition, Trigger};
use super::entity::{EntityStateMachine, Machine};
use super::StateMachineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExplicitEvent {
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    ContinueAsNewCommandCreated,
    ContinueAsNewCommandRecorded,
}

static DEFINITION: LazyLock<StateMachineDefinition<State, ExplicitEvent, ContinueAsNewMachine>> =
    LazyLock::new(|| {
        StateMachineDefinition::new(
            "ContinueAsNewWorkflow",
            State::Created,
            &[State::ContinueAsNewCommandRecorded],
        )
        .add_with(
            State::Created,
            Trigger::Explicit(ExplicitEvent::Schedule),
            State::ContinueAsNewCommandCreated,
            ContinueAsNewMachine::create_continue_as_new_command,
        )
        .add(
            State::ContinueAsNewCommandCreated,
            Trigger::History(EventType::WorkflowExecutionContinuedAsNew),
            State::ContinueAsNewCommandRecorded,
        )
    });

/// Lifecycle of a continue-as-new close of the current run.
///
/// There is no cancellation path: once workflow code decides to continue as
/// new, the command rides to the server.
pub struct ContinueAsNewMachine {
    state: State,
    attributes: Option<(String, Payload)>,
    machine_id: u64,
    sink: CommandSink,
}

impl ContinueAsNewMachine {
    pub fn new(
        workflow_type: String,
        input: Payload,
        sink: CommandSink,
        machine_id: u64,
    ) -> Result<Self, StateMachineError> {
        let mut machine = Self {
            state: DEFINITION.initial_state(),
            attributes: Some((workflow_type, input)),
            machine_id,
            sink,
        };
        machine.explicit_event(ExplicitEvent::Schedule)?;
        Ok(machine)
    }

    fn create_continue_as_new_command(&mut self) {
        let (workflow_type, input) = self
            .attributes
            .take()
            .unwrap_or_else(|| (String::new(), Payload::Null));
        self.sink.push(CancellableCommand::new(
            self.machine_id,
            Command::ContinueAsNewWorkflow {
                workflow_type,
                input,
            },
        ));
    }
}

impl Machine for ContinueAsNewMachine {
    type State = State;
    type Explicit = ExplicitEvent;

    fn definition() -> &'static StateMachineDefinition<State, ExplicitEvent, Self> {
        &DEFINITION
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
    }
}

impl EntityStateMachine for ContinueAsNewMachine {
    fn name(&self) -> &'static str {
        DEFINITION.name()
    }

    fn handle_history_event(&mut self, event: &HistoryEvent) -> Result<(), StateMachineError> {
        self.apply_history_event(event)
    }

    fn is_final_state(&self) -> bool {
        self.in_final_state()
    }

    fn cancel(&mut self) -> Result<(), StateMachineError> {
        // Continue-as-new is not cancellable
        Ok(())
    }
}
