//! Local-activity entity state machine
//!
//! Local activities do not round-trip through the server's activity task
//! queue. The worker runs them in-process and durably records the outcome as
//! a marker in history. On replay the machine emits the same marker command
//! and the recorded marker event supplies the outcome, so the workflow sees
//! the original result instead of re-running the function.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use windlass_proto::{Command, EventAttributes, EventType, Failure, HistoryEvent, Payload};

use super::command_sink::{CancellableCommand, CommandSink};
use super::definition::{StateMachineDefinition, Trigger};
use super::entity::{CompletionCallback, EntityStateMachine, Machine};
use super::StateMachineError;

/// Marker name under which local activity outcomes are recorded.
pub const LOCAL_ACTIVITY_MARKER_NAME: &str = "local_activity";

/// Parameters identifying one local activity invocation.
#[derive(Debug, Clone)]
pub struct LocalActivityParameters {
    pub activity_id: String,
    pub activity_type: String,
    pub input: Payload,
}

/// Outcome payload stored in the marker details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LocalActivityMarkerData {
    pub activity_id: String,
    pub activity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExplicitEvent {
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    MarkerCommandCreated,
    MarkerCommandRecorded,
}

static DEFINITION: LazyLock<StateMachineDefinition<State, ExplicitEvent, LocalActivityMachine>> =
    LazyLock::new(|| {
        StateMachineDefinition::new(
            "LocalActivity",
            State::Created,
            &[State::MarkerCommandRecorded],
        )
        .add_with(
            State::Created,
            Trigger::Explicit(ExplicitEvent::Schedule),
            State::MarkerCommandCreated,
            LocalActivityMachine::create_marker_command,
        )
        .add_with(
            State::MarkerCommandCreated,
            Trigger::History(EventType::MarkerRecorded),
            State::MarkerCommandRecorded,
            LocalActivityMachine::notify_from_marker,
        )
    });

/// Lifecycle of one local activity invocation, recorded as a marker.
pub struct LocalActivityMachine {
    state: State,
    current_event: Option<HistoryEvent>,
    marker_data: Option<LocalActivityMarkerData>,
    completion_callback: CompletionCallback,
    machine_id: u64,
    sink: CommandSink,
}

impl LocalActivityMachine {
    /// Create the machine with the locally executed outcome and emit the
    /// marker command. During replay the recorded marker event's details win
    /// over `result`/`failure`.
    pub fn new(
        parameters: LocalActivityParameters,
        result: Option<Payload>,
        failure: Option<Failure>,
        completion_callback: CompletionCallback,
        sink: CommandSink,
        machine_id: u64,
    ) -> Result<Self, StateMachineError> {
        let mut machine = Self {
            state: DEFINITION.initial_state(),
            current_event: None,
            marker_data: Some(LocalActivityMarkerData {
                activity_id: parameters.activity_id,
                activity_type: parameters.activity_type,
                result,
                failure,
            }),
            completion_callback,
            machine_id,
            sink,
        };
        machine.explicit_event(ExplicitEvent::Schedule)?;
        Ok(machine)
    }

    fn create_marker_command(&mut self) {
        let details = self
            .marker_data
            .as_ref()
            .and_then(|d| serde_json::to_value(d).ok())
            .unwrap_or(Payload::Null);
        self.sink.push(CancellableCommand::new(
            self.machine_id,
            Command::RecordMarker {
                marker_name: LOCAL_ACTIVITY_MARKER_NAME.to_string(),
                details,
            },
        ));
    }

    /// Deliver the outcome recorded in the marker event. Falls back to the
    /// locally computed outcome if the details cannot be parsed.
    fn notify_from_marker(&mut self) {
        let recorded = match self.current_event.as_ref().map(|e| &e.attributes) {
            Some(EventAttributes::MarkerRecorded { details, .. }) => {
                serde_json::from_value::<LocalActivityMarkerData>(details.clone()).ok()
            }
            _ => None,
        };
        let data = recorded.or_else(|| self.marker_data.take());
        match data {
            Some(data) => (self.completion_callback)(data.result, data.failure),
            None => (self.completion_callback)(None, None),
        }
    }
}

impl Machine for LocalActivityMachine {
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

    fn set_current_event(&mut self, event: Option<HistoryEvent>) {
        self.current_event = event;
    }
}

impl EntityStateMachine for LocalActivityMachine {
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
        // The function already ran in-process; the marker always rides to the
        // server so replay stays consistent.
        Ok(())
    }
}
