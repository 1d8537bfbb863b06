//! Activity-invocation entity state machine

use std::sync::LazyLock;
use std::time::Duration;

use windlass_proto::{Command, EventAttributes, EventType, Failure, HistoryEvent, Payload};

use super::command_sink::{CancellableCommand, CommandSink};
use super::definition::{StateMachineDefinition, Trigger};
use super::entity::{CompletionCallback, EntityStateMachine, Machine};
use super::StateMachineError;

/// Parameters for scheduling an activity.
#[derive(Debug, Clone)]
pub struct ScheduleActivityParameters {
    pub activity_id: String,
    pub activity_type: String,
    pub task_queue: String,
    pub input: Payload,
    pub start_to_close_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExplicitEvent {
    Schedule,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    ScheduleCommandCreated,
    ScheduledEventRecorded,
    Started,
    CancelRequested,
    Completed,
    Failed,
    Canceled,
}

static DEFINITION: LazyLock<StateMachineDefinition<State, ExplicitEvent, ActivityMachine>> =
    LazyLock::new(|| {
        StateMachineDefinition::new(
            "Activity",
            State::Created,
            &[State::Completed, State::Failed, State::Canceled],
        )
        .add_with(
            State::Created,
            Trigger::Explicit(ExplicitEvent::Schedule),
            State::ScheduleCommandCreated,
            ActivityMachine::create_schedule_command,
        )
        .add_with(
            State::ScheduleCommandCreated,
            Trigger::Explicit(ExplicitEvent::Cancel),
            State::Canceled,
            ActivityMachine::cancel_schedule_command,
        )
        .add_with(
            State::ScheduleCommandCreated,
            Trigger::History(EventType::ActivityTaskScheduled),
            State::ScheduledEventRecorded,
            ActivityMachine::set_initial_command_event_id,
        )
        .add(
            State::ScheduledEventRecorded,
            Trigger::History(EventType::ActivityTaskStarted),
            State::Started,
        )
        .add_with(
            State::ScheduledEventRecorded,
            Trigger::Explicit(ExplicitEvent::Cancel),
            State::CancelRequested,
            ActivityMachine::create_request_cancel_command,
        )
        // An activity can complete or fail without a started event appearing
        // in the same task's delta
        .add_with(
            State::ScheduledEventRecorded,
            Trigger::History(EventType::ActivityTaskCompleted),
            State::Completed,
            ActivityMachine::notify_completed,
        )
        .add_with(
            State::ScheduledEventRecorded,
            Trigger::History(EventType::ActivityTaskFailed),
            State::Failed,
            ActivityMachine::notify_failed,
        )
        .add_with(
            State::Started,
            Trigger::History(EventType::ActivityTaskCompleted),
            State::Completed,
            ActivityMachine::notify_completed,
        )
        .add_with(
            State::Started,
            Trigger::History(EventType::ActivityTaskFailed),
            State::Failed,
            ActivityMachine::notify_failed,
        )
        .add_with(
            State::Started,
            Trigger::Explicit(ExplicitEvent::Cancel),
            State::CancelRequested,
            ActivityMachine::create_request_cancel_command,
        )
        .add(
            State::CancelRequested,
            Trigger::History(EventType::ActivityTaskCancelRequested),
            State::CancelRequested,
        )
        // Try-cancel semantics: the activity may still win the race and
        // complete or fail after cancellation was requested
        .add_with(
            State::CancelRequested,
            Trigger::History(EventType::ActivityTaskStarted),
            State::CancelRequested,
            ActivityMachine::no_op,
        )
        .add_with(
            State::CancelRequested,
            Trigger::History(EventType::ActivityTaskCanceled),
            State::Canceled,
            ActivityMachine::notify_canceled,
        )
        .add_with(
            State::CancelRequested,
            Trigger::History(EventType::ActivityTaskCompleted),
            State::Completed,
            ActivityMachine::notify_completed,
        )
        .add_with(
            State::CancelRequested,
            Trigger::History(EventType::ActivityTaskFailed),
            State::Failed,
            ActivityMachine::notify_failed,
        )
    });

/// Lifecycle of one activity invocation, with try-cancel semantics.
pub struct ActivityMachine {
    state: State,
    current_event: Option<HistoryEvent>,
    parameters: Option<ScheduleActivityParameters>,
    activity_id: String,
    pending_command: Option<CancellableCommand>,
    initial_command_event_id: Option<i64>,
    completion_callback: CompletionCallback,
    machine_id: u64,
    sink: CommandSink,
}

impl ActivityMachine {
    pub fn new(
        parameters: ScheduleActivityParameters,
        completion_callback: CompletionCallback,
        sink: CommandSink,
        machine_id: u64,
    ) -> Result<Self, StateMachineError> {
        let activity_id = parameters.activity_id.clone();
        let mut machine = Self {
            state: DEFINITION.initial_state(),
            current_event: None,
            parameters: Some(parameters),
            activity_id,
            pending_command: None,
            initial_command_event_id: None,
            completion_callback,
            machine_id,
            sink,
        };
        machine.explicit_event(ExplicitEvent::Schedule)?;
        Ok(machine)
    }

    fn create_schedule_command(&mut self) {
        let Some(parameters) = self.parameters.take() else {
            return;
        };
        let command = CancellableCommand::new(
            self.machine_id,
            Command::ScheduleActivity {
                activity_id: parameters.activity_id,
                activity_type: parameters.activity_type,
                task_queue: parameters.task_queue,
                input: parameters.input,
                start_to_close_timeout: parameters.start_to_close_timeout,
            },
        );
        self.pending_command = Some(command.clone());
        self.sink.push(command);
    }

    fn set_initial_command_event_id(&mut self) {
        self.initial_command_event_id = self.current_event.as_ref().map(|e| e.event_id);
        self.pending_command = None;
    }

    fn notify_completed(&mut self) {
        let result = match self.current_event.as_ref().map(|e| &e.attributes) {
            Some(EventAttributes::ActivityTaskCompleted { result, .. }) => Some(result.clone()),
            _ => None,
        };
        (self.completion_callback)(result, None);
    }

    fn notify_failed(&mut self) {
        let failure = match self.current_event.as_ref().map(|e| &e.attributes) {
            Some(EventAttributes::ActivityTaskFailed { failure, .. }) => failure.clone(),
            _ => Failure::application("activity failed", "ApplicationFailure"),
        };
        (self.completion_callback)(None, Some(failure));
    }

    fn notify_canceled(&mut self) {
        let failure = Failure::canceled(format!("activity {} canceled", self.activity_id));
        (self.completion_callback)(None, Some(failure));
    }

    /// The schedule command was never acknowledged: drop it and synthesize an
    /// immediate cancellation outcome.
    fn cancel_schedule_command(&mut self) {
        if let Some(command) = self.pending_command.take() {
            command.cancel();
        }
        self.notify_canceled();
    }

    fn create_request_cancel_command(&mut self) {
        let scheduled_event_id = self.initial_command_event_id.unwrap_or_default();
        self.sink.push(CancellableCommand::new(
            self.machine_id,
            Command::RequestCancelActivity { scheduled_event_id },
        ));
    }

    fn no_op(&mut self) {}
}

impl Machine for ActivityMachine {
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

impl EntityStateMachine for ActivityMachine {
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
        if self.in_final_state() || self.state == State::CancelRequested {
            return Ok(());
        }
        self.explicit_event(ExplicitEvent::Cancel)
    }
}
