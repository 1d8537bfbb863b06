//! Timer entity state machine

use std::sync::LazyLock;
use std::time::Duration;

use windlass_proto::{Command, EventType, Failure, HistoryEvent};

use super::command_sink::{CancellableCommand, CommandSink};
use super::definition::{StateMachineDefinition, Trigger};
use super::entity::{CompletionCallback, EntityStateMachine, Machine};
use super::StateMachineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExplicitEvent {
    Schedule,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    StartCommandCreated,
    StartEventRecorded,
    CancelCommandCreated,
    Fired,
    Canceled,
}

static DEFINITION: LazyLock<StateMachineDefinition<State, ExplicitEvent, TimerMachine>> =
    LazyLock::new(|| {
        StateMachineDefinition::new("Timer", State::Created, &[State::Fired, State::Canceled])
            .add_with(
                State::Created,
                Trigger::Explicit(ExplicitEvent::Schedule),
                State::StartCommandCreated,
                TimerMachine::create_start_command,
            )
            .add_with(
                State::StartCommandCreated,
                Trigger::Explicit(ExplicitEvent::Cancel),
                State::Canceled,
                TimerMachine::cancel_start_command,
            )
            .add_with(
                State::StartCommandCreated,
                Trigger::History(EventType::TimerStarted),
                State::StartEventRecorded,
                TimerMachine::set_initial_command_event_id,
            )
            .add_with(
                State::StartEventRecorded,
                Trigger::History(EventType::TimerFired),
                State::Fired,
                TimerMachine::notify_fired,
            )
            .add_with(
                State::StartEventRecorded,
                Trigger::Explicit(ExplicitEvent::Cancel),
                State::CancelCommandCreated,
                TimerMachine::create_cancel_command,
            )
            .add(
                State::CancelCommandCreated,
                Trigger::History(EventType::TimerCanceled),
                State::Canceled,
            )
            // The timer fired before the cancel command reached the server;
            // the cancellation outcome was already delivered, so the fire is
            // absorbed and the stale cancel command dropped.
            .add_with(
                State::CancelCommandCreated,
                Trigger::History(EventType::TimerFired),
                State::Canceled,
                TimerMachine::drop_stale_cancel_command,
            )
    });

/// Lifecycle of one durable timer.
pub struct TimerMachine {
    state: State,
    current_event: Option<HistoryEvent>,
    timer_id: String,
    fire_after: Duration,
    pending_command: Option<CancellableCommand>,
    initial_command_event_id: Option<i64>,
    completion_callback: CompletionCallback,
    machine_id: u64,
    sink: CommandSink,
}

impl TimerMachine {
    pub fn new(
        timer_id: String,
        fire_after: Duration,
        completion_callback: CompletionCallback,
        sink: CommandSink,
        machine_id: u64,
    ) -> Result<Self, StateMachineError> {
        let mut machine = Self {
            state: DEFINITION.initial_state(),
            current_event: None,
            timer_id,
            fire_after,
            pending_command: None,
            initial_command_event_id: None,
            completion_callback,
            machine_id,
            sink,
        };
        machine.explicit_event(ExplicitEvent::Schedule)?;
        Ok(machine)
    }

    fn create_start_command(&mut self) {
        let command = CancellableCommand::new(
            self.machine_id,
            Command::StartTimer {
                timer_id: self.timer_id.clone(),
                fire_after: self.fire_after,
            },
        );
        self.pending_command = Some(command.clone());
        self.sink.push(command);
    }

    fn set_initial_command_event_id(&mut self) {
        self.initial_command_event_id = self.current_event.as_ref().map(|e| e.event_id);
        self.pending_command = None;
    }

    fn notify_fired(&mut self) {
        (self.completion_callback)(None, None);
    }

    /// The start command was never acknowledged: drop it and deliver the
    /// cancellation immediately.
    fn cancel_start_command(&mut self) {
        if let Some(command) = self.pending_command.take() {
            command.cancel();
        }
        (self.completion_callback)(None, Some(Failure::canceled("timer canceled")));
    }

    /// The timer is recorded on the server: emit a cancel command. The
    /// cancellation outcome is delivered immediately, deterministically,
    /// without waiting for the server ack.
    fn create_cancel_command(&mut self) {
        let started_event_id = self.initial_command_event_id.unwrap_or_default();
        let command = CancellableCommand::new(
            self.machine_id,
            Command::CancelTimer { started_event_id },
        );
        self.pending_command = Some(command.clone());
        self.sink.push(command);
        (self.completion_callback)(None, Some(Failure::canceled("timer canceled")));
    }

    /// The server fired the timer first, so no cancellation event will ever
    /// be recorded for the pending cancel command.
    fn drop_stale_cancel_command(&mut self) {
        if let Some(command) = self.pending_command.take() {
            command.cancel();
        }
    }
}

impl Machine for TimerMachine {
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

impl EntityStateMachine for TimerMachine {
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
        if self.in_final_state() {
            return Ok(());
        }
        self.explicit_event(ExplicitEvent::Cancel)
    }
}
