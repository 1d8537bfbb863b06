//! Signal-external-workflow entity state machine

use std::sync::LazyLock;

use windlass_proto::{Command, EventAttributes, EventType, Failure, HistoryEvent, Payload};

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
    SignalExternalCommandCreated,
    SignalExternalCommandRecorded,
    Signaled,
    Failed,
    Canceled,
}

static DEFINITION: LazyLock<
    StateMachineDefinition<State, ExplicitEvent, SignalExternalMachine>,
> = LazyLock::new(|| {
    StateMachineDefinition::new(
        "SignalExternal",
        State::Created,
        &[State::Signaled, State::Failed, State::Canceled],
    )
    .add_with(
        State::Created,
        Trigger::Explicit(ExplicitEvent::Schedule),
        State::SignalExternalCommandCreated,
        SignalExternalMachine::create_signal_command,
    )
    .add_with(
        State::SignalExternalCommandCreated,
        Trigger::Explicit(ExplicitEvent::Cancel),
        State::Canceled,
        SignalExternalMachine::cancel_signal_command,
    )
    .add_with(
        State::SignalExternalCommandCreated,
        Trigger::History(EventType::SignalExternalWorkflowInitiated),
        State::SignalExternalCommandRecorded,
        SignalExternalMachine::set_initial_command_event_id,
    )
    // Cancel after the command is recorded is a no-op: the server outcome
    // decides the terminal state.
    .add(
        State::SignalExternalCommandRecorded,
        Trigger::Explicit(ExplicitEvent::Cancel),
        State::SignalExternalCommandRecorded,
    )
    .add_with(
        State::SignalExternalCommandRecorded,
        Trigger::History(EventType::ExternalWorkflowSignaled),
        State::Signaled,
        SignalExternalMachine::notify_completed,
    )
    .add_with(
        State::SignalExternalCommandRecorded,
        Trigger::History(EventType::SignalExternalWorkflowFailed),
        State::Failed,
        SignalExternalMachine::notify_failed,
    )
});

/// Lifecycle of one signal sent to an external workflow execution.
pub struct SignalExternalMachine {
    state: State,
    current_event: Option<HistoryEvent>,
    execution: windlass_proto::WorkflowExecution,
    /// Attributes for the outbound command; dropped once the command is built
    signal_attributes: Option<(String, Payload)>,
    pending_command: Option<CancellableCommand>,
    initial_command_event_id: Option<i64>,
    completion_callback: CompletionCallback,
    machine_id: u64,
    sink: CommandSink,
}

impl SignalExternalMachine {
    /// Create the machine and immediately emit the signal command.
    pub fn new(
        execution: windlass_proto::WorkflowExecution,
        signal_name: String,
        input: Payload,
        completion_callback: CompletionCallback,
        sink: CommandSink,
        machine_id: u64,
    ) -> Result<Self, StateMachineError> {
        let mut machine = Self {
            state: DEFINITION.initial_state(),
            current_event: None,
            execution,
            signal_attributes: Some((signal_name, input)),
            pending_command: None,
            initial_command_event_id: None,
            completion_callback,
            machine_id,
            sink,
        };
        machine.explicit_event(ExplicitEvent::Schedule)?;
        Ok(machine)
    }

    fn create_signal_command(&mut self) {
        // Attributes are only present before the command is built
        let (signal_name, input) = self
            .signal_attributes
            .take()
            .unwrap_or_else(|| (String::new(), Payload::Null));
        let command = CancellableCommand::new(
            self.machine_id,
            Command::SignalExternalWorkflow {
                execution: self.execution.clone(),
                signal_name,
                input,
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
        (self.completion_callback)(None, None);
    }

    fn notify_failed(&mut self) {
        let cause = match self.current_event.as_ref().map(|e| &e.attributes) {
            Some(EventAttributes::SignalExternalWorkflowFailed { cause, .. }) => cause.clone(),
            _ => "unknown".to_string(),
        };
        let failure = Failure::application(
            format!(
                "signal external workflow failed with {}. workflow_id={}, run_id={}",
                cause, self.execution.workflow_id, self.execution.run_id
            ),
            cause,
        );
        (self.completion_callback)(None, Some(failure));
    }

    /// The underlying command was never acknowledged by the server: drop it
    /// and synthesize an immediate cancellation outcome.
    fn cancel_signal_command(&mut self) {
        if let Some(command) = self.pending_command.take() {
            command.cancel();
        }
        let failure = Failure::canceled("signal external workflow execution canceled");
        (self.completion_callback)(None, Some(failure));
    }

    #[cfg(test)]
    pub(crate) fn state_for_test(&self) -> State {
        self.state
    }
}

impl Machine for SignalExternalMachine {
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

impl EntityStateMachine for SignalExternalMachine {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use windlass_proto::WorkflowExecution;

    struct Harness {
        machine: SignalExternalMachine,
        sink: CommandSink,
        completions: Arc<parking_lot::Mutex<Vec<Option<Failure>>>>,
    }

    fn harness() -> Harness {
        let sink = CommandSink::new();
        let completions: Arc<parking_lot::Mutex<Vec<Option<Failure>>>> = Arc::default();
        let recorded = completions.clone();
        let machine = SignalExternalMachine::new(
            WorkflowExecution::new("target-wf", "target-run"),
            "unblock".to_string(),
            json!({"k": "v"}),
            Box::new(move |_payload, failure| recorded.lock().push(failure)),
            sink.clone(),
            1,
        )
        .unwrap();
        Harness {
            machine,
            sink,
            completions,
        }
    }

    fn initiated_event(event_id: i64) -> HistoryEvent {
        HistoryEvent::new(
            event_id,
            EventAttributes::SignalExternalWorkflowInitiated {
                execution: WorkflowExecution::new("target-wf", "target-run"),
                signal_name: "unblock".to_string(),
            },
        )
    }

    #[test]
    fn test_schedule_emits_exactly_one_command() {
        let h = harness();
        assert_eq!(h.machine.state_for_test(), State::SignalExternalCommandCreated);
        let commands = h.sink.take_command_snapshot();
        assert_eq!(commands.len(), 1);
        assert!(matches!(
            commands[0],
            Command::SignalExternalWorkflow { ref signal_name, .. } if signal_name == "unblock"
        ));
    }

    #[test]
    fn test_signaled_path_invokes_callback_without_failure() {
        let mut h = harness();
        h.machine.handle_history_event(&initiated_event(4)).unwrap();
        assert_eq!(
            h.machine.state_for_test(),
            State::SignalExternalCommandRecorded
        );
        assert_eq!(h.machine.initial_command_event_id, Some(4));

        h.machine
            .handle_history_event(&HistoryEvent::new(
                7,
                EventAttributes::ExternalWorkflowSignaled {
                    initiated_event_id: 4,
                },
            ))
            .unwrap();

        assert_eq!(h.machine.state_for_test(), State::Signaled);
        assert!(h.machine.is_final_state());
        assert_eq!(h.completions.lock().as_slice(), &[None]);
    }

    #[test]
    fn test_failed_path_carries_cause() {
        let mut h = harness();
        h.machine.handle_history_event(&initiated_event(4)).unwrap();
        h.machine
            .handle_history_event(&HistoryEvent::new(
                7,
                EventAttributes::SignalExternalWorkflowFailed {
                    initiated_event_id: 4,
                    cause: "NOT_FOUND".to_string(),
                },
            ))
            .unwrap();

        assert_eq!(h.machine.state_for_test(), State::Failed);
        let completions = h.completions.lock();
        let failure = completions[0].as_ref().unwrap();
        assert_eq!(failure.failure_type, "NOT_FOUND");
    }

    #[test]
    fn test_cancel_before_recorded_synthesizes_immediate_failure() {
        let mut h = harness();
        h.machine.cancel().unwrap();

        assert_eq!(h.machine.state_for_test(), State::Canceled);
        // The pending command was dropped before sending
        assert!(h.sink.take_command_snapshot().is_empty());
        let completions = h.completions.lock();
        assert!(completions[0].as_ref().unwrap().is_canceled());
    }

    #[test]
    fn test_cancel_after_recorded_waits_for_server_outcome() {
        let mut h = harness();
        h.machine.handle_history_event(&initiated_event(4)).unwrap();
        h.machine.cancel().unwrap();

        // No synthesized outcome, machine still waiting
        assert_eq!(
            h.machine.state_for_test(),
            State::SignalExternalCommandRecorded
        );
        assert!(h.completions.lock().is_empty());
    }

    #[test]
    fn test_double_cancel_on_terminal_machine_is_noop() {
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let sink = CommandSink::new();
        let mut machine = SignalExternalMachine::new(
            WorkflowExecution::new("wf", "run"),
            "s".to_string(),
            json!(null),
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            sink.clone(),
            1,
        )
        .unwrap();

        machine.cancel().unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // Second cancel: no new command, no new callback, no error
        machine.cancel().unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(sink.take_command_snapshot().is_empty());
    }

    #[test]
    fn test_unexpected_event_fails_loudly() {
        let mut h = harness();
        let result = h.machine.handle_history_event(&HistoryEvent::new(
            3,
            EventAttributes::TimerFired {
                started_event_id: 1,
                timer_id: "t".to_string(),
            },
        ));
        assert!(matches!(
            result,
            Err(StateMachineError::UnexpectedTransition { machine: "SignalExternal", .. })
        ));
    }
}
