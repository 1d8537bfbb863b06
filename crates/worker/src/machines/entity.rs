//! Generic state-machine engine
//!
//! [`Machine`] is the engine every entity machine plugs into: a concrete
//! machine supplies its definition table and state storage, and gets the
//! trigger application logic (including the loud failure on unmatched
//! triggers) for free. [`EntityStateMachine`] is the object-safe view the
//! replay driver stores its heterogeneous machine set behind.

use windlass_proto::{Failure, HistoryEvent, Payload};

use super::definition::{StateMachineDefinition, Trigger};
use super::StateMachineError;

/// Completion callback invoked when an entity machine reaches an outcome.
///
/// The first argument carries a result payload where the interaction has one
/// (activity result, local activity result); the second carries the failure,
/// `None` on success.
pub type CompletionCallback = Box<dyn FnMut(Option<Payload>, Option<Failure>) + Send>;

/// Generic engine for one entity state machine.
///
/// Implementors provide the definition table and state accessors; the
/// provided methods apply triggers through the table. Machines whose edge
/// actions read history-event attributes also override
/// [`set_current_event`](Machine::set_current_event) to stash the event for
/// the duration of the action.
pub trait Machine: Sized + 'static {
    type State: Copy + Eq + std::hash::Hash + std::fmt::Debug + 'static;
    type Explicit: Copy + Eq + std::hash::Hash + std::fmt::Debug + 'static;

    /// The shared definition table for this machine kind
    fn definition() -> &'static StateMachineDefinition<Self::State, Self::Explicit, Self>;

    fn state(&self) -> Self::State;

    fn set_state(&mut self, state: Self::State);

    /// Stash/clear the event currently being applied, for edge actions that
    /// read its attributes. Default is a no-op for machines that don't.
    fn set_current_event(&mut self, _event: Option<HistoryEvent>) {}

    /// Apply a workflow-code-originated trigger synchronously.
    fn explicit_event(&mut self, explicit: Self::Explicit) -> Result<(), StateMachineError> {
        let transition = Self::definition().lookup(self.state(), Trigger::Explicit(explicit))?;
        let action = transition.action;
        self.set_state(transition.target);
        if let Some(action) = action {
            action(self);
        }
        Ok(())
    }

    /// Apply a trigger derived from a history event's type.
    fn apply_history_event(&mut self, event: &HistoryEvent) -> Result<(), StateMachineError> {
        let transition =
            Self::definition().lookup(self.state(), Trigger::History(event.event_type()))?;
        let action = transition.action;
        let target = transition.target;
        self.set_current_event(Some(event.clone()));
        self.set_state(target);
        if let Some(action) = action {
            action(self);
        }
        self.set_current_event(None);
        Ok(())
    }

    /// True once the current state is one of the definition's terminal states.
    fn in_final_state(&self) -> bool {
        Self::definition().is_terminal(self.state())
    }
}

/// Object-safe view of one entity state machine, as stored by the replay
/// driver.
pub trait EntityStateMachine: Send {
    /// Definition name, for diagnostics
    fn name(&self) -> &'static str;

    /// Apply a history event
    fn handle_history_event(&mut self, event: &HistoryEvent) -> Result<(), StateMachineError>;

    /// True once the machine reached a terminal state and can be dropped from
    /// the active set
    fn is_final_state(&self) -> bool;

    /// Deterministically cancel the in-flight interaction.
    ///
    /// Cancelling an already-terminal machine is a no-op: it produces no
    /// additional command and does not fail.
    fn cancel(&mut self) -> Result<(), StateMachineError>;
}
