//! Declarative state-machine transition tables
//!
//! A definition binds a name, an initial state, a set of terminal states and
//! a table of edges `(from_state, trigger) -> (to_state, action?)`. Triggers
//! are either explicit (raised by workflow-side code) or derived from a
//! history event type observed during replay. The table makes the legal
//! transition set explicit and auditable.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use windlass_proto::EventType;

use super::StateMachineError;

/// A state-machine input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger<E> {
    /// Raised by workflow-authored code (e.g. "schedule this command")
    Explicit(E),
    /// Derived from a history event observed during replay
    History(EventType),
}

/// One edge of the transition table.
pub struct Transition<S, M> {
    /// State the machine moves to
    pub target: S,
    /// Side effect bound to the edge (emit a command, invoke a completion
    /// callback, cancel a pending command)
    pub action: Option<fn(&mut M)>,
}

/// Transition table shared by every instance of one machine kind.
///
/// Definitions are built once (in a `LazyLock` static) and looked up on every
/// trigger. Adding a duplicate edge is a programming error and panics at
/// definition-build time.
pub struct StateMachineDefinition<S, E, M> {
    name: &'static str,
    initial_state: S,
    terminal_states: Vec<S>,
    transitions: HashMap<(S, Trigger<E>), Transition<S, M>>,
}

impl<S, E, M> StateMachineDefinition<S, E, M>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn new(name: &'static str, initial_state: S, terminal_states: &[S]) -> Self {
        Self {
            name,
            initial_state,
            terminal_states: terminal_states.to_vec(),
            transitions: HashMap::new(),
        }
    }

    /// Add an edge with no action.
    pub fn add(self, from: S, trigger: Trigger<E>, to: S) -> Self {
        self.insert(from, trigger, to, None)
    }

    /// Add an edge with a side-effecting action.
    pub fn add_with(self, from: S, trigger: Trigger<E>, to: S, action: fn(&mut M)) -> Self {
        self.insert(from, trigger, to, Some(action))
    }

    fn insert(mut self, from: S, trigger: Trigger<E>, to: S, action: Option<fn(&mut M)>) -> Self {
        let replaced = self.transitions.insert(
            (from, trigger),
            Transition { target: to, action },
        );
        assert!(
            replaced.is_none(),
            "{}: duplicate transition from {:?} on {:?}",
            self.name,
            from,
            trigger
        );
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn initial_state(&self) -> S {
        self.initial_state
    }

    pub fn is_terminal(&self, state: S) -> bool {
        self.terminal_states.contains(&state)
    }

    /// Look up the edge for `(state, trigger)`.
    ///
    /// An unmatched trigger is a determinism/protocol violation and returns
    /// [`StateMachineError::UnexpectedTransition`].
    pub fn lookup(
        &self,
        state: S,
        trigger: Trigger<E>,
    ) -> Result<&Transition<S, M>, StateMachineError> {
        self.transitions.get(&(state, trigger)).ok_or_else(|| {
            StateMachineError::UnexpectedTransition {
                machine: self.name,
                state: format!("{state:?}"),
                trigger: format!("{trigger:?}"),
            }
        })
    }
}
