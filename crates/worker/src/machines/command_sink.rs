//! Outbound command tracking
//!
//! Commands emitted by entity machines are held as [`CancellableCommand`]s in
//! a shared FIFO sink. A machine keeps a handle to its own pending command so
//! it can cancel it before the server ever acknowledges it; the replay driver
//! consumes the FIFO in order as the matching command events appear in
//! history, which is the determinism check.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use windlass_proto::{Command, CommandType};

/// A command emitted by an entity machine, cancellable until it is matched
/// against history.
#[derive(Clone)]
pub struct CancellableCommand {
    machine_id: u64,
    inner: Arc<Mutex<Option<Command>>>,
}

impl CancellableCommand {
    pub fn new(machine_id: u64, command: Command) -> Self {
        Self {
            machine_id,
            inner: Arc::new(Mutex::new(Some(command))),
        }
    }

    /// Id of the machine that owns this command
    pub fn machine_id(&self) -> u64 {
        self.machine_id
    }

    /// Drop the command before it is sent. Idempotent.
    pub fn cancel(&self) {
        *self.inner.lock() = None;
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.lock().is_none()
    }

    pub fn command_type(&self) -> Option<CommandType> {
        self.inner.lock().as_ref().map(Command::command_type)
    }

    /// Snapshot of the command, `None` once cancelled
    pub fn command(&self) -> Option<Command> {
        self.inner.lock().clone()
    }
}

impl std::fmt::Debug for CancellableCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellableCommand")
            .field("machine_id", &self.machine_id)
            .field("command_type", &self.command_type())
            .finish()
    }
}

/// Shared FIFO of pending commands for one run.
///
/// Machines push; the replay driver matches command events against the front
/// and drains command snapshots for the outbound completion.
#[derive(Clone, Default)]
pub struct CommandSink {
    queue: Arc<Mutex<VecDeque<CancellableCommand>>>,
}

impl CommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: CancellableCommand) {
        self.queue.lock().push_back(command);
    }

    /// Oldest pending command that has not been cancelled, removing any
    /// cancelled entries in front of it.
    pub fn pop_matching_front(&self) -> Option<CancellableCommand> {
        let mut queue = self.queue.lock();
        while let Some(front) = queue.front() {
            if front.is_canceled() {
                queue.pop_front();
                continue;
            }
            return queue.pop_front();
        }
        None
    }

    /// Snapshot the non-cancelled pending commands for the current workflow
    /// task completion. Cancelled entries are discarded; live entries stay
    /// queued for matching against the next task's history.
    pub fn take_command_snapshot(&self) -> Vec<Command> {
        let mut queue = self.queue.lock();
        queue.retain(|c| !c.is_canceled());
        queue.iter().filter_map(|c| c.command()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.lock().iter().filter(|c| !c.is_canceled()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_command() -> Command {
        Command::CompleteWorkflow { result: json!(1) }
    }

    #[test]
    fn test_cancel_drops_command() {
        let command = CancellableCommand::new(1, complete_command());
        assert!(!command.is_canceled());
        command.cancel();
        assert!(command.is_canceled());
        assert!(command.command().is_none());
        // Idempotent
        command.cancel();
        assert!(command.is_canceled());
    }

    #[test]
    fn test_snapshot_skips_cancelled() {
        let sink = CommandSink::new();
        let kept = CancellableCommand::new(1, complete_command());
        let dropped = CancellableCommand::new(2, Command::CancelWorkflow);
        sink.push(dropped.clone());
        sink.push(kept.clone());
        dropped.cancel();

        let commands = sink.take_command_snapshot();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type(), CommandType::CompleteWorkflow);
        assert_eq!(sink.pending_len(), 1);
    }

    #[test]
    fn test_pop_matching_front_skips_cancelled() {
        let sink = CommandSink::new();
        let first = CancellableCommand::new(1, Command::CancelWorkflow);
        let second = CancellableCommand::new(2, complete_command());
        sink.push(first.clone());
        sink.push(second);
        first.cancel();

        let popped = sink.pop_matching_front().unwrap();
        assert_eq!(popped.machine_id(), 2);
        assert!(sink.pop_matching_front().is_none());
    }
}
