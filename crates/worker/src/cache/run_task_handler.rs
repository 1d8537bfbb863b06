//! Cached, paused workflow run
//!
//! A [`WorkflowRunTaskHandler`] is what the sticky cache actually stores: the
//! replay driver for one run plus the bookkeeping needed to resume it from a
//! sticky (incremental) workflow task. Closing it releases whatever the
//! embedding runtime suspended for this run, exactly once.

use tracing::instrument;
use windlass_proto::{Command, PollWorkflowTaskResponse, WorkflowExecution};

use crate::machines::{StateMachineError, WorkflowStateMachines};

/// Hook invoked when the cached run is released.
pub type CloseHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

pub struct WorkflowRunTaskHandler {
    execution: WorkflowExecution,
    machines: WorkflowStateMachines,
    close_hook: Option<CloseHook>,
    closed: bool,
}

impl WorkflowRunTaskHandler {
    pub fn new(execution: WorkflowExecution) -> Self {
        Self {
            execution,
            machines: WorkflowStateMachines::new(),
            close_hook: None,
            closed: false,
        }
    }

    /// Attach a hook to run when this handler is closed.
    pub fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.close_hook = Some(hook);
        self
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    /// Replay driver for this run, for raising workflow intents.
    pub fn machines_mut(&mut self) -> &mut WorkflowStateMachines {
        &mut self.machines
    }

    /// Id of the last history event this run has applied.
    pub fn last_handled_event_id(&self) -> i64 {
        self.machines.last_handled_event_id()
    }

    /// Feed one workflow task's history into the run and drain the commands
    /// it produced.
    ///
    /// Sticky tasks may re-deliver a tail of already-applied events; those
    /// are skipped. Everything past the watermark is applied in order, and a
    /// gap or regression inside the new portion is a determinism violation.
    #[instrument(skip_all, fields(workflow_id = %self.execution.workflow_id, run_id = %self.execution.run_id))]
    pub fn handle_workflow_task(
        &mut self,
        task: &PollWorkflowTaskResponse,
    ) -> Result<Vec<Command>, StateMachineError> {
        let watermark = self.machines.last_handled_event_id();
        for event in task.history.iter().filter(|e| e.event_id > watermark) {
            self.machines.handle_event(event)?;
        }
        Ok(self.machines.take_commands())
    }

    /// Release the suspended run. Idempotent; only the first call runs the
    /// close hook.
    pub fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.close_hook.take() {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
