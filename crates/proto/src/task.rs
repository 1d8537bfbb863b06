//! Poll request/response records
//!
//! These mirror what the orchestration server returns from a long poll. The
//! transport itself is an external collaborator; the worker only consumes
//! these shapes.

use serde::{Deserialize, Serialize};

use crate::event::HistoryEvent;
use crate::execution::{Payload, WorkflowExecution};

/// Kind of task queue a poll targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskQueueKind {
    /// The worker's shared, normal task queue
    Normal,
    /// The run-specific sticky queue (cached execution expected on this worker)
    Sticky,
}

/// Response to a workflow task poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollWorkflowTaskResponse {
    /// Opaque completion token
    pub task_token: Vec<u8>,

    pub workflow_execution: WorkflowExecution,

    pub workflow_type: String,

    /// New history events for this task. On a full-history delivery this
    /// starts at event id 1.
    pub history: Vec<HistoryEvent>,

    /// Event id of the workflow task started event for the previous task,
    /// 0 if this is the first task of the run
    pub previous_started_event_id: i64,

    /// Event id of this task's started event
    pub started_event_id: i64,

    /// Server hint of how many more tasks are backed up on the sticky queue
    pub backlog_count_hint: i64,
}

impl PollWorkflowTaskResponse {
    /// Whether the server resent the entire history rather than a delta.
    ///
    /// A full-history delivery forces invalidation of any cached execution
    /// for the run.
    pub fn is_full_history(&self) -> bool {
        self.history.first().map(|e| e.event_id) == Some(1)
    }
}

/// Response to an activity task poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollActivityTaskResponse {
    pub task_token: Vec<u8>,
    pub workflow_execution: WorkflowExecution,
    pub activity_id: String,
    pub activity_type: String,
    pub input: Payload,
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// When the server scheduled this task, as unix epoch milliseconds.
    /// Used to report schedule-to-start latency.
    #[serde(default)]
    pub scheduled_at_millis: Option<u64>,
}

/// History long-poll request, used by clients awaiting a run's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetHistoryRequest {
    pub execution: WorkflowExecution,

    /// Pagination token from a previous response; empty for the first page
    pub next_page_token: Vec<u8>,

    /// Only deliver the closing event (long poll blocks until close)
    pub wait_new_event: bool,
}

/// History long-poll response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetHistoryResponse {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Vec<u8>,
}
