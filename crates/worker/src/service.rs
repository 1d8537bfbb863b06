//! Transport seam to the orchestration server
//!
//! The worker consumes the server through this trait; gRPC stubs, retries at
//! the channel level and authentication are external collaborators.

use std::time::Duration;

use async_trait::async_trait;
use windlass_proto::{
    GetHistoryRequest, GetHistoryResponse, PollActivityTaskResponse, PollWorkflowTaskResponse,
    TaskQueueKind,
};

use windlass_proto::Command;

/// Transport-level errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The call's deadline elapsed on the transport.
    ///
    /// For long polls this is frequently spurious (the underlying channel
    /// expired before the caller's own deadline did) and must be retried
    /// rather than surfaced as a timeout.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Server or connection failure
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The server rejected the request
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Workflow task poll request.
#[derive(Debug, Clone)]
pub struct PollWorkflowTaskRequest {
    pub task_queue: String,
    pub kind: TaskQueueKind,
    pub identity: String,
}

/// Activity task poll request.
#[derive(Debug, Clone)]
pub struct PollActivityTaskRequest {
    pub task_queue: String,
    pub identity: String,
}

/// RPC surface the runtime needs from the orchestration server.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Long-poll for a workflow task. `Ok(None)` means the poll came back
    /// empty.
    async fn poll_workflow_task(
        &self,
        request: PollWorkflowTaskRequest,
    ) -> Result<Option<PollWorkflowTaskResponse>, RpcError>;

    /// Long-poll for an activity task.
    async fn poll_activity_task(
        &self,
        request: PollActivityTaskRequest,
    ) -> Result<Option<PollActivityTaskResponse>, RpcError>;

    /// Long-poll a page of history; used to await a run's closing event.
    /// `deadline` bounds this single call, not the caller's overall wait.
    async fn get_workflow_execution_history(
        &self,
        request: GetHistoryRequest,
        deadline: Duration,
    ) -> Result<GetHistoryResponse, RpcError>;

    /// Respond to a workflow task with the commands the run produced.
    async fn respond_workflow_task_completed(
        &self,
        task_token: Vec<u8>,
        commands: Vec<Command>,
    ) -> Result<(), RpcError>;
}
