//! Awaiting a run's result
//!
//! Long-polls history until the run's closing event arrives and decodes it
//! into a result or a typed error. A run that continues as new closes with a
//! pointer to its successor; the wait transparently follows the chain until
//! a genuinely final close event shows up.

use std::time::{Duration, Instant};

use tracing::debug;
use windlass_proto::{EventAttributes, Failure, GetHistoryRequest, Payload, WorkflowExecution};

use crate::service::{RpcError, WorkflowService};

/// How waiting for a workflow result can end without a result.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowResultError {
    /// The workflow ran and failed
    #[error("workflow execution failed: {0}")]
    Failed(Failure),

    /// The workflow execution was canceled
    #[error("workflow execution canceled")]
    Canceled,

    /// The workflow execution was terminated
    #[error("workflow execution terminated: {reason}")]
    Terminated { reason: String },

    /// The workflow execution itself timed out on the server
    #[error("workflow execution timed out")]
    ExecutionTimedOut,

    /// The caller's own wait deadline elapsed before the run closed
    #[error("timed out waiting for workflow result")]
    WaitTimedOut,

    /// Transport failure other than a retryable long-poll expiry
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Wait until `execution` (or the run it continues into) closes, bounded by
/// `timeout`.
///
/// A transport-level `DeadlineExceeded` is only surfaced as a timeout when
/// the caller's own deadline has actually elapsed; otherwise it is the
/// server's long-poll window expiring and the poll is reissued.
pub async fn get_workflow_execution_result(
    service: &dyn WorkflowService,
    execution: &WorkflowExecution,
    timeout: Duration,
) -> Result<Payload, WorkflowResultError> {
    let deadline = Instant::now() + timeout;
    let mut target = execution.clone();
    let mut page_token: Vec<u8> = Vec::new();

    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return Err(WorkflowResultError::WaitTimedOut);
        };
        if remaining.is_zero() {
            return Err(WorkflowResultError::WaitTimedOut);
        }

        let request = GetHistoryRequest {
            execution: target.clone(),
            next_page_token: page_token.clone(),
            wait_new_event: true,
        };
        let response = match service.get_workflow_execution_history(request, remaining).await {
            Ok(response) => response,
            Err(RpcError::DeadlineExceeded) => {
                if Instant::now() >= deadline {
                    return Err(WorkflowResultError::WaitTimedOut);
                }
                // Server-side long-poll window expired before our deadline;
                // reissue the poll
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        page_token = response.next_page_token;
        let Some(close) = response.events.iter().find(|e| e.is_workflow_close_event()) else {
            continue;
        };

        match &close.attributes {
            EventAttributes::WorkflowExecutionCompleted { result } => return Ok(result.clone()),
            EventAttributes::WorkflowExecutionFailed { failure } => {
                return Err(WorkflowResultError::Failed(failure.clone()))
            }
            EventAttributes::WorkflowExecutionCanceled => {
                return Err(WorkflowResultError::Canceled)
            }
            EventAttributes::WorkflowExecutionTerminated { reason } => {
                return Err(WorkflowResultError::Terminated {
                    reason: reason.clone(),
                })
            }
            EventAttributes::WorkflowExecutionTimedOut => {
                return Err(WorkflowResultError::ExecutionTimedOut)
            }
            EventAttributes::WorkflowExecutionContinuedAsNew {
                new_execution_run_id,
                ..
            } => {
                debug!(
                    workflow_id = %target.workflow_id,
                    from_run = %target.run_id,
                    to_run = %new_execution_run_id,
                    "run continued as new, following the chain"
                );
                target.run_id = new_execution_run_id.clone();
                page_token.clear();
            }
            _ => unreachable!("is_workflow_close_event matched a non-close event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{PollActivityTaskRequest, PollWorkflowTaskRequest};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use windlass_proto::{
        Command, GetHistoryResponse, HistoryEvent, PollActivityTaskResponse,
        PollWorkflowTaskResponse,
    };

    /// History service stub that replays scripted responses and records the
    /// requests it saw.
    struct ScriptedHistory {
        responses: Mutex<Vec<Result<GetHistoryResponse, RpcError>>>,
        requests: Mutex<Vec<GetHistoryRequest>>,
    }

    impl ScriptedHistory {
        fn new(responses: Vec<Result<GetHistoryResponse, RpcError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WorkflowService for ScriptedHistory {
        async fn poll_workflow_task(
            &self,
            _request: PollWorkflowTaskRequest,
        ) -> Result<Option<PollWorkflowTaskResponse>, RpcError> {
            unimplemented!("not used in result tests")
        }

        async fn poll_activity_task(
            &self,
            _request: PollActivityTaskRequest,
        ) -> Result<Option<PollActivityTaskResponse>, RpcError> {
            unimplemented!("not used in result tests")
        }

        async fn get_workflow_execution_history(
            &self,
            request: GetHistoryRequest,
            _deadline: Duration,
        ) -> Result<GetHistoryResponse, RpcError> {
            self.requests.lock().push(request);
            self.responses.lock().remove(0)
        }

        async fn respond_workflow_task_completed(
            &self,
            _task_token: Vec<u8>,
            _commands: Vec<Command>,
        ) -> Result<(), RpcError> {
            Ok(())
        }
    }

    fn page(events: Vec<HistoryEvent>, token: &[u8]) -> Result<GetHistoryResponse, RpcError> {
        Ok(GetHistoryResponse {
            events,
            next_page_token: token.to_vec(),
        })
    }

    fn completed(event_id: i64, result: Payload) -> HistoryEvent {
        HistoryEvent::new(event_id, EventAttributes::WorkflowExecutionCompleted { result })
    }

    #[tokio::test]
    async fn test_completed_run_yields_result() {
        let service = ScriptedHistory::new(vec![page(vec![completed(9, json!("done"))], b"")]);
        let result = get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(result, json!("done"));
    }

    #[tokio::test]
    async fn test_empty_pages_continue_with_token() {
        let service = ScriptedHistory::new(vec![
            page(vec![], b"t1"),
            page(vec![completed(9, json!(1))], b""),
        ]);
        get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let requests = service.requests.lock();
        assert!(requests[0].next_page_token.is_empty());
        assert_eq!(requests[1].next_page_token, b"t1");
    }

    #[tokio::test]
    async fn test_continue_as_new_follows_chain() {
        let continued = HistoryEvent::new(
            11,
            EventAttributes::WorkflowExecutionContinuedAsNew {
                new_execution_run_id: "run-2".to_string(),
                workflow_type: "order".to_string(),
                input: json!(null),
            },
        );
        let service = ScriptedHistory::new(vec![
            page(vec![continued], b"stale-token"),
            page(vec![completed(6, json!("final"))], b""),
        ]);

        let result = get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(result, json!("final"));

        let requests = service.requests.lock();
        assert_eq!(requests[1].execution.run_id, "run-2");
        // Pagination restarts on the new run
        assert!(requests[1].next_page_token.is_empty());
    }

    #[tokio::test]
    async fn test_spurious_deadline_exceeded_is_retried() {
        let service = ScriptedHistory::new(vec![
            Err(RpcError::DeadlineExceeded),
            page(vec![completed(9, json!("ok"))], b""),
        ]);
        let result = get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(service.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_deadline_times_out() {
        let service = ScriptedHistory::new(vec![]);
        let result = get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::ZERO,
        )
        .await;
        assert!(matches!(result, Err(WorkflowResultError::WaitTimedOut)));
        // The deadline was already spent, no poll was issued
        assert!(service.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_surfaces_typed_error() {
        let failed = HistoryEvent::new(
            9,
            EventAttributes::WorkflowExecutionFailed {
                failure: Failure::application("boom", "OrderError"),
            },
        );
        let service = ScriptedHistory::new(vec![page(vec![failed], b"")]);
        let result = get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(
            result,
            Err(WorkflowResultError::Failed(failure)) if failure.failure_type == "OrderError"
        ));
    }

    #[tokio::test]
    async fn test_terminated_run_carries_reason() {
        let terminated = HistoryEvent::new(
            9,
            EventAttributes::WorkflowExecutionTerminated {
                reason: "operator".to_string(),
            },
        );
        let service = ScriptedHistory::new(vec![page(vec![terminated], b"")]);
        let result = get_workflow_execution_result(
            &service,
            &WorkflowExecution::new("wf", "run-1"),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(
            result,
            Err(WorkflowResultError::Terminated { ref reason }) if reason == "operator"
        ));
    }
}
