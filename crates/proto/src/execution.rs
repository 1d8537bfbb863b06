//! Run identity and payload records

use serde::{Deserialize, Serialize};

/// Opaque payload carried by commands, events and results.
///
/// The worker runtime never inspects payload contents; (de)serialization to
/// user types is the job of an external data converter.
pub type Payload = serde_json::Value;

/// Identity of one workflow run.
///
/// A logical workflow execution may span multiple runs via continue-as-new;
/// each run has its own `run_id` while the `workflow_id` stays stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl std::fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.workflow_id, self.run_id)
    }
}

/// A failure recorded by the server or synthesized by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Human-readable message
    pub message: String,

    /// Failure classification (e.g. "CanceledFailure", "ApplicationFailure")
    pub failure_type: String,

    /// Chained cause, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Failure>>,
}

impl Failure {
    pub fn application(message: impl Into<String>, failure_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_type: failure_type.into(),
            cause: None,
        }
    }

    /// A cancellation failure, used when a command is cancelled before the
    /// server ever acknowledged it.
    pub fn canceled(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_type: "CanceledFailure".to_string(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.failure_type == "CanceledFailure"
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.failure_type, self.message)
    }
}
