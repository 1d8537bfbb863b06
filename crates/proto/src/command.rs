//! Commands produced by workflow code
//!
//! A command is an intent the workflow emitted during one workflow task
//! ("schedule this activity", "signal that workflow"). Commands are created
//! and owned by exactly one entity state machine, transferred to the outbound
//! command list of the current workflow task, and immutable once sent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::execution::{Failure, Payload, WorkflowExecution};

/// Command type tag, used for dispatch and matching against history events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    ScheduleActivity,
    RequestCancelActivity,
    StartTimer,
    CancelTimer,
    SignalExternalWorkflow,
    ContinueAsNewWorkflow,
    RecordMarker,
    CompleteWorkflow,
    FailWorkflow,
    CancelWorkflow,
}

/// An intent produced by workflow code during one workflow task.
///
/// Closed variant set: the state-machine definition tables dispatch on
/// [`CommandType`], so every command kind the runtime understands is listed
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Schedule an activity on a task queue
    ScheduleActivity {
        activity_id: String,
        activity_type: String,
        task_queue: String,
        input: Payload,
        #[serde(with = "duration_millis")]
        start_to_close_timeout: Duration,
    },

    /// Request cancellation of a previously scheduled activity
    RequestCancelActivity {
        /// Event id of the activity's scheduling event
        scheduled_event_id: i64,
    },

    /// Start a durable timer
    StartTimer {
        timer_id: String,
        #[serde(with = "duration_millis")]
        fire_after: Duration,
    },

    /// Cancel a previously started timer
    CancelTimer {
        /// Event id of the timer's start event
        started_event_id: i64,
    },

    /// Signal an external workflow execution
    SignalExternalWorkflow {
        execution: WorkflowExecution,
        signal_name: String,
        input: Payload,
    },

    /// Close this run and immediately start a new one continuing the same
    /// logical execution
    ContinueAsNewWorkflow {
        workflow_type: String,
        input: Payload,
    },

    /// Record a marker in history (local activity results)
    RecordMarker {
        marker_name: String,
        details: Payload,
    },

    /// Complete the workflow execution successfully
    CompleteWorkflow { result: Payload },

    /// Fail the workflow execution
    FailWorkflow { failure: Failure },

    /// Cancel the workflow execution
    CancelWorkflow,
}

impl Command {
    /// Type tag of this command
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::ScheduleActivity { .. } => CommandType::ScheduleActivity,
            Self::RequestCancelActivity { .. } => CommandType::RequestCancelActivity,
            Self::StartTimer { .. } => CommandType::StartTimer,
            Self::CancelTimer { .. } => CommandType::CancelTimer,
            Self::SignalExternalWorkflow { .. } => CommandType::SignalExternalWorkflow,
            Self::ContinueAsNewWorkflow { .. } => CommandType::ContinueAsNewWorkflow,
            Self::RecordMarker { .. } => CommandType::RecordMarker,
            Self::CompleteWorkflow { .. } => CommandType::CompleteWorkflow,
            Self::FailWorkflow { .. } => CommandType::FailWorkflow,
            Self::CancelWorkflow => CommandType::CancelWorkflow,
        }
    }

    /// Whether this command closes the workflow run
    pub fn is_close_command(&self) -> bool {
        matches!(
            self.command_type(),
            CommandType::ContinueAsNewWorkflow
                | CommandType::CompleteWorkflow
                | CommandType::FailWorkflow
                | CommandType::CancelWorkflow
        )
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_type_tag() {
        let command = Command::SignalExternalWorkflow {
            execution: WorkflowExecution::new("wf", "run"),
            signal_name: "unblock".to_string(),
            input: json!(null),
        };
        assert_eq!(command.command_type(), CommandType::SignalExternalWorkflow);
        assert!(!command.is_close_command());
    }

    #[test]
    fn test_close_commands() {
        assert!(Command::CompleteWorkflow { result: json!(1) }.is_close_command());
        assert!(Command::ContinueAsNewWorkflow {
            workflow_type: "wf".to_string(),
            input: json!(null),
        }
        .is_close_command());
        assert!(Command::CancelWorkflow.is_close_command());
        assert!(!Command::StartTimer {
            timer_id: "t".to_string(),
            fire_after: Duration::from_secs(1),
        }
        .is_close_command());
    }

    #[test]
    fn test_command_serialization() {
        let command = Command::StartTimer {
            timer_id: "t-1".to_string(),
            fire_after: Duration::from_millis(1500),
        };

        let json = serde_json::to_string(&command).unwrap();
        assert!(json.contains("\"type\":\"start_timer\""));
        assert!(json.contains("1500"));

        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(command, parsed);
    }
}
