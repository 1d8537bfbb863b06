//! History events recorded by the orchestration server
//!
//! Events form the append-only log for a run. They are replayed in strict
//! `event_id` order to rebuild the workflow's in-memory state; the worker
//! never mutates them.

use serde::{Deserialize, Serialize};

use crate::execution::{Failure, Payload, WorkflowExecution};

/// Event type tag.
///
/// Fieldless so it can be used as a trigger key in state-machine transition
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowTaskScheduled,
    WorkflowTaskStarted,
    WorkflowTaskCompleted,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskCancelRequested,
    ActivityTaskCanceled,
    TimerStarted,
    TimerFired,
    TimerCanceled,
    SignalExternalWorkflowInitiated,
    ExternalWorkflowSignaled,
    SignalExternalWorkflowFailed,
    MarkerRecorded,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionCanceled,
    WorkflowExecutionTerminated,
    WorkflowExecutionTimedOut,
    WorkflowExecutionContinuedAsNew,
}

/// Type-specific attributes of one history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        workflow_type: String,
        input: Payload,
    },

    WorkflowTaskScheduled,
    WorkflowTaskStarted,
    WorkflowTaskCompleted,

    ActivityTaskScheduled {
        activity_id: String,
        activity_type: String,
    },
    ActivityTaskStarted {
        scheduled_event_id: i64,
        attempt: u32,
    },
    ActivityTaskCompleted {
        scheduled_event_id: i64,
        result: Payload,
    },
    ActivityTaskFailed {
        scheduled_event_id: i64,
        failure: Failure,
    },
    ActivityTaskCancelRequested {
        scheduled_event_id: i64,
    },
    ActivityTaskCanceled {
        scheduled_event_id: i64,
    },

    TimerStarted {
        timer_id: String,
    },
    TimerFired {
        started_event_id: i64,
        timer_id: String,
    },
    TimerCanceled {
        started_event_id: i64,
    },

    SignalExternalWorkflowInitiated {
        execution: WorkflowExecution,
        signal_name: String,
    },
    ExternalWorkflowSignaled {
        initiated_event_id: i64,
    },
    SignalExternalWorkflowFailed {
        initiated_event_id: i64,
        cause: String,
    },

    MarkerRecorded {
        marker_name: String,
        details: Payload,
    },

    WorkflowExecutionCompleted {
        result: Payload,
    },
    WorkflowExecutionFailed {
        failure: Failure,
    },
    WorkflowExecutionCanceled,
    WorkflowExecutionTerminated {
        reason: String,
    },
    WorkflowExecutionTimedOut,
    WorkflowExecutionContinuedAsNew {
        new_execution_run_id: String,
        workflow_type: String,
        input: Payload,
    },
}

impl EventAttributes {
    /// Type tag of these attributes
    pub fn event_type(&self) -> EventType {
        match self {
            Self::WorkflowExecutionStarted { .. } => EventType::WorkflowExecutionStarted,
            Self::WorkflowTaskScheduled => EventType::WorkflowTaskScheduled,
            Self::WorkflowTaskStarted => EventType::WorkflowTaskStarted,
            Self::WorkflowTaskCompleted => EventType::WorkflowTaskCompleted,
            Self::ActivityTaskScheduled { .. } => EventType::ActivityTaskScheduled,
            Self::ActivityTaskStarted { .. } => EventType::ActivityTaskStarted,
            Self::ActivityTaskCompleted { .. } => EventType::ActivityTaskCompleted,
            Self::ActivityTaskFailed { .. } => EventType::ActivityTaskFailed,
            Self::ActivityTaskCancelRequested { .. } => EventType::ActivityTaskCancelRequested,
            Self::ActivityTaskCanceled { .. } => EventType::ActivityTaskCanceled,
            Self::TimerStarted { .. } => EventType::TimerStarted,
            Self::TimerFired { .. } => EventType::TimerFired,
            Self::TimerCanceled { .. } => EventType::TimerCanceled,
            Self::SignalExternalWorkflowInitiated { .. } => {
                EventType::SignalExternalWorkflowInitiated
            }
            Self::ExternalWorkflowSignaled { .. } => EventType::ExternalWorkflowSignaled,
            Self::SignalExternalWorkflowFailed { .. } => EventType::SignalExternalWorkflowFailed,
            Self::MarkerRecorded { .. } => EventType::MarkerRecorded,
            Self::WorkflowExecutionCompleted { .. } => EventType::WorkflowExecutionCompleted,
            Self::WorkflowExecutionFailed { .. } => EventType::WorkflowExecutionFailed,
            Self::WorkflowExecutionCanceled => EventType::WorkflowExecutionCanceled,
            Self::WorkflowExecutionTerminated { .. } => EventType::WorkflowExecutionTerminated,
            Self::WorkflowExecutionTimedOut => EventType::WorkflowExecutionTimedOut,
            Self::WorkflowExecutionContinuedAsNew { .. } => {
                EventType::WorkflowExecutionContinuedAsNew
            }
        }
    }
}

/// An immutable, ordered fact recorded by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Monotonically increasing sequence id within a run
    pub event_id: i64,

    /// Type-specific attributes
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(event_id: i64, attributes: EventAttributes) -> Self {
        Self {
            event_id,
            attributes,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.attributes.event_type()
    }

    /// Whether this event closes the workflow execution
    pub fn is_workflow_close_event(&self) -> bool {
        matches!(
            self.event_type(),
            EventType::WorkflowExecutionCompleted
                | EventType::WorkflowExecutionFailed
                | EventType::WorkflowExecutionCanceled
                | EventType::WorkflowExecutionTerminated
                | EventType::WorkflowExecutionTimedOut
                | EventType::WorkflowExecutionContinuedAsNew
        )
    }

    /// Event id of the initiating (command-produced) event this event refers
    /// back to, if any. Used to route completion events to the entity state
    /// machine that owns the in-flight interaction.
    pub fn initiated_event_id(&self) -> Option<i64> {
        match &self.attributes {
            EventAttributes::ActivityTaskStarted {
                scheduled_event_id, ..
            }
            | EventAttributes::ActivityTaskCompleted {
                scheduled_event_id, ..
            }
            | EventAttributes::ActivityTaskFailed {
                scheduled_event_id, ..
            }
            | EventAttributes::ActivityTaskCancelRequested { scheduled_event_id }
            | EventAttributes::ActivityTaskCanceled { scheduled_event_id } => {
                Some(*scheduled_event_id)
            }
            EventAttributes::TimerFired {
                started_event_id, ..
            }
            | EventAttributes::TimerCanceled { started_event_id } => Some(*started_event_id),
            EventAttributes::ExternalWorkflowSignaled { initiated_event_id }
            | EventAttributes::SignalExternalWorkflowFailed {
                initiated_event_id, ..
            } => Some(*initiated_event_id),
            _ => None,
        }
    }
}
