//! Client-side helpers
//!
//! The worker runtime is mostly server-driven; this module holds the one
//! client-facing concern it owns, waiting for a workflow execution's result
//! across continue-as-new chains.

mod long_poll;

pub use long_poll::{get_workflow_execution_result, WorkflowResultError};
