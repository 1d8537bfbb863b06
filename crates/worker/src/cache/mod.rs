//! Sticky execution cache and run locking
//!
//! Holding a run's replay state between workflow tasks is what makes sticky
//! execution cheap: the server only sends the history delta, and the worker
//! resumes the cached [`WorkflowRunTaskHandler`] instead of replaying from
//! event one. The pieces here:
//! - [`WorkflowRunLockManager`] - per-run mutual exclusion for task processing
//! - [`WorkflowExecutorCache`] - bounded LRU-ish cache with lock-aware eviction
//! - [`WorkflowRunTaskHandler`] - the cached, paused run itself

mod executor_cache;
mod run_lock;
mod run_task_handler;

pub use executor_cache::{CacheError, SharedRunHandler, WorkflowExecutorCache};
pub use run_lock::{RunLockGuard, WorkflowRunLockManager};
pub use run_task_handler::{CloseHook, WorkflowRunTaskHandler};
