//! Sticky execution cache
//!
//! Between workflow tasks a run's replay state stays resident on the worker
//! so sticky tasks only carry the new history delta. The cache is bounded;
//! when the worker needs room it evicts the least recently used run that is
//! not currently being processed, which it detects through the run lock.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use windlass_proto::{PollWorkflowTaskResponse, WorkflowExecution};

use super::run_lock::WorkflowRunLockManager;
use super::run_task_handler::WorkflowRunTaskHandler;
use crate::metrics::{names, SharedMetrics};

/// Cached run handle shared between the cache and the task processor.
pub type SharedRunHandler = Arc<Mutex<WorkflowRunTaskHandler>>;

/// Errors raised by the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Closing a cached run's suspended state failed during eviction or
    /// invalidation
    #[error("failed to close cached run {run_id}")]
    CloseFailed {
        run_id: String,
        #[source]
        source: anyhow::Error,
    },
}

struct CacheEntry {
    handler: SharedRunHandler,
    last_access: Instant,
}

/// Bounded cache of paused workflow runs, keyed by run id.
pub struct WorkflowExecutorCache {
    capacity: usize,
    entries: DashMap<String, CacheEntry>,
    run_locks: WorkflowRunLockManager,
    metrics: SharedMetrics,
}

impl WorkflowExecutorCache {
    pub fn new(capacity: usize, run_locks: WorkflowRunLockManager, metrics: SharedMetrics) -> Self {
        Self {
            capacity,
            entries: DashMap::new(),
            run_locks,
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Look up the cached run for `task`, or build a fresh one.
    ///
    /// A full-history task means the server gave up on the sticky copy;
    /// whatever is cached for the run is stale and is invalidated before the
    /// fresh handler is built. That path counts neither a hit nor a miss.
    pub fn get_or_create(
        &self,
        task: &PollWorkflowTaskResponse,
        factory: impl FnOnce() -> WorkflowRunTaskHandler,
    ) -> Result<SharedRunHandler, CacheError> {
        let execution = &task.workflow_execution;
        if task.is_full_history() {
            self.invalidate(execution, "full history resent by server", None)?;
            return Ok(Arc::new(Mutex::new(factory())));
        }

        if let Some(mut entry) = self.entries.get_mut(&execution.run_id) {
            entry.last_access = Instant::now();
            self.metrics.counter(names::STICKY_CACHE_HIT, 1);
            return Ok(entry.handler.clone());
        }

        self.metrics.counter(names::STICKY_CACHE_MISS, 1);
        Ok(Arc::new(Mutex::new(factory())))
    }

    /// Put a run into the cache after its workflow task completed
    /// successfully. When the cache is at capacity an eviction is attempted
    /// first; if every resident run is mid-processing the cache temporarily
    /// exceeds its nominal capacity.
    pub fn add_to_cache(
        &self,
        execution: &WorkflowExecution,
        handler: SharedRunHandler,
    ) -> Result<(), CacheError> {
        // Overwriting an already-cached run does not grow the cache, so it
        // never warrants an eviction
        let needs_room =
            !self.entries.contains_key(&execution.run_id) && self.entries.len() >= self.capacity;
        if needs_room && !self.evict_any_not_in_processing(&execution.run_id)? {
            debug!(
                run_id = %execution.run_id,
                size = self.entries.len(),
                capacity = self.capacity,
                "all cached runs busy, exceeding nominal cache capacity"
            );
        }
        self.entries.insert(
            execution.run_id.clone(),
            CacheEntry {
                handler,
                last_access: Instant::now(),
            },
        );
        self.publish_size();
        Ok(())
    }

    /// Drop the cached run for `execution`, closing it if present.
    pub fn invalidate(
        &self,
        execution: &WorkflowExecution,
        reason: &str,
        cause: Option<&anyhow::Error>,
    ) -> Result<(), CacheError> {
        let Some((run_id, entry)) = self.entries.remove(&execution.run_id) else {
            return Ok(());
        };
        debug!(
            workflow_id = %execution.workflow_id,
            run_id = %run_id,
            reason,
            cause = cause.map(|c| c.to_string()),
            "invalidating cached run"
        );
        self.publish_size();
        self.close_handler(&run_id, &entry.handler)
    }

    /// Evict the least recently used run whose lock is free, skipping
    /// `in_favor_of_run_id`.
    ///
    /// Returns false when every candidate is currently being processed,
    /// which is a normal outcome, not an error.
    pub fn evict_any_not_in_processing(
        &self,
        in_favor_of_run_id: &str,
    ) -> Result<bool, CacheError> {
        let mut candidates: Vec<(String, Instant)> = self
            .entries
            .iter()
            .filter(|entry| entry.key() != in_favor_of_run_id)
            .map(|entry| (entry.key().clone(), entry.value().last_access))
            .collect();
        candidates.sort_by_key(|(_, last_access)| *last_access);

        for (run_id, _) in candidates {
            let Some(_guard) = self.run_locks.try_lock(&run_id) else {
                continue;
            };
            // Raced with invalidation or another eviction
            let Some((run_id, entry)) = self.entries.remove(&run_id) else {
                continue;
            };
            warn!(run_id = %run_id, in_favor_of = in_favor_of_run_id, "forced eviction of cached run");
            self.metrics.counter(names::STICKY_CACHE_FORCED_EVICTION, 1);
            self.publish_size();
            self.close_handler(&run_id, &entry.handler)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop and close every cached run, e.g. on worker shutdown. All entries
    /// are closed even if some fail; the first failure is returned.
    pub fn invalidate_all(&self) -> Result<(), CacheError> {
        let mut first_error = None;
        let run_ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for run_id in run_ids {
            let Some((run_id, entry)) = self.entries.remove(&run_id) else {
                continue;
            };
            if let Err(err) = self.close_handler(&run_id, &entry.handler) {
                first_error.get_or_insert(err);
            }
        }
        self.publish_size();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn close_handler(&self, run_id: &str, handler: &SharedRunHandler) -> Result<(), CacheError> {
        handler.lock().close().map_err(|source| {
            error!(run_id, error = %source, "failed to close evicted run");
            CacheError::CloseFailed {
                run_id: run_id.to_string(),
                source,
            }
        })
    }

    fn publish_size(&self) {
        self.metrics
            .gauge(names::STICKY_CACHE_SIZE, self.entries.len() as f64);
    }
}
