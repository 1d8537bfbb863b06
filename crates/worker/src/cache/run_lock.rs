//! Per-run processing locks
//!
//! Every cached run is processed under a run lock so that history events are
//! applied in order by exactly one workflow task at a time, and so eviction
//! can cheaply detect runs that are mid-processing. Lock entries are created
//! on demand and removed when the last holder or waiter goes away.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

struct Entry {
    semaphore: Arc<Semaphore>,
    /// Guards held plus acquisitions in flight
    refs: usize,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Refcount lease on one lock entry; dropping it cleans the entry up once
/// nobody holds or waits on it. Acquisition futures own a lease, so a
/// cancelled `lock` leaks nothing.
struct RefLease {
    entries: Entries,
    run_id: String,
}

impl RefLease {
    fn checkout(entries: &Entries, run_id: &str) -> (Self, Arc<Semaphore>) {
        let mut map = entries.lock();
        let entry = map.entry(run_id.to_string()).or_insert_with(|| Entry {
            semaphore: Arc::new(Semaphore::new(1)),
            refs: 0,
        });
        entry.refs += 1;
        let semaphore = entry.semaphore.clone();
        (
            Self {
                entries: entries.clone(),
                run_id: run_id.to_string(),
            },
            semaphore,
        )
    }
}

impl Drop for RefLease {
    fn drop(&mut self) {
        let mut map = self.entries.lock();
        if let Some(entry) = map.get_mut(&self.run_id) {
            entry.refs -= 1;
            if entry.refs == 0 {
                map.remove(&self.run_id);
            }
        }
    }
}

/// Exclusive hold on one run. Released on drop.
pub struct RunLockGuard {
    _permit: OwnedSemaphorePermit,
    _lease: RefLease,
}

/// Keyed mutual exclusion over run ids.
#[derive(Clone, Default)]
pub struct WorkflowRunLockManager {
    entries: Entries,
}

impl WorkflowRunLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the run lock, waiting if another task holds it.
    pub async fn lock(&self, run_id: &str) -> RunLockGuard {
        let (lease, semaphore) = RefLease::checkout(&self.entries, run_id);
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("run lock semaphore is never closed");
        RunLockGuard {
            _permit: permit,
            _lease: lease,
        }
    }

    /// Acquire the run lock only if it is free right now.
    pub fn try_lock(&self, run_id: &str) -> Option<RunLockGuard> {
        let (lease, semaphore) = RefLease::checkout(&self.entries, run_id);
        match semaphore.try_acquire_owned() {
            Ok(permit) => Some(RunLockGuard {
                _permit: permit,
                _lease: lease,
            }),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => unreachable!("run lock semaphore is never closed"),
        }
    }

    /// Number of live lock entries, for tests and diagnostics.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_excludes_try_lock() {
        let manager = WorkflowRunLockManager::new();
        let guard = manager.lock("run-1").await;
        assert!(manager.try_lock("run-1").is_none());
        drop(guard);
        assert!(manager.try_lock("run-1").is_some());
    }

    #[tokio::test]
    async fn test_independent_runs_do_not_contend() {
        let manager = WorkflowRunLockManager::new();
        let _a = manager.lock("run-a").await;
        assert!(manager.try_lock("run-b").is_some());
    }

    #[tokio::test]
    async fn test_entries_cleaned_up_after_release() {
        let manager = WorkflowRunLockManager::new();
        {
            let _guard = manager.lock("run-1").await;
            assert_eq!(manager.entry_count(), 1);
        }
        assert_eq!(manager.entry_count(), 0);

        // Failed try_lock attempts leave no residue either
        let guard = manager.try_lock("run-2").unwrap();
        assert!(manager.try_lock("run-2").is_none());
        drop(guard);
        assert_eq!(manager.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let manager = WorkflowRunLockManager::new();
        let guard = manager.lock("run-1").await;
        let contender = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _guard = manager.lock("run-1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
        assert_eq!(manager.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_acquisition_leaks_nothing() {
        let manager = WorkflowRunLockManager::new();
        let guard = manager.lock("run-1").await;
        {
            let manager = manager.clone();
            let pending = tokio::spawn(async move {
                let _guard = manager.lock("run-1").await;
            });
            tokio::task::yield_now().await;
            pending.abort();
            let _ = pending.await;
        }
        drop(guard);
        assert_eq!(manager.entry_count(), 0);
        assert!(manager.try_lock("run-1").is_some());
    }
}
