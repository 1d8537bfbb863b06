//! End-to-end worker flow over an in-memory orchestration server:
//! poll, replay, command emission, sticky caching and slot accounting
//! working together.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use windlass_proto::{
    Command, CommandType, EventAttributes, GetHistoryRequest, GetHistoryResponse, HistoryEvent,
    PollActivityTaskResponse, PollWorkflowTaskResponse, WorkflowExecution,
};
use windlass_worker::cache::{WorkflowExecutorCache, WorkflowRunLockManager, WorkflowRunTaskHandler};
use windlass_worker::metrics::{names, MetricsSink, NoopMetrics};
use windlass_worker::poller::{Poller, PollerConfig, StickyQueueBalancer, WorkflowPollTask};
use windlass_worker::service::{
    PollActivityTaskRequest, PollWorkflowTaskRequest, RpcError, WorkflowService,
};
use windlass_worker::slots::{
    FixedSizeSlotSupplier, SlotKind, SlotReleaseReason, TrackingSlotSupplier,
};
use windlass_worker::WorkerConfig;

/// In-memory stand-in for the orchestration server: hands out scripted
/// workflow tasks and records completions.
struct MockServer {
    workflow_tasks: Mutex<VecDeque<PollWorkflowTaskResponse>>,
    completions: Mutex<Vec<Vec<Command>>>,
}

impl MockServer {
    fn new(tasks: Vec<PollWorkflowTaskResponse>) -> Self {
        Self {
            workflow_tasks: Mutex::new(tasks.into()),
            completions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WorkflowService for MockServer {
    async fn poll_workflow_task(
        &self,
        _request: PollWorkflowTaskRequest,
    ) -> Result<Option<PollWorkflowTaskResponse>, RpcError> {
        Ok(self.workflow_tasks.lock().pop_front())
    }

    async fn poll_activity_task(
        &self,
        _request: PollActivityTaskRequest,
    ) -> Result<Option<PollActivityTaskResponse>, RpcError> {
        Ok(None)
    }

    async fn get_workflow_execution_history(
        &self,
        _request: GetHistoryRequest,
        _deadline: Duration,
    ) -> Result<GetHistoryResponse, RpcError> {
        Ok(GetHistoryResponse::default())
    }

    async fn respond_workflow_task_completed(
        &self,
        _task_token: Vec<u8>,
        commands: Vec<Command>,
    ) -> Result<(), RpcError> {
        self.completions.lock().push(commands);
        Ok(())
    }
}

fn execution() -> WorkflowExecution {
    WorkflowExecution::new("order-wf", "run-1")
}

fn first_task() -> PollWorkflowTaskResponse {
    PollWorkflowTaskResponse {
        task_token: b"task-1".to_vec(),
        workflow_execution: execution(),
        workflow_type: "order".to_string(),
        history: vec![
            HistoryEvent::new(
                1,
                EventAttributes::WorkflowExecutionStarted {
                    workflow_type: "order".to_string(),
                    input: json!({"id": 42}),
                },
            ),
            HistoryEvent::new(2, EventAttributes::WorkflowTaskScheduled),
            HistoryEvent::new(3, EventAttributes::WorkflowTaskStarted),
        ],
        previous_started_event_id: 0,
        started_event_id: 3,
        backlog_count_hint: 0,
    }
}

fn sticky_task() -> PollWorkflowTaskResponse {
    PollWorkflowTaskResponse {
        task_token: b"task-2".to_vec(),
        workflow_execution: execution(),
        workflow_type: "order".to_string(),
        history: vec![
            HistoryEvent::new(
                5,
                EventAttributes::TimerStarted {
                    timer_id: "t-1".to_string(),
                },
            ),
            HistoryEvent::new(
                8,
                EventAttributes::TimerFired {
                    started_event_id: 5,
                    timer_id: "t-1".to_string(),
                },
            ),
            HistoryEvent::new(9, EventAttributes::WorkflowTaskScheduled),
            HistoryEvent::new(10, EventAttributes::WorkflowTaskStarted),
        ],
        previous_started_event_id: 3,
        started_event_id: 10,
        backlog_count_hint: 0,
    }
}

/// One workflow task, processed the way the worker loop does it: look the
/// run up in the cache, take the run lock, apply history, raise this task's
/// intents, respond with the drained commands, then cache the run again.
async fn process_task(
    server: &MockServer,
    cache: &WorkflowExecutorCache,
    run_locks: &WorkflowRunLockManager,
    task: &PollWorkflowTaskResponse,
    drive: impl FnOnce(&mut WorkflowRunTaskHandler),
) {
    let run_id = task.workflow_execution.run_id.clone();
    let handler = cache
        .get_or_create(task, || {
            WorkflowRunTaskHandler::new(task.workflow_execution.clone())
        })
        .unwrap();

    let _lock = run_locks.lock(&run_id).await;
    let commands = {
        let mut handler = handler.lock();
        handler.handle_workflow_task(task).unwrap();
        drive(&mut handler);
        handler.machines_mut().take_commands()
    };
    server
        .respond_workflow_task_completed(task.task_token.clone(), commands)
        .await
        .unwrap();
    cache.add_to_cache(&task.workflow_execution, handler).unwrap();
}

#[test_log::test(tokio::test)]
async fn test_workflow_runs_to_completion_across_sticky_tasks() {
    let config = WorkerConfig::new("orders", "worker-1").with_cache_capacity(4);
    config.validate().unwrap();

    let server = MockServer::new(vec![first_task(), sticky_task()]);
    let run_locks = WorkflowRunLockManager::new();
    let metrics = Arc::new(windlass_worker::metrics::NoopMetrics);
    let cache = WorkflowExecutorCache::new(config.cache_capacity, run_locks.clone(), metrics);

    let timer_fired = Arc::new(Mutex::new(false));

    // First task: fresh run, workflow code starts a timer
    let task = server
        .poll_workflow_task(PollWorkflowTaskRequest {
            task_queue: config.task_queue.clone(),
            kind: windlass_proto::TaskQueueKind::Normal,
            identity: config.identity.clone(),
        })
        .await
        .unwrap()
        .unwrap();
    let fired = timer_fired.clone();
    process_task(&server, &cache, &run_locks, &task, move |handler| {
        handler
            .machines_mut()
            .start_timer(
                "t-1".to_string(),
                Duration::from_secs(30),
                Box::new(move |_, failure| {
                    assert!(failure.is_none());
                    *fired.lock() = true;
                }),
            )
            .unwrap();
    })
    .await;

    // Second task: sticky delta fires the timer, workflow code completes
    let task = server
        .poll_workflow_task(PollWorkflowTaskRequest {
            task_queue: config.sticky_queue_name.clone(),
            kind: windlass_proto::TaskQueueKind::Sticky,
            identity: config.identity.clone(),
        })
        .await
        .unwrap()
        .unwrap();
    process_task(&server, &cache, &run_locks, &task, |handler| {
        handler.machines_mut().complete_workflow(json!({"ok": true}));
    })
    .await;

    assert!(*timer_fired.lock());

    let completions = server.completions.lock();
    assert_eq!(completions.len(), 2);
    assert_eq!(completions[0].len(), 1);
    assert_eq!(completions[0][0].command_type(), CommandType::StartTimer);
    assert_eq!(completions[1].len(), 1);
    assert_eq!(completions[1][0].command_type(), CommandType::CompleteWorkflow);
    assert_eq!(cache.size(), 1);
}

#[test_log::test(tokio::test)]
async fn test_sticky_task_reuses_cached_run() {
    /// Counts cache hits and misses.
    #[derive(Default)]
    struct CountingMetrics {
        hits: std::sync::atomic::AtomicU64,
        misses: std::sync::atomic::AtomicU64,
    }
    impl MetricsSink for CountingMetrics {
        fn counter(&self, name: &'static str, delta: u64) {
            use std::sync::atomic::Ordering;
            match name {
                names::STICKY_CACHE_HIT => self.hits.fetch_add(delta, Ordering::Relaxed),
                names::STICKY_CACHE_MISS => self.misses.fetch_add(delta, Ordering::Relaxed),
                _ => 0,
            };
        }
        fn gauge(&self, _name: &'static str, _value: f64) {}
        fn timer(&self, _name: &'static str, _value: Duration) {}
    }

    let server = MockServer::new(vec![]);
    let run_locks = WorkflowRunLockManager::new();
    let metrics = Arc::new(CountingMetrics::default());
    let cache = WorkflowExecutorCache::new(4, run_locks.clone(), metrics.clone());

    process_task(&server, &cache, &run_locks, &first_task(), |handler| {
        handler
            .machines_mut()
            .start_timer("t-1".to_string(), Duration::from_secs(30), Box::new(|_, _| {}))
            .unwrap();
    })
    .await;
    process_task(&server, &cache, &run_locks, &sticky_task(), |handler| {
        handler.machines_mut().complete_workflow(json!(null));
    })
    .await;

    use std::sync::atomic::Ordering;
    // The full-history task counts neither; the sticky task is a hit
    assert_eq!(metrics.hits.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.misses.load(Ordering::Relaxed), 0);
}

#[test_log::test(tokio::test)]
async fn test_poller_feeds_tasks_and_returns_slots() {
    let server = Arc::new(MockServer::new(vec![first_task()]));
    let slots = Arc::new(TrackingSlotSupplier::new(
        Arc::new(FixedSizeSlotSupplier::new(SlotKind::WorkflowTask, 2)),
        Some(2),
        Arc::new(NoopMetrics),
    ));
    let balancer = Arc::new(StickyQueueBalancer::new(false, 0.0));
    let poll_task = Arc::new(WorkflowPollTask::new(
        server.clone(),
        slots.clone(),
        balancer,
        "orders".to_string(),
        "orders-sticky".to_string(),
        "worker-1".to_string(),
        Arc::new(NoopMetrics),
    ));

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let poller = Poller::start(
        PollerConfig::new().with_poll_loops(1),
        poll_task,
        move |task| {
            task.slot.release(SlotReleaseReason::TaskComplete);
            sink.lock().push(task.task.task_token.clone());
        },
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    poller.shutdown().await;

    assert_eq!(received.lock().as_slice(), &[b"task-1".to_vec()]);
    assert_eq!(slots.used(), 0);
    assert_eq!(slots.release_count(SlotReleaseReason::TaskComplete), 1);
    // Empty polls after the scripted task returned their slots unused
    assert!(slots.release_count(SlotReleaseReason::NeverUsed) >= 1);
}

#[test_log::test(tokio::test)]
async fn test_nondeterministic_delta_invalidates_cached_run() {
    let server = MockServer::new(vec![]);
    let run_locks = WorkflowRunLockManager::new();
    let cache = WorkflowExecutorCache::new(4, run_locks.clone(), Arc::new(NoopMetrics));

    process_task(&server, &cache, &run_locks, &first_task(), |handler| {
        handler
            .machines_mut()
            .start_timer("t-1".to_string(), Duration::from_secs(30), Box::new(|_, _| {}))
            .unwrap();
    })
    .await;

    // The server's delta carries an activity event, but the cached run's
    // oldest pending command is a timer start
    let mut poisoned = sticky_task();
    poisoned.history[0] = HistoryEvent::new(
        5,
        EventAttributes::ActivityTaskScheduled {
            activity_id: "a-1".to_string(),
            activity_type: "charge".to_string(),
        },
    );

    let handler = cache
        .get_or_create(&poisoned, || panic!("run should be cached"))
        .unwrap();
    let error = {
        let _lock = run_locks.lock("run-1").await;
        let mut handler = handler.lock();
        handler.handle_workflow_task(&poisoned).unwrap_err()
    };
    cache
        .invalidate(&execution(), "determinism violation", Some(&anyhow::anyhow!(error)))
        .unwrap();

    assert_eq!(cache.size(), 0);
    assert!(handler.lock().is_closed());
}
