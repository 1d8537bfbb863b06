//! Poll loops with backoff and shutdown
//!
//! A [`Poller`] runs a fixed number of concurrent poll loops over one
//! [`PollTask`]. Successful and empty polls go straight back to polling;
//! errors back off exponentially with jitter so a down server is not
//! hammered. Shutdown is a watch channel; `shutdown().await` joins every
//! loop.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::poll_task::PollTask;

/// Poll loop configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Number of concurrent poll loops
    pub poll_loops: usize,

    /// Backoff after the first consecutive poll error
    pub initial_backoff: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_loops: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(6),
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent poll loops
    pub fn with_poll_loops(mut self, loops: usize) -> Self {
        self.poll_loops = loops.max(1);
        self
    }

    /// Set the error backoff bounds
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}

/// Runs poll loops for one task kind and feeds results to a handler.
pub struct Poller {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the configured number of poll loops.
    pub fn start<P, F>(config: PollerConfig, poll_task: Arc<P>, handler: F) -> Self
    where
        P: PollTask + 'static,
        F: Fn(P::Output) + Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..config.poll_loops.max(1))
            .map(|loop_index| {
                let poll_task = poll_task.clone();
                let handler = handler.clone();
                let config = config.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    poll_loop(loop_index, config, poll_task, handler, shutdown_rx).await;
                })
            })
            .collect();
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal all loops to stop and wait for them to finish. A loop blocked
    /// in a long poll exits once that poll returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for result in futures::future::join_all(self.handles).await {
            let _ = result;
        }
    }
}

async fn poll_loop<P, F>(
    loop_index: usize,
    config: PollerConfig,
    poll_task: Arc<P>,
    handler: F,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    P: PollTask,
    F: Fn(P::Output),
{
    let mut backoff = config.initial_backoff;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = poll_task.poll() => match result {
                Ok(Some(task)) => {
                    handler(task);
                    backoff = config.initial_backoff;
                    // A poll that resolves without touching a tokio resource
                    // would otherwise keep this loop on the executor forever
                    tokio::task::yield_now().await;
                }
                Ok(None) => {
                    backoff = config.initial_backoff;
                    tokio::task::yield_now().await;
                }
                Err(err) => {
                    warn!(loop_index, error = %err, backoff_ms = backoff.as_millis() as u64, "poll failed, backing off");
                    let jittered = backoff.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(jittered) => {}
                    }
                    backoff = (backoff * 2).min(config.max_backoff);
                }
            }
        }
    }
    debug!(loop_index, "poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::PollerError;
    use crate::service::RpcError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Poll task driven by a script; repeats the last entry forever.
    struct ScriptedPoll {
        script: Mutex<Vec<Result<Option<u32>, PollerError>>>,
        polls: AtomicUsize,
    }

    impl ScriptedPoll {
        fn new(script: Vec<Result<Option<u32>, PollerError>>) -> Self {
            Self {
                script: Mutex::new(script),
                polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PollTask for ScriptedPoll {
        type Output = u32;

        async fn poll(&self) -> Result<Option<u32>, PollerError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else if let Some(last) = script.first() {
                match last {
                    Ok(v) => Ok(*v),
                    Err(_) => Err(RpcError::Unavailable("down".to_string()).into()),
                }
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn test_polled_tasks_reach_handler() {
        let poll = Arc::new(ScriptedPoll::new(vec![Ok(Some(1)), Ok(Some(2)), Ok(None)]));
        let seen: Arc<Mutex<Vec<u32>>> = Arc::default();
        let sink = seen.clone();

        let poller = Poller::start(
            PollerConfig::new().with_poll_loops(1),
            poll,
            move |task| sink.lock().push(task),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        poller.shutdown().await;

        let seen = seen.lock();
        assert!(seen.contains(&1));
        assert!(seen.contains(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_instead_of_spinning() {
        let poll = Arc::new(ScriptedPoll::new(vec![Err(RpcError::Unavailable(
            "down".to_string(),
        )
        .into())]));
        let poller = Poller::start(
            PollerConfig::new()
                .with_poll_loops(1)
                .with_backoff(Duration::from_millis(200), Duration::from_secs(5)),
            poll.clone(),
            |_task: u32| {},
        );

        // With auto-advancing time, 100ms of virtual time admits only a
        // handful of backoff cycles
        tokio::time::sleep(Duration::from_millis(100)).await;
        let polls_so_far = poll.polls.load(Ordering::SeqCst);
        assert!(polls_so_far <= 3, "expected backoff, saw {polls_so_far} polls");
        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_polls_yield_to_other_tasks() {
        // On the default current-thread test runtime this sleep only fires if
        // the loop yields between empty polls
        let poll = Arc::new(ScriptedPoll::new(vec![Ok(None)]));
        let poller = Poller::start(
            PollerConfig::new().with_poll_loops(1),
            poll.clone(),
            |_task: u32| {},
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.shutdown().await;
        assert!(poll.polls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_shutdown_joins_all_loops() {
        let poll = Arc::new(ScriptedPoll::new(vec![Ok(None)]));
        let poller = Poller::start(
            PollerConfig::new().with_poll_loops(3),
            poll,
            |_task: u32| {},
        );
        // Returns only once every loop has exited
        poller.shutdown().await;
    }
}
