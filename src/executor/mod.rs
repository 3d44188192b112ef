//! Bounded, timeout-guarded parallel execution of per-item work.
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────┐     ┌───────────────┐     ┌───────────────┐
//!  items ───►  │ distributor  │ ──► │ expand x W    │ ──► │ process x W   │
//!              └──────────────┘     │ (optional)    │     └───────────────┘
//!                                   └───────────────┘             │
//!                                           │                      ▼
//!                                           └───────────────► collector
//! ```
//!
//! Each stage has `W = max_concurrent + 1` workers sharing one bounded queue.
//! Every invocation runs as its own task under its own deadline; expiry drops
//! the task, which kills any subprocess it spawned (they are all created with
//! `kill_on_drop`).
//!
//! A worker whose invocation fails stops pulling work; the rest of the pool
//! carries on. If every worker of a stage has stopped, that stage's queue is
//! dropped and the items still waiting upstream are abandoned. There is no
//! run-level cancellation: one failure never interrupts invocations already
//! in flight.
//!
//! The collector sees every outcome and returns the first failure in
//! completion order.


use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Deadline applied to each invocation when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a single invocation did not succeed.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The invocation returned an error.
    #[error("{0}")]
    Failed(E),

    /// The invocation exceeded its deadline and was cancelled.
    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The invocation panicked.
    #[error("task panicked: {message}")]
    Panicked { message: String },
}

impl<E> TaskError<E> {
    /// Returns the invocation's own error, if that is why it failed.
    pub fn failure(&self) -> Option<&E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::TimedOut { .. })
    }
}

/// Result of a whole run: `Ok` only if every invocation that ran succeeded.
pub type RunResult<E> = Result<(), TaskError<E>>;

/// Executor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorConfig {
    /// Per-invocation deadline. `None` or zero means [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Workers per stage minus one; `0` still runs one worker.
    pub max_concurrent: usize,
}

impl ExecutorConfig {
    pub fn new(timeout: Option<Duration>, max_concurrent: usize) -> Self {
        ExecutorConfig {
            timeout,
            max_concurrent,
        }
    }

    /// The deadline each invocation runs under.
    pub fn timeout(&self) -> Duration {
        self.timeout
            .filter(|limit| !limit.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Number of workers in each stage.
    pub fn workers(&self) -> usize {
        self.max_concurrent.saturating_add(1)
    }
}

/// Invocation counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub invocations: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub panicked: usize,
}

impl RunStats {
    fn record<E>(&mut self, outcome: &RunResult<E>) {
        self.invocations += 1;
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(TaskError::Failed(_)) => self.failed += 1,
            Err(TaskError::TimedOut { .. }) => self.timed_out += 1,
            Err(TaskError::Panicked { .. }) => self.panicked += 1,
        }
    }
}

/// A stage's queue, shared by all of the stage's workers.
type Queue<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Runs work items through one or two stages of bounded worker pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Executor { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Call `process` once per item.
    pub async fn run<T, E, F, Fut>(&self, items: Vec<T>, process: F) -> RunResult<E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.run_with_stats(items, process).await.0
    }

    /// Like [`Executor::run`], also returning invocation counts.
    pub async fn run_with_stats<T, E, F, Fut>(
        &self,
        items: Vec<T>,
        process: F,
    ) -> (RunResult<E>, RunStats)
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let workers = self.config.workers();
        let mut tasks = JoinSet::new();
        let (outcome_tx, outcome_rx) = mpsc::channel(workers);

        let queue = distribute(&mut tasks, items, workers);
        spawn_process_stage(
            &mut tasks,
            queue,
            Arc::new(process),
            self.config.timeout(),
            workers,
            &outcome_tx,
        );
        drop(outcome_tx);

        collect(tasks, outcome_rx).await
    }

    /// Two-stage pipeline: `expand` turns each item into sub-items, and
    /// `process` is called once per sub-item.
    ///
    /// Both calls run under the per-invocation deadline.
    pub async fn run_expanded<T, U, E, X, XFut, F, Fut>(
        &self,
        items: Vec<T>,
        expand: X,
        process: F,
    ) -> RunResult<E>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: Send + 'static,
        X: Fn(T) -> XFut + Send + Sync + 'static,
        XFut: Future<Output = Result<Vec<U>, E>> + Send + 'static,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.run_expanded_with_stats(items, expand, process).await.0
    }

    /// Like [`Executor::run_expanded`], also returning invocation counts
    /// across both stages.
    pub async fn run_expanded_with_stats<T, U, E, X, XFut, F, Fut>(
        &self,
        items: Vec<T>,
        expand: X,
        process: F,
    ) -> (RunResult<E>, RunStats)
    where
        T: Send + 'static,
        U: Send + 'static,
        E: Send + 'static,
        X: Fn(T) -> XFut + Send + Sync + 'static,
        XFut: Future<Output = Result<Vec<U>, E>> + Send + 'static,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let workers = self.config.workers();
        let limit = self.config.timeout();
        let mut tasks = JoinSet::new();
        let (outcome_tx, outcome_rx) = mpsc::channel(workers);

        let items = distribute(&mut tasks, items, workers);

        // Every expand worker holds a sender; the second queue closes once
        // the last of them exits.
        let (next_tx, next_rx) = mpsc::channel(workers);
        let expand = Arc::new(expand);
        for id in 0..workers {
            tasks.spawn(expand_worker(
                id,
                items.clone(),
                expand.clone(),
                limit,
                next_tx.clone(),
                outcome_tx.clone(),
            ));
        }
        drop(items);
        drop(next_tx);

        spawn_process_stage(
            &mut tasks,
            Arc::new(Mutex::new(next_rx)),
            Arc::new(process),
            limit,
            workers,
            &outcome_tx,
        );
        drop(outcome_tx);

        collect(tasks, outcome_rx).await
    }
}

/// Feed `items` into a bounded queue from a background task.
fn distribute<T: Send + 'static>(tasks: &mut JoinSet<()>, items: Vec<T>, capacity: usize) -> Queue<T> {
    let (tx, rx) = mpsc::channel(capacity);
    tasks.spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                debug!("every worker has stopped, abandoning remaining items");
                return;
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

fn spawn_process_stage<T, E, F, Fut>(
    tasks: &mut JoinSet<()>,
    queue: Queue<T>,
    process: Arc<F>,
    limit: Duration,
    workers: usize,
    outcomes: &mpsc::Sender<RunResult<E>>,
) where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    for id in 0..workers {
        tasks.spawn(process_worker(
            id,
            queue.clone(),
            process.clone(),
            limit,
            outcomes.clone(),
        ));
    }
}

async fn next_item<T>(queue: &Queue<T>) -> Option<T> {
    queue.lock().await.recv().await
}

async fn process_worker<T, E, F, Fut>(
    id: usize,
    queue: Queue<T>,
    process: Arc<F>,
    limit: Duration,
    outcomes: mpsc::Sender<RunResult<E>>,
) where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    while let Some(item) = next_item(&queue).await {
        let outcome = invoke(process(item), limit).await;
        let failed = outcome.is_err();
        if outcomes.send(outcome).await.is_err() || failed {
            debug!(worker = id, stage = "process", "worker stopping after failure");
            return;
        }
    }
}

async fn expand_worker<T, U, E, X, XFut>(
    id: usize,
    queue: Queue<T>,
    expand: Arc<X>,
    limit: Duration,
    next: mpsc::Sender<U>,
    outcomes: mpsc::Sender<RunResult<E>>,
) where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    X: Fn(T) -> XFut + Send + Sync + 'static,
    XFut: Future<Output = Result<Vec<U>, E>> + Send + 'static,
{
    while let Some(item) = next_item(&queue).await {
        let (outcome, produced) = match invoke(expand(item), limit).await {
            Ok(produced) => (Ok(()), produced),
            Err(e) => (Err(e), Vec::new()),
        };
        let failed = outcome.is_err();
        if outcomes.send(outcome).await.is_err() || failed {
            debug!(worker = id, stage = "expand", "worker stopping after failure");
            return;
        }
        for sub in produced {
            if next.send(sub).await.is_err() {
                debug!(worker = id, "every process worker has stopped");
                return;
            }
        }
    }
}

/// Run one invocation as its own task under `limit`.
///
/// Leaving this function for any reason drops the `JoinSet`, which aborts the
/// task if it is still running.
async fn invoke<R, E, Fut>(call: Fut, limit: Duration) -> Result<R, TaskError<E>>
where
    R: Send + 'static,
    E: Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let mut running = JoinSet::new();
    running.spawn(call);

    match tokio::time::timeout(limit, running.join_next()).await {
        Ok(Some(Ok(Ok(value)))) => Ok(value),
        Ok(Some(Ok(Err(e)))) => Err(TaskError::Failed(e)),
        Ok(Some(Err(join))) if join.is_panic() => Err(TaskError::Panicked {
            message: panic_message(join.into_panic()),
        }),
        Ok(Some(Err(join))) => Err(TaskError::Panicked {
            message: join.to_string(),
        }),
        Ok(None) => Err(TaskError::Panicked {
            message: "invocation task vanished".to_string(),
        }),
        Err(_) => Err(TaskError::TimedOut { after: limit }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Drain outcomes until every worker has exited, keeping the first failure.
async fn collect<E>(
    mut tasks: JoinSet<()>,
    mut outcomes: mpsc::Receiver<RunResult<E>>,
) -> (RunResult<E>, RunStats) {
    let mut stats = RunStats::default();
    let mut first_error = None;

    while let Some(outcome) = outcomes.recv().await {
        stats.record(&outcome);
        if let Err(e) = outcome
            && first_error.is_none()
        {
            first_error = Some(e);
        }
    }

    while tasks.join_next().await.is_some() {}

    info!(
        invocations = stats.invocations,
        succeeded = stats.succeeded,
        failed = stats.failed,
        timed_out = stats.timed_out,
        panicked = stats.panicked,
        "run finished"
    );

    match first_error {
        Some(e) => (Err(e), stats),
        None => (Ok(()), stats),
    }
}
