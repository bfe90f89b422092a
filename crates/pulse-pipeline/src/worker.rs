//! Async workers pulling tasks from the priority queues.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pulse_core::defaults;
use pulse_router::EventRouter;

use crate::middleware::Middleware;
use crate::queue::PriorityQueues;
use crate::stats::ProcessingStats;
use crate::task::ProcessingTask;

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Processing,
    /// Flagged by the monitor after staying in `Processing` too long.
    Error,
    Shutdown,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Error => "error",
            WorkerStatus::Shutdown => "shutdown",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerStatus::Processing,
            2 => WorkerStatus::Error,
            3 => WorkerStatus::Shutdown,
            _ => WorkerStatus::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerStatus::Idle => 0,
            WorkerStatus::Processing => 1,
            WorkerStatus::Error => 2,
            WorkerStatus::Shutdown => 3,
        }
    }
}

/// Shared mutable state of one worker, readable by the monitor loop.
///
/// The worker updates this as it runs; the monitor reads it to decide on
/// scaling and stuck detection. All fields are atomics so neither side
/// blocks the other.
pub struct WorkerState {
    worker_id: usize,
    status: AtomicU8,
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    total_processing_ms: AtomicU64,
    last_activity_ms: AtomicI64,
    current_task: std::sync::Mutex<Option<Uuid>>,
}

impl WorkerState {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            status: AtomicU8::new(WorkerStatus::Idle.as_u8()),
            tasks_processed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_processing_ms: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            current_task: std::sync::Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: WorkerStatus) {
        self.status.store(status.as_u8(), Ordering::Relaxed);
    }

    /// Record liveness.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_failure(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn set_current_task(&self, task_id: Option<Uuid>) {
        *self.current_task.lock().unwrap() = task_id;
    }

    pub fn current_task(&self) -> Option<Uuid> {
        *self.current_task.lock().unwrap()
    }

    /// Seconds since the worker last made progress.
    pub fn idle_secs(&self) -> i64 {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        (Utc::now().timestamp_millis() - last) / 1000
    }

    pub fn metrics(&self) -> WorkerMetrics {
        let processed = self.tasks_processed.load(Ordering::Relaxed);
        let total_ms = self.total_processing_ms.load(Ordering::Relaxed);
        let last_ms = self.last_activity_ms.load(Ordering::Relaxed);
        WorkerMetrics {
            worker_id: self.worker_id,
            status: self.status(),
            tasks_processed: processed,
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            avg_processing_ms: if processed > 0 { total_ms / processed } else { 0 },
            last_activity: Utc
                .timestamp_millis_opt(last_ms)
                .single()
                .unwrap_or_else(Utc::now),
            current_task_id: self.current_task(),
        }
    }
}

/// Point-in-time view of one worker for stats endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetrics {
    pub worker_id: usize,
    pub status: WorkerStatus,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub avg_processing_ms: u64,
    pub last_activity: DateTime<Utc>,
    pub current_task_id: Option<Uuid>,
}

/// One queue-polling worker.
///
/// Polls the queues in strict priority order; when all are empty it sleeps
/// for the idle poll interval instead of spinning. On a shutdown signal it
/// drains what is already queued, then exits.
pub(crate) struct Worker {
    state: Arc<WorkerState>,
    queues: Arc<PriorityQueues>,
    router: Arc<EventRouter>,
    stats: Arc<ProcessingStats>,
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    idle_poll: Duration,
}

impl Worker {
    pub(crate) fn new(
        state: Arc<WorkerState>,
        queues: Arc<PriorityQueues>,
        router: Arc<EventRouter>,
        stats: Arc<ProcessingStats>,
        middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    ) -> Self {
        Self {
            state,
            queues,
            router,
            stats,
            middlewares,
            idle_poll: Duration::from_millis(defaults::WORKER_IDLE_POLL_MS),
        }
    }

    pub(crate) async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(worker_id = self.state.worker_id, "worker started");
        let mut draining = false;

        loop {
            if !draining && shutdown_rx.try_recv().is_ok() {
                draining = true;
                debug!(worker_id = self.state.worker_id, "worker draining");
            }

            match self.queues.try_pop_next() {
                Some(task) => self.process(task).await,
                None if draining => break,
                None => {
                    self.state.set_status(WorkerStatus::Idle);
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            draining = true;
                        }
                        _ = sleep(self.idle_poll) => {}
                    }
                }
            }
        }

        self.state.set_status(WorkerStatus::Shutdown);
        info!(worker_id = self.state.worker_id, "worker stopped");
    }

    /// Dispatch one task, re-enqueueing on retryable failure.
    async fn process(&self, mut task: ProcessingTask) {
        self.state.set_status(WorkerStatus::Processing);
        self.state.set_current_task(Some(task.task_id));
        self.state.touch();

        for mw in self.middlewares.iter() {
            mw.before(&task.event).await;
        }

        let start = Instant::now();
        let outcome = self.router.dispatch_once(&task.event).await;
        let elapsed = start.elapsed();

        for mw in self.middlewares.iter() {
            mw.after(&task.event, &outcome, elapsed).await;
        }

        match outcome {
            Ok(()) => {
                self.stats.record_processed();
                self.state.record_success(elapsed);
                debug!(
                    worker_id = self.state.worker_id,
                    task_id = %task.task_id,
                    event_type = %task.event.event_type,
                    duration_ms = elapsed.as_millis() as u64,
                    "task completed"
                );
            }
            Err(e) if !e.is_retryable() => {
                self.stats.record_failed();
                self.state.record_failure();
                warn!(
                    worker_id = self.state.worker_id,
                    task_id = %task.task_id,
                    error = %e,
                    "task rejected, not retried"
                );
            }
            Err(e) => {
                task.retries += 1;
                if task.can_retry() {
                    self.stats.record_retry();
                    let delay = task.reenqueue_delay();
                    warn!(
                        worker_id = self.state.worker_id,
                        task_id = %task.task_id,
                        retries = task.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "task failed, re-enqueueing after backoff"
                    );
                    // Backoff runs off-worker so the pool keeps draining.
                    let queues = self.queues.clone();
                    let stats = self.stats.clone();
                    let state = self.state.clone();
                    let router = self.router.clone();
                    tokio::spawn(async move {
                        sleep(delay).await;
                        let task_id = task.task_id;
                        let event = task.event.clone();
                        if let Err(push_err) = queues.push(task) {
                            stats.record_failed();
                            state.record_failure();
                            error!(
                                task_id = %task_id,
                                error = %push_err,
                                "dropping task, re-enqueue target full"
                            );
                            router.report_failure(&event, &push_err).await;
                        }
                    });
                } else {
                    self.stats.record_failed();
                    self.state.record_failure();
                    error!(
                        worker_id = self.state.worker_id,
                        task_id = %task.task_id,
                        event_type = %task.event.event_type,
                        retries = task.retries - 1,
                        error = %e,
                        "task failed permanently, retry budget exhausted"
                    );
                    self.router.report_failure(&task.event, &e).await;
                }
            }
        }

        self.state.set_current_task(None);
        self.state.set_status(WorkerStatus::Idle);
        self.state.touch();
    }
}
