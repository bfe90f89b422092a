//! Event processor: queues, worker pool, monitor loop, graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_core::{defaults, Priority, Result, TelemetryEvent};
use pulse_router::EventRouter;

use crate::middleware::Middleware;
use crate::queue::{PriorityQueues, QueueDepths};
use crate::stats::{ProcessingStats, StatsSnapshot};
use crate::task::ProcessingTask;
use crate::worker::{Worker, WorkerMetrics, WorkerState, WorkerStatus};

/// Configuration for the event processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Workers spawned at startup.
    pub initial_workers: usize,
    /// Hard cap the monitor scales up to.
    pub max_workers: usize,
    pub queue_capacity_high: usize,
    pub queue_capacity_medium: usize,
    pub queue_capacity_low: usize,
    /// Monitor tick interval in milliseconds.
    pub monitor_interval_ms: u64,
    /// High-queue depth above which the monitor adds a worker.
    pub scale_up_high_depth: usize,
    /// Seconds a worker may sit in `Processing` before being flagged.
    pub stuck_worker_secs: i64,
    /// Grace period for draining queues on shutdown.
    pub shutdown_grace_secs: u64,
    /// Re-enqueue retry budget stamped onto every task.
    pub task_max_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            initial_workers: defaults::INITIAL_WORKERS,
            max_workers: defaults::MAX_WORKERS,
            queue_capacity_high: defaults::QUEUE_CAPACITY_HIGH,
            queue_capacity_medium: defaults::QUEUE_CAPACITY_MEDIUM,
            queue_capacity_low: defaults::QUEUE_CAPACITY_LOW,
            monitor_interval_ms: defaults::MONITOR_INTERVAL_MS,
            scale_up_high_depth: defaults::SCALE_UP_HIGH_DEPTH,
            stuck_worker_secs: defaults::STUCK_WORKER_SECS,
            shutdown_grace_secs: defaults::SHUTDOWN_GRACE_SECS,
            task_max_retries: defaults::TASK_MAX_RETRIES,
        }
    }
}

impl ProcessorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PULSE_INITIAL_WORKERS` | `4` | Workers spawned at startup |
    /// | `PULSE_MAX_WORKERS` | `8` | Auto-scaling ceiling |
    /// | `PULSE_QUEUE_CAPACITY_HIGH` | `100` | High-priority queue bound |
    /// | `PULSE_QUEUE_CAPACITY_MEDIUM` | `200` | Medium-priority queue bound |
    /// | `PULSE_QUEUE_CAPACITY_LOW` | `500` | Low-priority queue bound |
    /// | `PULSE_MONITOR_INTERVAL_MS` | `5000` | Monitor tick interval |
    /// | `PULSE_SCALE_UP_HIGH_DEPTH` | `20` | High-queue depth scale trigger |
    /// | `PULSE_STUCK_WORKER_SECS` | `60` | Stuck-worker flag threshold |
    /// | `PULSE_SHUTDOWN_GRACE_SECS` | `10` | Drain grace on shutdown |
    /// | `PULSE_TASK_MAX_RETRIES` | `3` | Re-enqueue retry budget |
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            initial_workers: parsed("PULSE_INITIAL_WORKERS", defaults.initial_workers).max(1),
            max_workers: parsed("PULSE_MAX_WORKERS", defaults.max_workers).max(1),
            queue_capacity_high: parsed("PULSE_QUEUE_CAPACITY_HIGH", defaults.queue_capacity_high),
            queue_capacity_medium: parsed(
                "PULSE_QUEUE_CAPACITY_MEDIUM",
                defaults.queue_capacity_medium,
            ),
            queue_capacity_low: parsed("PULSE_QUEUE_CAPACITY_LOW", defaults.queue_capacity_low),
            monitor_interval_ms: parsed("PULSE_MONITOR_INTERVAL_MS", defaults.monitor_interval_ms),
            scale_up_high_depth: parsed("PULSE_SCALE_UP_HIGH_DEPTH", defaults.scale_up_high_depth),
            stuck_worker_secs: parsed("PULSE_STUCK_WORKER_SECS", defaults.stuck_worker_secs),
            shutdown_grace_secs: parsed("PULSE_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace_secs),
            task_max_retries: parsed("PULSE_TASK_MAX_RETRIES", defaults.task_max_retries),
        }
    }

    pub fn with_initial_workers(mut self, n: usize) -> Self {
        self.initial_workers = n;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn with_queue_capacities(mut self, high: usize, medium: usize, low: usize) -> Self {
        self.queue_capacity_high = high;
        self.queue_capacity_medium = medium;
        self.queue_capacity_low = low;
        self
    }

    pub fn with_monitor_interval(mut self, ms: u64) -> Self {
        self.monitor_interval_ms = ms;
        self
    }

    pub fn with_shutdown_grace(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }
}

/// A spawned worker: its shared state plus the handles to stop it.
struct WorkerHandle {
    state: Arc<WorkerState>,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

struct Inner {
    config: ProcessorConfig,
    queues: Arc<PriorityQueues>,
    router: Arc<EventRouter>,
    stats: Arc<ProcessingStats>,
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    workers: Mutex<Vec<WorkerHandle>>,
    next_worker_id: AtomicUsize,
    initialized: AtomicBool,
    monitor: Mutex<Option<(mpsc::Sender<()>, JoinHandle<()>)>>,
}

/// Telemetry event processor.
///
/// Cheap to clone; all clones share the same queues, worker pool and
/// counters.
#[derive(Clone)]
pub struct EventProcessor {
    inner: Arc<Inner>,
}

impl EventProcessor {
    /// Spawn the initial worker pool and the monitor loop.
    ///
    /// Idempotent: a second call is a no-op.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            debug!("processor already initialized");
            return;
        }

        let initial = self
            .inner
            .config
            .initial_workers
            .min(self.inner.config.max_workers);
        for _ in 0..initial {
            self.spawn_worker().await;
        }

        let (monitor_tx, monitor_rx) = mpsc::channel(1);
        let inner = self.inner.clone();
        let join = tokio::spawn(async move {
            inner.run_monitor(monitor_rx).await;
        });
        *self.inner.monitor.lock().await = Some((monitor_tx, join));

        info!(
            workers = self.inner.config.initial_workers,
            max_workers = self.inner.config.max_workers,
            "event processor started"
        );
    }

    /// Classify and enqueue one event. Returns the task id.
    ///
    /// Fails with a validation error for malformed events and a queue-full
    /// error when the target tier is at capacity; in both cases nothing is
    /// enqueued.
    pub fn process_event(&self, event: TelemetryEvent) -> Result<Uuid> {
        event.validate()?;
        let priority = Priority::classify(&event.event_type);
        let task = ProcessingTask::new(event, priority)
            .with_max_retries(self.inner.config.task_max_retries);
        let task_id = task.task_id;
        self.inner.queues.push(task)?;
        Ok(task_id)
    }

    /// Enqueue a batch, one outcome per event in input order.
    ///
    /// A failed event never affects its siblings.
    pub fn process_batch(&self, events: Vec<TelemetryEvent>) -> Vec<Result<Uuid>> {
        events
            .into_iter()
            .map(|event| self.process_event(event))
            .collect()
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.inner.queues.depths()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub async fn active_workers(&self) -> usize {
        self.inner.workers.lock().await.len()
    }

    pub async fn worker_metrics(&self) -> Vec<WorkerMetrics> {
        self.inner
            .workers
            .lock()
            .await
            .iter()
            .map(|w| w.state.metrics())
            .collect()
    }

    async fn spawn_worker(&self) {
        self.inner.clone().spawn_worker().await;
    }

    /// Stop the monitor and workers, draining queues within the grace
    /// period. Workers still running when the grace expires are aborted.
    pub async fn shutdown(&self) {
        info!(
            pending = self.inner.queues.total_len(),
            grace_secs = self.inner.config.shutdown_grace_secs,
            "processor shutting down"
        );

        if let Some((monitor_tx, join)) = self.inner.monitor.lock().await.take() {
            let _ = monitor_tx.send(()).await;
            let _ = join.await;
        }

        let workers = std::mem::take(&mut *self.inner.workers.lock().await);
        for worker in &workers {
            let _ = worker.shutdown_tx.send(()).await;
        }

        // One grace period for the whole pool, not per worker.
        let deadline = Instant::now() + Duration::from_secs(self.inner.config.shutdown_grace_secs);
        for mut worker in workers {
            let worker_id = worker.state.worker_id();
            if timeout_at(deadline, &mut worker.join).await.is_err() {
                worker.join.abort();
                warn!(worker_id, "worker did not drain within grace, aborted");
            }
        }

        let leftover = self.inner.queues.total_len();
        if leftover > 0 {
            warn!(leftover, "tasks still queued after shutdown");
        }
        info!("processor stopped");
    }
}

impl Inner {
    async fn spawn_worker(self: Arc<Self>) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(WorkerState::new(worker_id));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = Worker::new(
            state.clone(),
            self.queues.clone(),
            self.router.clone(),
            self.stats.clone(),
            self.middlewares.clone(),
        );
        let join = tokio::spawn(worker.run(shutdown_rx));
        self.workers.lock().await.push(WorkerHandle {
            state,
            shutdown_tx,
            join,
        });
    }

    /// Periodic health check: scale the pool up under high-priority
    /// pressure and flag workers stuck in `Processing`.
    async fn run_monitor(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut tick = interval(Duration::from_millis(self.config.monitor_interval_ms));
        tick.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("monitor stopped");
                    return;
                }
                _ = tick.tick() => {}
            }

            let depths = self.queues.depths();
            let active = self.workers.lock().await.len();
            debug!(
                high = depths.high,
                medium = depths.medium,
                low = depths.low,
                workers = active,
                "monitor tick"
            );

            if depths.high > self.config.scale_up_high_depth && active < self.config.max_workers {
                info!(
                    high_depth = depths.high,
                    workers = active + 1,
                    "scaling up worker pool"
                );
                self.clone().spawn_worker().await;
            }

            for worker in self.workers.lock().await.iter() {
                if worker.state.status() == WorkerStatus::Processing
                    && worker.state.idle_secs() > self.config.stuck_worker_secs
                {
                    worker.state.set_status(WorkerStatus::Error);
                    warn!(
                        worker_id = worker.state.worker_id(),
                        idle_secs = worker.state.idle_secs(),
                        "worker appears stuck, flagged"
                    );
                }
            }
        }
    }
}

/// Builder for an [`EventProcessor`].
pub struct ProcessorBuilder {
    router: Arc<EventRouter>,
    config: ProcessorConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl ProcessorBuilder {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self {
            router,
            config: ProcessorConfig::default(),
            middlewares: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn build(self) -> EventProcessor {
        let queues = Arc::new(PriorityQueues::new(
            self.config.queue_capacity_high,
            self.config.queue_capacity_medium,
            self.config.queue_capacity_low,
        ));
        EventProcessor {
            inner: Arc::new(Inner {
                config: self.config,
                queues,
                router: self.router,
                stats: Arc::new(ProcessingStats::new()),
                middlewares: Arc::new(self.middlewares),
                workers: Mutex::new(Vec::new()),
                next_worker_id: AtomicUsize::new(0),
                initialized: AtomicBool::new(false),
                monitor: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::RequestLoggingMiddleware;
    use async_trait::async_trait;
    use pulse_core::{Error, LogErrorSink, MemoryPersistence};
    use pulse_router::EventHandler;
    use serde_json::json;
    use tokio::time::sleep;

    struct SleepHandler {
        event_type: String,
        dur: Duration,
    }

    #[async_trait]
    impl EventHandler for SleepHandler {
        fn event_type(&self) -> &str {
            &self.event_type
        }

        async fn handle(&self, _event: &TelemetryEvent) -> pulse_core::Result<()> {
            sleep(self.dur).await;
            Ok(())
        }
    }

    fn event(event_type: &str) -> TelemetryEvent {
        TelemetryEvent::new(event_type, Some("u1".into()), json!({}))
    }

    fn builder(persistence: Arc<MemoryPersistence>) -> ProcessorBuilder {
        let router = Arc::new(EventRouter::new(persistence, Arc::new(LogErrorSink)));
        ProcessorBuilder::new(router).with_middleware(Arc::new(RequestLoggingMiddleware))
    }

    /// Builder whose router runs `cell_executed` through a slow handler.
    async fn builder_with_slow_handler(dur: Duration) -> ProcessorBuilder {
        let router = Arc::new(EventRouter::new(
            Arc::new(MemoryPersistence::new()),
            Arc::new(LogErrorSink),
        ));
        router
            .register(Arc::new(SleepHandler {
                event_type: "cell_executed".into(),
                dur,
            }))
            .await;
        ProcessorBuilder::new(router)
    }

    #[test]
    fn test_config_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.initial_workers, 4);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.queue_capacity_high, 100);
        assert_eq!(config.queue_capacity_medium, 200);
        assert_eq!(config.queue_capacity_low, 500);
        assert_eq!(config.scale_up_high_depth, 20);
        assert_eq!(config.shutdown_grace_secs, 10);
        assert_eq!(config.task_max_retries, 3);
    }

    #[test]
    fn test_config_builders() {
        let config = ProcessorConfig::default()
            .with_initial_workers(2)
            .with_max_workers(16)
            .with_queue_capacities(10, 20, 30)
            .with_monitor_interval(100)
            .with_shutdown_grace(1);
        assert_eq!(config.initial_workers, 2);
        assert_eq!(config.max_workers, 16);
        assert_eq!(config.queue_capacity_high, 10);
        assert_eq!(config.monitor_interval_ms, 100);
        assert_eq!(config.shutdown_grace_secs, 1);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let processor = builder(Arc::new(MemoryPersistence::new()))
            .with_config(ProcessorConfig::default().with_initial_workers(2))
            .build();
        processor.initialize().await;
        processor.initialize().await;
        assert_eq!(processor.active_workers().await, 2);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_process_event_classifies_priority() {
        let processor = builder(Arc::new(MemoryPersistence::new())).build();

        processor.process_event(event("cell_executed")).unwrap();
        processor.process_event(event("progress_update")).unwrap();
        processor.process_event(event("something_else")).unwrap();

        let depths = processor.queue_depths();
        assert_eq!(depths.high, 1);
        assert_eq!(depths.medium, 1);
        assert_eq!(depths.low, 1);
    }

    #[tokio::test]
    async fn test_process_event_rejects_invalid() {
        let processor = builder(Arc::new(MemoryPersistence::new())).build();
        let err = processor.process_event(event("")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(processor.queue_depths().total(), 0);
    }

    #[tokio::test]
    async fn test_process_event_queue_full() {
        let processor = builder(Arc::new(MemoryPersistence::new()))
            .with_config(ProcessorConfig::default().with_queue_capacities(2, 2, 2))
            .build();

        processor.process_event(event("cell_executed")).unwrap();
        processor.process_event(event("cell_executed")).unwrap();
        let err = processor.process_event(event("cell_executed")).unwrap_err();
        assert!(matches!(err, Error::QueueFull { .. }));
        // Other tiers unaffected
        processor.process_event(event("progress_update")).unwrap();
    }

    #[tokio::test]
    async fn test_process_batch_partial_success() {
        let processor = builder(Arc::new(MemoryPersistence::new())).build();

        let results = processor.process_batch(vec![
            event("cell_executed"),
            event(""),
            event("progress_update"),
        ]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(processor.queue_depths().total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_batch_drains() {
        let persistence = Arc::new(MemoryPersistence::new());
        let processor = builder(persistence.clone())
            .with_config(ProcessorConfig::default().with_initial_workers(2))
            .build();
        processor.initialize().await;

        let results = processor.process_batch((0..20).map(|_| event("quiz_answered")).collect());
        assert!(results.iter().all(|r| r.is_ok()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        processor.shutdown().await;

        assert_eq!(persistence.len(), 20);
        assert_eq!(processor.stats().processed, 20);
        assert_eq!(processor.queue_depths().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_scales_up_under_pressure() {
        let processor = builder_with_slow_handler(Duration::from_secs(30))
            .await
            .with_config(
                ProcessorConfig::default()
                    .with_initial_workers(1)
                    .with_max_workers(2)
                    .with_monitor_interval(50)
                    .with_shutdown_grace(1),
            )
            .build();
        processor.initialize().await;
        assert_eq!(processor.active_workers().await, 1);

        // With the lone worker stuck in a slow handler the high queue
        // stays deep, so the next monitor tick must add a worker.
        for _ in 0..60 {
            let _ = processor.process_event(event("cell_executed"));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(processor.active_workers().await, 2);

        // Capped at max_workers even under sustained pressure
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(processor.active_workers().await, 2);
        processor.shutdown().await;
    }

    // Real time: stuck detection compares wall-clock activity timestamps,
    // which a paused test clock does not advance.
    #[tokio::test]
    async fn test_monitor_flags_stuck_worker() {
        let config = ProcessorConfig {
            stuck_worker_secs: 0,
            ..ProcessorConfig::default()
                .with_initial_workers(1)
                .with_monitor_interval(100)
                .with_shutdown_grace(1)
        };
        let processor = builder_with_slow_handler(Duration::from_secs(600))
            .await
            .with_config(config)
            .build();
        processor.initialize().await;

        processor.process_event(event("cell_executed")).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let metrics = processor.worker_metrics().await;
        assert_eq!(metrics[0].status, WorkerStatus::Error);
        assert!(metrics[0].current_task_id.is_some());
        processor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_grace_is_shared_across_workers() {
        let processor = builder_with_slow_handler(Duration::from_secs(600))
            .await
            .with_config(
                ProcessorConfig::default()
                    .with_initial_workers(2)
                    .with_shutdown_grace(1),
            )
            .build();
        processor.initialize().await;

        processor.process_event(event("cell_executed")).unwrap();
        processor.process_event(event("cell_executed")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Both workers are mid-handler; the grace bounds the whole pool,
        // not each join in turn.
        let start = Instant::now();
        processor.shutdown().await;
        assert!(start.elapsed() <= Duration::from_millis(1500));
        assert_eq!(processor.active_workers().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_reports_after_stop() {
        let processor = builder(Arc::new(MemoryPersistence::new()))
            .with_config(ProcessorConfig::default().with_initial_workers(1))
            .build();
        processor.initialize().await;
        processor.shutdown().await;
        assert_eq!(processor.active_workers().await, 0);
    }
}
