use crate::broker::Broker;
use crate::config::WorkerConfig;
use crate::executor::TaskExecutor;
use crate::progress::{ChannelProgressSink, ProgressUpdate};
use crate::reporter::Reporter;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strings_worker_core::{TaskDescriptor, TaskId, TaskLifecycle, TaskMetadata, TaskState, Task};
use strings_worker_protocol::{
    ClaimTaskRequest, HeartbeatRequest, RegisterWorkerRequest, TaskProgressRequest,
};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

const PROGRESS_QUEUE: usize = 256;

/// Worker process that claims and executes strings tasks
#[derive(Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
    worker_id: String,
    broker: Arc<dyn Broker>,
    executor: Arc<TaskExecutor>,
    reporter: Arc<Reporter>,
    slots: Arc<Semaphore>,
    in_flight: Arc<DashMap<TaskId, Instant>>,
    progress_rx: Arc<Mutex<Option<mpsc::Receiver<ProgressUpdate>>>>,
    shutdown: CancellationToken,
}

/// Marks a task id as executing until dropped
struct InFlightGuard {
    in_flight: Arc<DashMap<TaskId, Instant>>,
    task_id: TaskId,
}

impl InFlightGuard {
    /// Fails with the age of the running execution when the id is taken
    fn acquire(
        in_flight: &Arc<DashMap<TaskId, Instant>>,
        task_id: TaskId,
    ) -> Result<Self, Duration> {
        match in_flight.entry(task_id) {
            Entry::Occupied(entry) => Err(entry.get().elapsed()),
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                Ok(InFlightGuard {
                    in_flight: in_flight.clone(),
                    task_id,
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.task_id);
    }
}

impl Worker {
    pub fn new(config: WorkerConfig, broker: Arc<dyn Broker>, executor: TaskExecutor) -> Self {
        let worker_id = config.generate_worker_id();
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_QUEUE);
        let executor = executor.with_progress(Arc::new(ChannelProgressSink::new(progress_tx)));
        let reporter = Reporter::new(
            broker.clone(),
            worker_id.clone(),
            executor.config().retry_policy(),
        );

        Worker {
            slots: Arc::new(Semaphore::new(config.concurrency)),
            config: Arc::new(config),
            worker_id,
            broker,
            executor: Arc::new(executor),
            reporter: Arc::new(reporter),
            in_flight: Arc::new(DashMap::new()),
            progress_rx: Arc::new(Mutex::new(Some(progress_rx))),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Tasks currently executing
    pub fn active_tasks(&self) -> usize {
        self.config
            .concurrency
            .saturating_sub(self.slots.available_permits())
    }

    /// Run the worker until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            "Starting worker {} (concurrency: {})",
            self.worker_id, self.config.concurrency
        );

        self.broker
            .register(RegisterWorkerRequest {
                worker_id: self.worker_id.clone(),
                concurrency: self.config.concurrency,
                task_types: vec![TaskMetadata::strings()],
            })
            .await?;
        info!("Registered task type {}", strings_worker_core::TASK_TYPE);

        let heartbeat = tokio::spawn(self.clone().heartbeat_loop());
        let progress = self
            .progress_rx
            .lock()
            .take()
            .map(|rx| tokio::spawn(self.clone().forward_progress(rx)));

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => permit?,
            };

            if self.shutdown.is_cancelled() {
                break;
            }

            let claim = self
                .broker
                .claim(ClaimTaskRequest {
                    worker_id: self.worker_id.clone(),
                    task_types: vec![strings_worker_core::TASK_TYPE.to_string()],
                })
                .await;

            match claim {
                Ok(Some(task)) => {
                    let worker = self.clone();
                    let span = info_span!("task", task_id = %task.id);
                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            worker.process_task(task).await;
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => {
                    drop(permit);
                    self.idle().await;
                }
                Err(e) => {
                    warn!("Failed to claim task: {}", e);
                    drop(permit);
                    self.idle().await;
                }
            }
        }

        info!("Worker shutting down gracefully");
        self.graceful_shutdown().await;

        heartbeat.abort();
        if let Some(progress) = progress {
            progress.abort();
        }
        Ok(())
    }

    /// Execute one claimed task and report its result.
    ///
    /// Returns the state the task ended in. A task id that is already
    /// executing in this process is skipped and stays `Received`.
    pub async fn process_task(&self, task: Task) -> TaskState {
        let task_id = task.id;

        let _guard = match InFlightGuard::acquire(&self.in_flight, task_id) {
            Ok(guard) => guard,
            Err(running_for) => {
                warn!(
                    %task_id,
                    running_for_ms = running_for.as_millis() as u64,
                    "Task is already executing, ignoring duplicate delivery"
                );
                return TaskState::Received;
            }
        };

        info!(%task_id, retry = task.retry_count, "Executing task");
        let mut lifecycle = TaskLifecycle::new(task_id);

        let result = match TaskDescriptor::from_task(&task) {
            Ok(descriptor) => self.executor.execute_tracked(&descriptor, &mut lifecycle).await,
            Err(e) => Err(self.executor.reject(&mut lifecycle, e)),
        };

        match &result {
            Ok(execution) => info!(
                %task_id,
                artifacts = execution.artifacts.len(),
                strings = execution.string_count(),
                elapsed_ms = execution.elapsed.as_millis() as u64,
                "Task completed successfully"
            ),
            Err(e) => error!(%task_id, kind = %e.kind, "Task failed: {}", e.message),
        }

        match self.reporter.report(&task, &result).await {
            Ok(_) => {
                if let Err(e) = lifecycle.advance(TaskState::Reported) {
                    error!(%task_id, "{}", e);
                }
                debug!(%task_id, "Task result acknowledged");
            }
            // The broker redelivers once the lease lapses; running the task
            // again here would duplicate work
            Err(e) => error!(%task_id, kind = %e.kind(), "{}", e),
        }

        lifecycle.state()
    }

    async fn idle(&self) {
        let pause = Duration::from_millis(self.config.idle_poll_interval_ms);
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }

    async fn heartbeat_loop(self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_secs));
        let mut system = sysinfo::System::new();
        let pid = sysinfo::Pid::from_u32(std::process::id());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    system.refresh_all();
                    let (cpu, memory) = system
                        .process(pid)
                        .map(|p| (p.cpu_usage(), p.memory() / 1024 / 1024))
                        .unwrap_or((0.0, 0));

                    let heartbeat = HeartbeatRequest {
                        worker_id: self.worker_id.clone(),
                        current_task_count: self.active_tasks(),
                        cpu_usage_percent: cpu,
                        memory_usage_mb: memory,
                    };
                    if let Err(e) = self.broker.heartbeat(heartbeat).await {
                        warn!("Failed to send heartbeat: {}", e);
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
    }

    async fn forward_progress(self, mut rx: mpsc::Receiver<ProgressUpdate>) {
        while let Some(update) = rx.recv().await {
            let request = TaskProgressRequest {
                task_id: update.task_id,
                worker_id: self.worker_id.clone(),
                extracted_strings: update.extracted_strings,
                rate: update.rate,
            };
            if let Err(e) = self.broker.progress(request).await {
                debug!(task_id = %update.task_id, "Failed to send progress: {}", e);
            }
        }
    }

    /// Graceful shutdown - wait for active tasks to complete
    async fn graceful_shutdown(&self) {
        info!("Waiting for active tasks to complete...");

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.graceful_shutdown_timeout_secs);

        loop {
            let active = self.active_tasks();

            if active == 0 {
                info!("All tasks completed, shutting down");
                break;
            }

            if tokio::time::Instant::now() > deadline {
                warn!("Shutdown deadline exceeded, {} tasks still active", active);
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
