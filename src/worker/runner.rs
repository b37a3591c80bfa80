//! Worker pool: pulls chunk tasks from the broker, runs them under the
//! soft/hard time limits and hands a [`ChunkReport`] to the job manager.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::chunk::ChunkWorker;
use crate::config::DispatcherConfig;
use crate::jobs::{ChunkOutcome, ChunkReport, ChunkTask};
use crate::queue::TaskBroker;

/// Per-task execution limits
#[derive(Debug, Clone, Copy)]
pub struct TimeLimits {
    /// Exceeding it only logs a warning
    pub soft: Duration,
    /// Exceeding it aborts the chunk; the chunk is reported failed
    pub hard: Duration,
}

impl From<&DispatcherConfig> for TimeLimits {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            soft: config.soft_time_limit.as_duration(),
            hard: config.hard_time_limit.as_duration(),
        }
    }
}

/// Run one task to an outcome. Never fails; every error becomes
/// [`ChunkOutcome::Failed`].
pub async fn run_task(worker: &ChunkWorker, task: &ChunkTask, limits: TimeLimits) -> ChunkOutcome {
    let execution = worker.execute(task);
    tokio::pin!(execution);

    let soft_deadline = tokio::time::sleep(limits.soft);
    tokio::pin!(soft_deadline);
    let hard_deadline = tokio::time::sleep(limits.hard);
    tokio::pin!(hard_deadline);
    let mut soft_expired = false;

    loop {
        tokio::select! {
            result = &mut execution => {
                return match result {
                    Ok(result) => ChunkOutcome::Completed(result),
                    Err(e) => {
                        let error = e.to_string();
                        ChunkOutcome::Failed {
                            error,
                            engine_results: e.into_engine_results(),
                        }
                    }
                };
            }
            _ = &mut soft_deadline, if !soft_expired => {
                soft_expired = true;
                warn!(
                    task_id = %task.task_id,
                    chunk_id = %task.chunk_id,
                    limit = ?limits.soft,
                    "Chunk exceeded soft time limit"
                );
            }
            _ = &mut hard_deadline => {
                error!(
                    task_id = %task.task_id,
                    chunk_id = %task.chunk_id,
                    limit = ?limits.hard,
                    "Chunk exceeded hard time limit, aborting"
                );
                return ChunkOutcome::Failed {
                    error: format!("hard time limit of {:?} exceeded", limits.hard),
                    engine_results: Vec::new(),
                };
            }
        }
    }
}

/// Fixed-size set of workers sharing one broker
pub struct WorkerPool {
    broker: Arc<TaskBroker>,
    worker: ChunkWorker,
    limits: TimeLimits,
    reports: mpsc::Sender<ChunkReport>,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<TaskBroker>,
        worker: ChunkWorker,
        limits: TimeLimits,
        reports: mpsc::Sender<ChunkReport>,
    ) -> Self {
        Self {
            broker,
            worker,
            limits,
            reports,
        }
    }

    /// Start `num_workers` workers. They exit once the broker is closed or
    /// the report channel is gone.
    pub fn spawn(self, num_workers: usize) -> Vec<JoinHandle<()>> {
        let pool = Arc::new(self);
        (0..num_workers.max(1))
            .map(|worker_id| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.work(worker_id).await })
            })
            .collect()
    }

    async fn work(&self, worker_id: usize) {
        info!(worker_id, "Worker started");

        while let Some(envelope) = self.broker.next().await {
            let task = envelope.task;
            info!(
                worker_id,
                seq = envelope.seq,
                task_id = %task.task_id,
                job_id = %task.job_id,
                chunk_index = task.chunk_index,
                attempt = task.attempt,
                "Running chunk task"
            );

            let outcome = run_task(&self.worker, &task, self.limits).await;
            let report = ChunkReport {
                task_id: task.task_id,
                job_id: task.job_id,
                chunk_id: task.chunk_id,
                outcome,
            };

            if self.reports.send(report).await.is_err() {
                warn!(worker_id, "Report channel closed, worker stopping");
                break;
            }
        }

        info!(worker_id, "Worker stopped");
    }
}
