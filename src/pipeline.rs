//! Wires the ledger, task queue, job manager and worker pool together.
//!
//! Both the HTTP server and the one-shot `crawl` command run on top of a
//! [`Pipeline`].

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::engines::{EngineRegistry, RegistryError};
use crate::jobs::{JobManager, ManagerError, ManagerSettings};
use crate::ledger::{FjallStore, LedgerError};
use crate::observability::Metrics;
use crate::queue::{FjallQueue, QueueError, TaskBroker, TaskDispatcher};
use crate::worker::{ChunkWorker, ExecutorSettings, TimeLimits, WorkerPool};

/// Reports buffered per worker before workers block on the manager
const REPORTS_PER_WORKER: usize = 4;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to open ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to open task queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to build engines: {0}")]
    Engines(#[from] RegistryError),

    #[error("Failed to resume jobs: {0}")]
    Resume(#[from] ManagerError),
}

pub struct Pipeline {
    pub manager: Arc<JobManager>,
    pub broker: Arc<TaskBroker>,
    pub metrics: Arc<Metrics>,
    queue: Arc<RwLock<FjallQueue>>,
    workers: Vec<JoinHandle<()>>,
    completion: JoinHandle<()>,
}

impl Pipeline {
    /// Open storage, reload unacknowledged tasks and start the workers
    pub async fn start(config: &Config) -> Result<Self, PipelineError> {
        let store = FjallStore::open(config.server.ledger_path())?;

        let queue = Arc::new(RwLock::new(FjallQueue::open(config.server.queue_path())?));
        let broker = Arc::new(TaskBroker::new(queue.clone()));
        let recovered = broker.recover().await?;

        let registry = EngineRegistry::from_config(&config.engines)?;
        info!(engines = ?registry.names(), recovered, "Pipeline starting");

        let metrics = Arc::new(Metrics::new());
        let dispatcher: Arc<dyn TaskDispatcher> = broker.clone();
        let manager = Arc::new(JobManager::new(
            store,
            dispatcher,
            ManagerSettings::from_config(&config.chunking, &config.dispatcher),
            metrics.clone(),
        ));

        let num_workers = config.dispatcher.num_workers.max(1);
        let (reports_tx, reports_rx) = mpsc::channel(num_workers * REPORTS_PER_WORKER);
        let resumed = manager.resume_pending().await?;
        if resumed > 0 {
            info!(resumed, "Redispatched chunks left pending");
        }
        let completion = tokio::spawn(
            manager
                .clone()
                .run_completion_loop(reports_rx, config.dispatcher.sweep_interval.as_duration()),
        );

        let worker = ChunkWorker::new(
            registry,
            ExecutorSettings::from(&config.executor),
            config.executor.variation_suffixes.clone(),
            config.server.output_dir.clone(),
        );
        let workers = WorkerPool::new(
            broker.clone(),
            worker,
            TimeLimits::from(&config.dispatcher),
            reports_tx,
        )
        .spawn(num_workers);

        Ok(Self {
            manager,
            broker,
            metrics,
            queue,
            workers,
            completion,
        })
    }

    /// Stop handing out tasks, let running chunks finish, apply their
    /// reports and flush both stores.
    pub async fn shutdown(self) {
        self.broker.close();

        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        // Every report sender lived in the pool, so the loop drains and ends
        if let Err(e) = self.completion.await {
            warn!(error = %e, "Completion loop ended abnormally");
        }

        if let Err(e) = self.manager.store().persist() {
            warn!(error = %e, "Failed to persist ledger");
        }
        if let Err(e) = self.queue.read().await.flush() {
            warn!(error = %e, "Failed to flush task queue");
        }
        info!("Pipeline stopped");
    }
}
