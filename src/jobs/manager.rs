//! Job manager: owns job-level state and every chunk state transition.
//!
//! Workers only report outcomes. Whether a failed chunk is retried, when a
//! job is finished and what its final status is are all decided here, so
//! the retry policy can be exercised without running any worker.
//!
//! Reports are delivered at least once. A report is applied only if its
//! `task_id` is the chunk's current task and the chunk is still
//! `processing`; anything else is acknowledged and dropped.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{
    Chunk, ChunkOutcome, ChunkReport, ChunkResult, ChunkStatistics, ChunkStatus, ChunkTask, Job,
    JobStatus, JobStatusView, NewJob,
};
use super::partition::{JobPartitioner, MAX_PRIORITY};
use crate::config::{ChunkingConfig, CompletionPolicy, DispatcherConfig};
use crate::ledger::{FjallStore, LedgerError};
use crate::observability::Metrics;
use crate::queue::{QueueError, TaskDispatcher};

/// Error text recorded on chunks failed by [`JobManager::cancel_job`]
pub const CANCELLED_MESSAGE: &str = "cancelled";

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Dispatcher error: {0}")]
    Dispatcher(#[from] QueueError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// What [`JobManager::handle_report`] did with a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    Completed,
    Retried,
    FailedPermanently,
    /// Duplicate, stale or for a chunk that is already terminal
    Ignored,
}

enum FailureDecision {
    Stale,
    Retry,
    Permanent,
}

/// Manager tunables, taken from `[chunking]` and `[dispatcher]`
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub chunk_size: u32,
    pub default_priority: u8,
    pub max_retries: u32,
    pub completion_policy: CompletionPolicy,
    /// Max in-flight chunks per job; 0 means no limit
    pub dispatch_window: u32,
}

impl ManagerSettings {
    pub fn from_config(chunking: &ChunkingConfig, dispatcher: &DispatcherConfig) -> Self {
        Self {
            chunk_size: chunking.chunk_size,
            default_priority: chunking.default_priority,
            max_retries: chunking.max_retries,
            completion_policy: chunking.completion_policy,
            dispatch_window: dispatcher.dispatch_window,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default(), &DispatcherConfig::default())
    }
}

/// Mark the job terminal once every chunk is terminal; true on transition
fn finalize_if_done(job: &mut Job, policy: CompletionPolicy) -> bool {
    if job.status.is_terminal() || !job.all_chunks_finished() {
        return false;
    }

    job.status = match (job.failed_chunks, policy) {
        (0, _) => JobStatus::Completed,
        (_, CompletionPolicy::Partial) if job.completed_chunks > 0 => JobStatus::Completed,
        _ => JobStatus::Failed,
    };
    job.progress = 100;
    job.active_chunks = 0;
    job.completed_at = Some(Utc::now());
    true
}

fn record_progress(job: &mut Job) {
    // Never move backwards, whatever order reports arrive in
    job.progress = job.progress.max(job.computed_progress());
}

pub struct JobManager {
    store: FjallStore,
    dispatcher: Arc<dyn TaskDispatcher>,
    partitioner: JobPartitioner,
    settings: ManagerSettings,
    metrics: Arc<Metrics>,
}

impl JobManager {
    pub fn new(
        store: FjallStore,
        dispatcher: Arc<dyn TaskDispatcher>,
        settings: ManagerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            partitioner: JobPartitioner::new(settings.chunk_size, settings.default_priority),
            settings,
            metrics,
        }
    }

    pub fn store(&self) -> &FjallStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Validate, partition, persist and dispatch the first wave of chunks
    pub async fn create_job(&self, new_job: NewJob) -> Result<String> {
        let keywords: Vec<String> = new_job
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(ManagerError::InvalidJob(
                "at least one non-empty keyword is required".to_string(),
            ));
        }
        if let Some(priority) = new_job.priority.filter(|p| *p > MAX_PRIORITY) {
            return Err(ManagerError::InvalidJob(format!(
                "priority {} exceeds {}",
                priority, MAX_PRIORITY
            )));
        }

        let job_id = Uuid::now_v7().to_string();
        let chunks = self
            .partitioner
            .partition(&job_id, new_job.max_images, new_job.priority);

        let mut job = Job::new(
            job_id.clone(),
            new_job.project_id,
            keywords,
            new_job.max_images,
        );
        if chunks.is_empty() {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.started_at = Some(now);
            job.completed_at = Some(now);
        }

        let job = self.store.create_job_with_chunks(&job, &chunks)?;
        self.metrics.job_created();
        info!(
            job_id = %job.job_id,
            project_id = %job.project_id,
            max_images = job.max_images,
            total_chunks = job.total_chunks,
            "Job created"
        );

        if job.status.is_terminal() {
            self.metrics.job_completed();
            return Ok(job_id);
        }

        let dispatched = self.dispatch_pending(&job_id).await?;
        debug!(job_id = %job_id, dispatched, "First dispatch wave submitted");
        Ok(job_id)
    }

    /// Submit pending chunks of `job_id` until the dispatch window is full.
    ///
    /// Pending chunks come from the `(job_id, pending)` index and go out by
    /// priority (highest first), then `chunk_index`. Returns the number of
    /// chunks submitted.
    pub async fn dispatch_pending(&self, job_id: &str) -> Result<u32> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| ManagerError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(0);
        }

        let mut free = match self.settings.dispatch_window {
            0 => u32::MAX,
            window => {
                let in_flight = self.store.chunk_statistics(job_id)?.processing;
                window.saturating_sub(in_flight)
            }
        };
        if free == 0 {
            return Ok(0);
        }

        let mut pending = self.store.chunks_by_status(job_id, ChunkStatus::Pending)?;
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });

        let mut dispatched = 0;
        for chunk in pending {
            if free == 0 {
                break;
            }
            if self.dispatch_chunk(&job, &chunk).await? {
                dispatched += 1;
                free -= 1;
            }
        }

        Ok(dispatched)
    }

    /// Claim one pending chunk and hand it to the dispatcher.
    ///
    /// Returns `false` if another caller claimed the chunk first.
    async fn dispatch_chunk(&self, job: &Job, chunk: &Chunk) -> Result<bool> {
        let task_id = Uuid::now_v7().to_string();

        let claimed = self.store.update_chunk(&chunk.chunk_id, |c| {
            if c.status != ChunkStatus::Pending {
                return false;
            }
            c.status = ChunkStatus::Processing;
            c.task_id = Some(task_id.clone());
            true
        })?;
        let Some(claimed) = claimed else {
            return Ok(false);
        };

        // A chunk enters `active_chunks` on its first dispatch only;
        // retried chunks never left it.
        let first_dispatch = claimed.retry_count == 0;
        self.store.update_job(&job.job_id, |j| {
            if first_dispatch {
                j.active_chunks += 1;
            }
            j.task_ids.push(task_id.clone());
            if j.status == JobStatus::Pending {
                j.status = JobStatus::Running;
            }
            j.started_at.get_or_insert_with(Utc::now);
        })?;

        let task = ChunkTask::for_chunk(&claimed, &job.keywords, task_id.clone());
        if let Err(e) = self.dispatcher.submit(task).await {
            error!(
                job_id = %job.job_id,
                chunk_id = %claimed.chunk_id,
                task_id = %task_id,
                error = %e,
                "Submit failed, returning chunk to pending"
            );
            self.store.update_chunk(&claimed.chunk_id, |c| {
                if c.task_id.as_deref() != Some(task_id.as_str()) {
                    return false;
                }
                c.status = ChunkStatus::Pending;
                true
            })?;
            self.store.update_job(&job.job_id, |j| {
                if first_dispatch {
                    j.active_chunks = j.active_chunks.saturating_sub(1);
                }
                j.task_ids.retain(|id| id != &task_id);
            })?;
            return Err(e.into());
        }

        self.metrics.chunk_dispatched();
        debug!(
            job_id = %job.job_id,
            chunk_id = %claimed.chunk_id,
            chunk_index = claimed.chunk_index,
            task_id = %task_id,
            attempt = claimed.retry_count,
            "Chunk dispatched"
        );
        Ok(true)
    }

    /// Completion handler for one worker report
    pub async fn handle_report(&self, report: ChunkReport) -> Result<ReportDisposition> {
        let disposition = match &report.outcome {
            ChunkOutcome::Completed(result) => self.apply_success(&report, result)?,
            ChunkOutcome::Failed { error, .. } => self.apply_failure(&report, error).await?,
        };

        // The task has been dealt with either way
        if let Err(e) = self.dispatcher.acknowledge(&report.task_id).await {
            warn!(task_id = %report.task_id, error = %e, "Failed to acknowledge task");
        }

        // A stale report may belong to a chunk already back in `pending`
        // whose resubmission never happened; refill the window either way.
        match self.dispatch_pending(&report.job_id).await {
            Ok(_) => {}
            Err(ManagerError::JobNotFound(_)) if disposition == ReportDisposition::Ignored => {}
            Err(e) => {
                warn!(
                    job_id = %report.job_id,
                    error = %e,
                    "Dispatch after report failed, leaving chunks pending for the next sweep"
                );
            }
        }
        Ok(disposition)
    }

    /// Dispatch pending chunks of every unfinished job.
    ///
    /// Picks up chunks left `pending` without a live task, e.g. after a
    /// failed resubmission or a restart. Returns the number of chunks
    /// submitted.
    pub async fn resume_pending(&self) -> Result<u32> {
        let mut dispatched = 0;
        for job in self.store.unfinished_jobs()? {
            match self.dispatch_pending(&job.job_id).await {
                Ok(n) => dispatched += n,
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Failed to resume job"),
            }
        }
        if dispatched > 0 {
            info!(dispatched, "Resumed pending chunks");
        }
        Ok(dispatched)
    }

    /// Whether the report belongs to the chunk's current, unfinished task
    fn is_current(chunk: &Chunk, report: &ChunkReport) -> bool {
        chunk.status == ChunkStatus::Processing
            && chunk.task_id.as_deref() == Some(report.task_id.as_str())
    }

    fn apply_success(
        &self,
        report: &ChunkReport,
        result: &ChunkResult,
    ) -> Result<ReportDisposition> {
        let updated = match self.store.update_chunk(&report.chunk_id, |c| {
            if !Self::is_current(c, report) {
                return false;
            }
            c.status = ChunkStatus::Completed;
            c.error_message = None;
            true
        }) {
            Ok(updated) => updated,
            Err(LedgerError::ChunkNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if updated.is_none() {
            debug!(task_id = %report.task_id, chunk_id = %report.chunk_id, "Ignoring stale success report");
            return Ok(ReportDisposition::Ignored);
        }

        let policy = self.settings.completion_policy;
        let mut finished = false;
        let job = self.store.update_job(&report.job_id, |j| {
            j.downloaded_images = j.downloaded_images.saturating_add(result.total_downloaded);
            // No validation stage: every new file counts as valid
            j.valid_images = j.valid_images.saturating_add(result.total_downloaded);
            j.total_images = j.total_images.saturating_add(result.files_on_disk);
            if j.status.is_terminal() {
                // Cancelled meanwhile; chunk counters were already rebuilt
                return;
            }
            j.active_chunks = j.active_chunks.saturating_sub(1);
            j.completed_chunks += 1;
            record_progress(j);
            finished = finalize_if_done(j, policy);
        })?;

        self.metrics.chunk_completed();
        info!(
            job_id = %job.job_id,
            chunk_id = %report.chunk_id,
            downloaded = result.total_downloaded,
            progress = job.progress,
            "Chunk completed"
        );
        if finished {
            self.note_job_finished(&job);
        }
        Ok(ReportDisposition::Completed)
    }

    async fn apply_failure(&self, report: &ChunkReport, error: &str) -> Result<ReportDisposition> {
        let max_retries = self.settings.max_retries;
        let mut decision = FailureDecision::Stale;

        let updated = match self.store.update_chunk(&report.chunk_id, |c| {
            if !Self::is_current(c, report) {
                return false;
            }
            c.error_message = Some(error.to_string());
            if c.retry_count < max_retries {
                c.retry_count += 1;
                c.status = ChunkStatus::Pending;
                decision = FailureDecision::Retry;
            } else {
                c.status = ChunkStatus::Failed;
                decision = FailureDecision::Permanent;
            }
            true
        }) {
            Ok(updated) => updated,
            Err(LedgerError::ChunkNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let Some(chunk) = updated else {
            debug!(task_id = %report.task_id, chunk_id = %report.chunk_id, "Ignoring stale failure report");
            return Ok(ReportDisposition::Ignored);
        };

        match decision {
            FailureDecision::Stale => Ok(ReportDisposition::Ignored),
            FailureDecision::Retry => {
                self.metrics.chunk_retried();
                warn!(
                    job_id = %chunk.job_id,
                    chunk_id = %chunk.chunk_id,
                    retry_count = chunk.retry_count,
                    max_retries,
                    error,
                    "Chunk failed, requeueing"
                );
                Ok(ReportDisposition::Retried)
            }
            FailureDecision::Permanent => {
                if let Err(e) = self
                    .dispatcher
                    .dead_letter(&report.task_id, error, chunk.retry_count)
                    .await
                {
                    warn!(task_id = %report.task_id, error = %e, "Failed to dead-letter task");
                }

                let policy = self.settings.completion_policy;
                let mut finished = false;
                let job = self.store.update_job(&report.job_id, |j| {
                    if j.status.is_terminal() {
                        return;
                    }
                    j.active_chunks = j.active_chunks.saturating_sub(1);
                    j.failed_chunks += 1;
                    record_progress(j);
                    finished = finalize_if_done(j, policy);
                })?;

                self.metrics.chunk_failed();
                error!(
                    job_id = %chunk.job_id,
                    chunk_id = %chunk.chunk_id,
                    retry_count = chunk.retry_count,
                    error,
                    "Chunk failed permanently"
                );
                if finished {
                    self.note_job_finished(&job);
                }
                Ok(ReportDisposition::FailedPermanently)
            }
        }
    }

    fn note_job_finished(&self, job: &Job) {
        match job.status {
            JobStatus::Completed => self.metrics.job_completed(),
            _ => self.metrics.job_failed(),
        }
        info!(
            job_id = %job.job_id,
            status = ?job.status,
            completed_chunks = job.completed_chunks,
            failed_chunks = job.failed_chunks,
            downloaded_images = job.downloaded_images,
            "Job finished"
        );
    }

    /// Cancel every outstanding task of a job and fail it.
    ///
    /// Non-terminal chunks become permanently `failed` with
    /// [`CANCELLED_MESSAGE`]. A job that is already terminal is left as is.
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatusView> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| ManagerError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return self.get_job_status(job_id);
        }

        let mut cancelled = 0;
        for chunk in self.store.list_chunks(job_id)? {
            if chunk.is_terminal() {
                continue;
            }
            if chunk.status == ChunkStatus::Processing {
                if let Some(task_id) = chunk.task_id.as_deref() {
                    if let Err(e) = self.dispatcher.cancel(task_id).await {
                        warn!(job_id, task_id, error = %e, "Failed to cancel task");
                    }
                }
            }

            let updated = self.store.update_chunk(&chunk.chunk_id, |c| {
                if c.is_terminal() {
                    return false;
                }
                c.status = ChunkStatus::Failed;
                c.error_message = Some(CANCELLED_MESSAGE.to_string());
                true
            })?;
            if updated.is_some() {
                cancelled += 1;
            }
        }

        let stats = self.store.chunk_statistics(job_id)?;
        let job = self.store.update_job(job_id, |j| {
            if j.status.is_terminal() {
                return;
            }
            j.completed_chunks = stats.completed;
            j.failed_chunks = stats.failed;
            j.active_chunks = 0;
            j.status = JobStatus::Failed;
            j.progress = 100;
            j.completed_at = Some(Utc::now());
        })?;

        self.metrics.job_failed();
        info!(job_id, cancelled, status = ?job.status, "Job cancelled");
        self.get_job_status(job_id)
    }

    /// Status, counters and the most recent chunk error of a job
    pub fn get_job_status(&self, job_id: &str) -> Result<JobStatusView> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| ManagerError::JobNotFound(job_id.to_string()))?;

        let last_error = self
            .store
            .list_chunks(job_id)?
            .into_iter()
            .filter(|c| c.error_message.is_some())
            .max_by_key(|c| c.updated_at)
            .and_then(|c| c.error_message);

        Ok(JobStatusView::from_job(&job, last_error))
    }

    pub fn get_chunk_statistics(&self, job_id: &str) -> Result<ChunkStatistics> {
        if self.store.get_job(job_id)?.is_none() {
            return Err(ManagerError::JobNotFound(job_id.to_string()));
        }
        Ok(self.store.chunk_statistics(job_id)?)
    }

    /// Poll until the job is terminal
    pub async fn wait_for_job(&self, job_id: &str, poll_interval: Duration) -> Result<JobStatusView> {
        loop {
            let status = self.get_job_status(job_id)?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Apply worker reports until every sender is gone.
    ///
    /// Every `sweep_interval`, unfinished jobs are also swept with
    /// [`JobManager::resume_pending`].
    pub async fn run_completion_loop(
        self: Arc<Self>,
        mut reports: mpsc::Receiver<ChunkReport>,
        sweep_interval: Duration,
    ) {
        info!("Completion loop started");
        let mut sweep = tokio::time::interval(sweep_interval.max(Duration::from_millis(1)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.reset();

        loop {
            tokio::select! {
                report = reports.recv() => {
                    let Some(report) = report else { break };
                    let task_id = report.task_id.clone();
                    match self.handle_report(report).await {
                        Ok(disposition) => debug!(task_id = %task_id, ?disposition, "Report handled"),
                        Err(e) => error!(task_id = %task_id, error = %e, "Failed to handle report"),
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.resume_pending().await {
                        warn!(error = %e, "Pending chunk sweep failed");
                    }
                }
            }
        }
        info!("Completion loop stopped");
    }
}
