use async_trait::async_trait;

use crate::jobs::ChunkTask;

use super::store::Result;

/// Task dispatcher seen by the job manager
///
/// Submission is at-least-once: a submitted task may run more than once,
/// and its report may arrive more than once.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Queue one execution of a chunk under `task.task_id`
    ///
    /// The caller records the task id on the chunk before submitting, so a
    /// report can never arrive for an id the ledger has not seen.
    async fn submit(&self, task: ChunkTask) -> Result<()>;

    /// Prevent a queued task from starting. Running tasks are not interrupted.
    async fn cancel(&self, task_id: &str) -> Result<bool>;

    /// The task's report has been applied; forget it
    async fn acknowledge(&self, task_id: &str) -> Result<()>;

    /// Keep a record of a task whose chunk failed for good
    async fn dead_letter(&self, task_id: &str, failure_message: &str, attempts: u32) -> Result<()>;
}
