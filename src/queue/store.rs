use crate::jobs::ChunkTask;
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Dispatcher is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A chunk task that will never be retried again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterTask {
    pub task: ChunkTask,
    pub failure_message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// FjallQueue manages task persistence and DLQ using Fjall embedded database
///
/// Architecture:
/// - `tasks` partition: u64 (big-endian) → ChunkTask (JSON)
/// - `task_ids` partition: task_id → u64 (big-endian)
/// - `cancelled` partition: task_id → empty
/// - `metadata` partition: "next_seq" → u64 (atomic counter)
/// - `dlq` partition: u64 (big-endian) → DeadLetterTask (JSON)
///
/// A task stays in `tasks` from submission until its report has been
/// handled, so tasks interrupted by a crash are found again on restart.
pub struct FjallQueue {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    task_ids: PartitionHandle,
    cancelled: PartitionHandle,
    metadata: PartitionHandle,
    dlq: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
}

impl FjallQueue {
    /// Open or create a new FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening FjallQueue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let task_ids = keyspace.open_partition("task_ids", PartitionCreateOptions::default())?;
        let cancelled = keyspace.open_partition("cancelled", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;

        let current_seq = metadata
            .get(b"next_seq")?
            .map(|bytes| decode_seq(&bytes))
            .unwrap_or(0);

        info!("FjallQueue opened, current sequence: {}", current_seq);

        Ok(Self {
            keyspace,
            tasks,
            task_ids,
            cancelled,
            metadata,
            dlq,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
        })
    }

    /// Persist a task and return its sequence number
    pub fn enqueue(&self, task: &ChunkTask) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let key = seq.to_be_bytes().to_vec();

        let mut batch = self.keyspace.batch();
        batch.insert(&self.tasks, key.clone(), serde_json::to_vec(task)?);
        batch.insert(&self.task_ids, task.task_id.as_bytes(), key);
        batch.insert(&self.metadata, &b"next_seq"[..], (seq + 1).to_be_bytes().to_vec());
        batch.commit()?;

        debug!(seq, task_id = %task.task_id, chunk_id = %task.chunk_id, "Task enqueued");

        Ok(seq)
    }

    /// Retrieve a task by sequence number
    pub fn get_task(&self, seq: u64) -> Result<Option<ChunkTask>> {
        match self.tasks.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Sequence number assigned to `task_id`, if it was ever enqueued
    pub fn seq_for(&self, task_id: &str) -> Result<Option<u64>> {
        Ok(self
            .task_ids
            .get(task_id.as_bytes())?
            .map(|bytes| decode_seq(&bytes)))
    }

    /// Drop a finished task from the live set
    pub fn ack(&self, task_id: &str) -> Result<bool> {
        let Some(seq) = self.seq_for(task_id)? else {
            return Ok(false);
        };

        let mut batch = self.keyspace.batch();
        batch.remove(&self.tasks, seq.to_be_bytes().to_vec());
        batch.remove(&self.task_ids, task_id.as_bytes());
        batch.remove(&self.cancelled, task_id.as_bytes());
        batch.commit()?;

        debug!(seq, task_id, "Task acknowledged");
        Ok(true)
    }

    /// Flag a task so workers skip it; returns false for unknown tasks
    pub fn mark_cancelled(&self, task_id: &str) -> Result<bool> {
        if self.seq_for(task_id)?.is_none() {
            return Ok(false);
        }
        self.cancelled.insert(task_id.as_bytes(), Vec::new())?;
        info!(task_id, "Task cancelled");
        Ok(true)
    }

    pub fn is_cancelled(&self, task_id: &str) -> Result<bool> {
        Ok(self.cancelled.get(task_id.as_bytes())?.is_some())
    }

    /// Tasks persisted but never acknowledged, in sequence order
    pub fn pending_tasks(&self) -> Result<Vec<(u64, ChunkTask)>> {
        let mut results = Vec::new();
        for item in self.tasks.iter() {
            let (key, value) = item?;
            results.push((decode_seq(&key), serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    /// Move a task to the Dead Letter Queue (DLQ)
    ///
    /// Called when a chunk exhausts its retries.
    pub fn move_to_dlq(&self, task_id: &str, failure_message: String, attempts: u32) -> Result<()> {
        let seq = self
            .seq_for(task_id)?
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        let task = self
            .get_task(seq)?
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;

        let dlq_entry = DeadLetterTask {
            task,
            failure_message,
            attempts,
            failed_at: Utc::now(),
        };

        self.dlq
            .insert(seq.to_be_bytes().to_vec(), serde_json::to_vec(&dlq_entry)?)?;

        info!(seq, task_id, attempts, "Task moved to DLQ");
        Ok(())
    }

    /// Get a task from the DLQ by sequence number
    pub fn get_dlq_task(&self, seq: u64) -> Result<Option<DeadLetterTask>> {
        match self.dlq.get(seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List DLQ tasks (for debugging/inspection)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetterTask)>> {
        let mut results = Vec::new();

        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            results.push((decode_seq(&key), serde_json::from_slice(&value)?));
        }

        Ok(results)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(b"next_seq")?;
        Ok(())
    }
}

fn decode_seq(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().unwrap_or([0u8; 8]))
}
