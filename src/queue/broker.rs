use crate::jobs::ChunkTask;
use crate::queue::dispatcher::TaskDispatcher;
use crate::queue::store::{FjallQueue, QueueError, Result};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

/// TaskEnvelope wraps a ChunkTask with its sequence number
#[derive(Clone, Debug)]
pub struct TaskEnvelope {
    pub seq: u64,
    pub task: ChunkTask,
}

impl TaskEnvelope {
    fn sort_key(&self) -> (u8, std::cmp::Reverse<u32>, std::cmp::Reverse<u64>) {
        (
            self.task.priority,
            std::cmp::Reverse(self.task.chunk_index),
            std::cmp::Reverse(self.seq),
        )
    }
}

impl PartialEq for TaskEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for TaskEnvelope {}

impl PartialOrd for TaskEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Max-heap order: higher priority first, then lower chunk index, then
/// earlier submission.
impl Ord for TaskEnvelope {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// TaskBroker hands chunk tasks from the job manager to the worker pool
///
/// Architecture:
/// 1. Manager calls `broker.submit(task)`
/// 2. Broker persists the task to FjallQueue (atomic, get seq)
/// 3. Broker pushes TaskEnvelope{seq, task} onto a priority heap
/// 4. Idle workers pull from the heap via `next()`
///
/// When workers are all busy, tasks wait in the heap, so whichever worker
/// frees up next gets the highest-priority task rather than the oldest.
pub struct TaskBroker {
    queue: Arc<RwLock<FjallQueue>>,
    ready: Mutex<BinaryHeap<TaskEnvelope>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TaskBroker {
    pub fn new(queue: Arc<RwLock<FjallQueue>>) -> Self {
        Self {
            queue,
            ready: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Reload tasks that were persisted but never acknowledged
    ///
    /// Delivery is at-least-once: a task interrupted by a crash runs again.
    pub async fn recover(&self) -> Result<usize> {
        let pending = {
            let queue = self.queue.read().await;
            let mut live = Vec::new();
            for (seq, task) in queue.pending_tasks()? {
                if queue.is_cancelled(&task.task_id)? {
                    continue;
                }
                live.push(TaskEnvelope { seq, task });
            }
            live
        };

        let count = pending.len();
        for envelope in pending {
            self.push(envelope);
        }

        info!(count, "Recovered unacknowledged tasks");
        Ok(count)
    }

    /// Persist a task and make it visible to workers
    pub async fn enqueue(&self, task: ChunkTask) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let seq = {
            let queue = self.queue.write().await;
            queue.enqueue(&task)?
        };

        debug!(
            seq,
            task_id = %task.task_id,
            job_id = %task.job_id,
            chunk_index = task.chunk_index,
            priority = task.priority,
            "Task persisted to queue"
        );

        self.push(TaskEnvelope { seq, task });
        Ok(seq)
    }

    fn push(&self, envelope: TaskEnvelope) {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<TaskEnvelope> {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Wait for the next runnable task; `None` once the broker is closed
    ///
    /// Cancelled tasks are acknowledged and skipped here.
    pub async fn next(&self) -> Option<TaskEnvelope> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            while let Some(envelope) = self.pop() {
                match self.is_cancelled(&envelope.task.task_id).await {
                    Ok(true) => {
                        debug!(seq = envelope.seq, task_id = %envelope.task.task_id, "Skipping cancelled task");
                        if let Err(e) = self.acknowledge(&envelope.task.task_id).await {
                            warn!(task_id = %envelope.task.task_id, error = %e, "Failed to acknowledge cancelled task");
                        }
                    }
                    Ok(false) => return Some(envelope),
                    Err(e) => {
                        warn!(task_id = %envelope.task.task_id, error = %e, "Cancellation check failed, running task");
                        return Some(envelope);
                    }
                }
            }

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }

    pub async fn is_cancelled(&self, task_id: &str) -> Result<bool> {
        self.queue.read().await.is_cancelled(task_id)
    }

    /// Stop handing out tasks; waiting workers return `None`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        info!("Task broker closed");
    }

    /// Number of tasks waiting for a worker
    pub fn backlog(&self) -> usize {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check that the broker is open and its queue is readable
    pub async fn health_check(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.queue.read().await.health_check().is_ok()
    }
}

#[async_trait]
impl TaskDispatcher for TaskBroker {
    async fn submit(&self, task: ChunkTask) -> Result<()> {
        self.enqueue(task).await?;
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<bool> {
        self.queue.write().await.mark_cancelled(task_id)
    }

    async fn acknowledge(&self, task_id: &str) -> Result<()> {
        self.queue.write().await.ack(task_id)?;
        Ok(())
    }

    async fn dead_letter(&self, task_id: &str, failure_message: &str, attempts: u32) -> Result<()> {
        self.queue
            .write()
            .await
            .move_to_dlq(task_id, failure_message.to_string(), attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Chunk, JobPartitioner};
    use std::time::Duration;
    use uuid::Uuid;
    use tempfile::TempDir;

    fn create_broker(temp_dir: &TempDir) -> (TaskBroker, Arc<RwLock<FjallQueue>>) {
        let queue = Arc::new(RwLock::new(FjallQueue::open(temp_dir.path()).unwrap()));
        (TaskBroker::new(queue.clone()), queue)
    }

    /// Submit one execution of `chunk` under a fresh task id
    async fn submit(broker: &TaskBroker, chunk: &Chunk) -> String {
        let task_id = Uuid::now_v7().to_string();
        let task = ChunkTask::for_chunk(chunk, &["cat".to_string()], task_id.clone());
        broker.submit(task).await.unwrap();
        task_id
    }

    #[tokio::test]
    async fn test_submit_then_next() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, queue) = create_broker(&temp_dir);
        let chunks = JobPartitioner::new(40, 5).partition("job1", 100, None);

        let task_id = submit(&broker, &chunks[0]).await;

        let envelope = broker.next().await.unwrap();
        assert_eq!(envelope.task.task_id, task_id);
        assert_eq!(envelope.task.chunk_id, chunks[0].chunk_id);
        assert_eq!(envelope.task.image_range, chunks[0].image_range);

        // Persisted until acknowledged
        assert!(queue.read().await.get_task(envelope.seq).unwrap().is_some());
        broker.acknowledge(&task_id).await.unwrap();
        assert!(queue.read().await.get_task(envelope.seq).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priority_then_index_ordering() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, _queue) = create_broker(&temp_dir);

        let low = JobPartitioner::new(10, 2).partition("low", 30, None);
        let high = JobPartitioner::new(10, 9).partition("high", 30, None);

        // Submit in an order unrelated to the expected dispatch order
        submit(&broker, &low[1]).await;
        submit(&broker, &high[2]).await;
        submit(&broker, &low[0]).await;
        submit(&broker, &high[0]).await;

        let mut order = Vec::new();
        for _ in 0..4 {
            let envelope = broker.next().await.unwrap();
            order.push((envelope.task.job_id, envelope.task.chunk_index));
        }

        assert_eq!(
            order,
            vec![
                ("high".to_string(), 0),
                ("high".to_string(), 2),
                ("low".to_string(), 0),
                ("low".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_task_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, queue) = create_broker(&temp_dir);
        let chunks = JobPartitioner::new(40, 5).partition("job1", 80, None);

        let first = submit(&broker, &chunks[0]).await;
        let second = submit(&broker, &chunks[1]).await;
        assert!(broker.cancel(&first).await.unwrap());

        let envelope = broker.next().await.unwrap();
        assert_eq!(envelope.task.task_id, second);
        assert!(queue.read().await.seq_for(&first).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waiting_worker_is_woken() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, _queue) = create_broker(&temp_dir);
        let broker = Arc::new(broker);
        let chunks = JobPartitioner::new(40, 5).partition("job1", 40, None);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        submit(&broker, &chunks[0]).await;
        let envelope = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(envelope.task.chunk_index, 0);
    }

    #[tokio::test]
    async fn test_close_releases_workers() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, _queue) = create_broker(&temp_dir);
        let broker = Arc::new(broker);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close();

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert!(!broker.health_check().await);
    }

    #[tokio::test]
    async fn test_recover_reloads_unacknowledged_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let chunks = JobPartitioner::new(40, 5).partition("job1", 80, None);

        {
            let (broker, queue) = create_broker(&temp_dir);
            let done = submit(&broker, &chunks[0]).await;
            submit(&broker, &chunks[1]).await;
            broker.acknowledge(&done).await.unwrap();
            queue.read().await.flush().unwrap();
        }

        let (broker, _queue) = create_broker(&temp_dir);
        assert_eq!(broker.recover().await.unwrap(), 1);
        let envelope = broker.next().await.unwrap();
        assert_eq!(envelope.task.chunk_index, 1);
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let temp_dir = TempDir::new().unwrap();
        let (broker, queue) = create_broker(&temp_dir);
        let chunks = JobPartitioner::new(40, 5).partition("job1", 40, None);

        let task_id = submit(&broker, &chunks[0]).await;
        broker.dead_letter(&task_id, "boom", 3).await.unwrap();

        let dlq = queue.read().await.list_dlq(10).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].1.failure_message, "boom");
        assert_eq!(dlq[0].1.attempts, 3);
    }
}
