//! Job and chunk records, plus the messages exchanged between the job
//! manager, the dispatcher and the chunk workers.
//!
//! A [`Job`] is one crawl request ("collect up to `max_images` images for
//! these keywords"). It is split into [`Chunk`]s, each owning a fixed
//! half-open [`ImageRange`] of the job's target. Chunks are shipped to
//! workers as [`ChunkTask`]s and come back as [`ChunkReport`]s.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse job-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Chunk state machine:
/// `pending -> processing -> completed | failed`, `failed -> pending` on requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub const ALL: [ChunkStatus; 4] = [
        ChunkStatus::Pending,
        ChunkStatus::Processing,
        ChunkStatus::Completed,
        ChunkStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Processing => "processing",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
        }
    }
}

/// Half-open interval `[start, end)` over a job's target image count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRange {
    pub start: u32,
    pub end: u32,
}

impl ImageRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of images this range stands for (the chunk quota)
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters for a new crawl job
#[derive(Debug, Clone, Builder)]
pub struct NewJob {
    #[builder(into)]
    pub project_id: String,
    pub keywords: Vec<String>,
    pub max_images: u32,
    /// Overrides `chunking.default_priority` for every chunk of this job
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub project_id: String,
    pub keywords: Vec<String>,
    pub max_images: u32,
    pub status: JobStatus,
    pub progress: u8,
    pub total_images: u32,
    pub downloaded_images: u32,
    /// Filled in by the validation stage, never by the crawl pipeline
    pub valid_images: u32,
    pub total_chunks: u32,
    pub active_chunks: u32,
    pub completed_chunks: u32,
    pub failed_chunks: u32,
    /// Every task id ever issued for this job, in dispatch order
    pub task_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_id: String, project_id: String, keywords: Vec<String>, max_images: u32) -> Self {
        Self {
            job_id,
            project_id,
            keywords,
            max_images,
            status: JobStatus::Pending,
            progress: 0,
            total_images: 0,
            downloaded_images: 0,
            valid_images: 0,
            total_chunks: 0,
            active_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            task_ids: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Chunks that reached a terminal state
    pub fn finished_chunks(&self) -> u32 {
        self.completed_chunks + self.failed_chunks
    }

    /// `floor(100 * finished / total)`; a job with no chunks is fully done.
    pub fn computed_progress(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        let pct = 100 * u64::from(self.finished_chunks()) / u64::from(self.total_chunks);
        pct.min(100) as u8
    }

    pub fn all_chunks_finished(&self) -> bool {
        self.finished_chunks() >= self.total_chunks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub job_id: String,
    pub chunk_index: u32,
    pub status: ChunkStatus,
    pub priority: u8,
    pub image_range: ImageRange,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// Quota this chunk represents; fixed for the chunk's lifetime
    pub fn quota(&self) -> u32 {
        self.image_range.len()
    }

    /// A chunk only rests in `failed` once its failure is permanent;
    /// retryable failures go straight back to `pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ChunkStatus::Completed | ChunkStatus::Failed)
    }
}

/// Unit of work handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub task_id: String,
    pub job_id: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    pub image_range: ImageRange,
    pub priority: u8,
    pub keywords: Vec<String>,
    /// 0 on first dispatch, equals the chunk's retry_count afterwards
    pub attempt: u32,
}

impl ChunkTask {
    pub fn for_chunk(chunk: &Chunk, keywords: &[String], task_id: String) -> Self {
        Self {
            task_id,
            job_id: chunk.job_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.chunk_index,
            image_range: chunk.image_range,
            priority: chunk.priority,
            keywords: keywords.to_vec(),
            attempt: chunk.retry_count,
        }
    }
}

/// Outcome of one keyword variation against one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationResult {
    pub keyword: String,
    pub offset: u32,
    pub downloaded: u32,
    pub success: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Keyword recorded on the synthetic entry appended when a backend aborts
pub const ENGINE_FAILURE_KEYWORD: &str = "engine_failure";

/// Contribution of one backend to one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub engine: String,
    pub target: u32,
    pub downloaded: u32,
    pub variations_attempted: u32,
    pub success_rate: f64,
    pub elapsed_ms: u64,
    pub variations: Vec<VariationResult>,
}

impl EngineResult {
    pub fn aborted(&self) -> bool {
        self.variations
            .iter()
            .any(|v| v.keyword == ENGINE_FAILURE_KEYWORD)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub total_downloaded: u32,
    /// Files present in the chunk's output location after the final recount
    pub files_on_disk: u32,
    pub engine_results: Vec<EngineResult>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Completed(ChunkResult),
    Failed {
        error: String,
        /// Kept for diagnostics; never counted toward job progress
        engine_results: Vec<EngineResult>,
    },
}

/// What a worker hands back to the job manager after running a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub task_id: String,
    pub job_id: String,
    pub chunk_id: String,
    pub outcome: ChunkOutcome,
}

/// Public view returned by `get_job_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub max_images: u32,
    pub total_images: u32,
    pub downloaded_images: u32,
    pub valid_images: u32,
    pub total_chunks: u32,
    pub active_chunks: u32,
    pub completed_chunks: u32,
    pub failed_chunks: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusView {
    pub fn from_job(job: &Job, last_error: Option<String>) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            progress: job.progress,
            max_images: job.max_images,
            total_images: job.total_images,
            downloaded_images: job.downloaded_images,
            valid_images: job.valid_images,
            total_chunks: job.total_chunks,
            active_chunks: job.active_chunks,
            completed_chunks: job.completed_chunks,
            failed_chunks: job.failed_chunks,
            last_error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStatistics {
    pub pending: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_range_len() {
        assert_eq!(ImageRange::new(40, 80).len(), 40);
        assert!(ImageRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_progress_floors() {
        let mut job = Job::new("j".into(), "p".into(), vec!["cat".into()], 100);
        job.total_chunks = 3;
        job.completed_chunks = 1;
        assert_eq!(job.computed_progress(), 33);
        job.failed_chunks = 1;
        assert_eq!(job.computed_progress(), 66);
        job.completed_chunks = 2;
        assert_eq!(job.computed_progress(), 100);
    }

    #[test]
    fn test_empty_job_progress_is_complete() {
        let job = Job::new("j".into(), "p".into(), vec!["cat".into()], 0);
        assert_eq!(job.computed_progress(), 100);
        assert!(job.all_chunks_finished());
    }

    #[test]
    fn test_chunk_status_serializes_snake_case() {
        let json = serde_json::to_string(&ChunkStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(ChunkStatus::Processing.as_str(), "processing");
    }

    #[test]
    fn test_outcome_tagging() {
        let outcome = ChunkOutcome::Failed {
            error: "disk gone".into(),
            engine_results: vec![],
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["error"], "disk gone");
    }

    #[test]
    fn test_new_job_builder() {
        let new_job = NewJob::builder()
            .project_id("proj")
            .keywords(vec!["cat".to_string()])
            .max_images(10)
            .build();
        assert_eq!(new_job.project_id, "proj");
        assert!(new_job.priority.is_none());
    }
}
