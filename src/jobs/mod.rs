//! Crawl jobs: records, partitioning and the job manager.
//!
//! - [`JobPartitioner`] turns a job's `max_images` into fixed chunk ranges
//! - [`JobManager`] owns job/chunk state transitions, retries and progress
//! - [`models`] holds the records and the messages passed to workers

pub mod manager;
pub mod models;
pub mod partition;

pub use manager::{
    CANCELLED_MESSAGE, JobManager, ManagerError, ManagerSettings, ReportDisposition,
};
pub use models::{
    Chunk, ChunkOutcome, ChunkReport, ChunkResult, ChunkStatistics, ChunkStatus, ChunkTask,
    ENGINE_FAILURE_KEYWORD, EngineResult, ImageRange, Job, JobStatus, JobStatusView, NewJob,
    VariationResult,
};
pub use partition::{JobPartitioner, MAX_PRIORITY};
