use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Chunk {chunk_index} already exists for job {job_id}")]
    DuplicateChunk { job_id: String, chunk_index: u32 },

    #[error("Chunk {chunk_id} belongs to job {actual}, not {expected}")]
    ForeignChunk {
        chunk_id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
