//! Chunk execution.
//!
//! - [`engine`]: one backend working toward its fixed quota
//! - [`chunk`]: all backends for one chunk, concurrently
//! - [`runner`]: worker pool pulling tasks from the broker

pub mod chunk;
pub mod engine;
pub mod files;
pub mod runner;
pub mod variations;

pub use chunk::{ChunkError, ChunkWorker, allocate_quotas, chunk_dir};
pub use engine::{EngineExecutor, ExecutorSettings, new_downloads, variation_budget};
pub use files::count_files;
pub use runner::{TimeLimits, WorkerPool, run_task};
pub use variations::generate_variations;
