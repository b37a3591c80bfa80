/// Fjall-based durable store for crawl jobs and their chunks
///
/// This is the only state shared between the job manager and the workers.
/// It keeps:
///
/// - Job records (target, status, progress and chunk rollup counters)
/// - Chunk records (image range, status, retry metadata, current task id)
/// - A chunk-id lookup and a `(job_id, status)` index over chunks
///
/// ## Consistency
///
/// Chunks are created in one batch together with their job, so
/// `total_chunks` never disagrees with the number of stored chunks.
/// Counter updates go through [`FjallStore::update_job`], which serializes
/// read-modify-write cycles per job id; reports for the same job arriving
/// from several workers at once are applied in turn.
///
/// ## Usage
///
/// ```rust,ignore
/// use crawlbox::ledger::FjallStore;
///
/// let store = FjallStore::open("data/ledger")?;
/// let job = store.create_job_with_chunks(&job, &chunks)?;
/// store.update_job(&job.job_id, |job| job.completed_chunks += 1)?;
/// ```

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{FjallStore, StoreStats};
