use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::jobs::{Chunk, ChunkStatistics, ChunkStatus, Job};

use super::error::{LedgerError, Result};
use super::partitions::{
    encode_chunk_id_key, encode_chunk_key, encode_chunk_prefix, encode_job_key,
    encode_status_key, encode_status_prefix,
};

/// Number of mutexes each lock set is striped over
const LOCK_STRIPES: usize = 64;

/// Fixed set of mutexes shared by all record keys.
///
/// Every read-modify-write of a job or chunk runs under the stripe its key
/// hashes to, so concurrent reports for the same job are applied one after
/// another against the durable copy instead of racing on stale reads. The
/// set never grows; unrelated keys sharing a stripe only wait on each other.
#[derive(Clone)]
struct KeyedLocks {
    stripes: Arc<[Mutex<()>]>,
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl KeyedLocks {
    fn stripe_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fjall-backed durable store for job and chunk records
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    chunks: PartitionHandle,
    chunk_ids: PartitionHandle,
    chunk_status: PartitionHandle,
    job_locks: KeyedLocks,
    chunk_locks: KeyedLocks,
}

impl FjallStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let chunks = keyspace.open_partition("chunks", PartitionCreateOptions::default())?;
        let chunk_ids = keyspace.open_partition("chunk_ids", PartitionCreateOptions::default())?;
        let chunk_status =
            keyspace.open_partition("chunk_status", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            jobs,
            chunks,
            chunk_ids,
            chunk_status,
            job_locks: KeyedLocks::default(),
            chunk_locks: KeyedLocks::default(),
        })
    }

    /// Insert a job together with all of its chunks in one batch.
    ///
    /// `total_chunks` is set from `chunks.len()` as part of the same write, so
    /// no reader ever sees the job without its chunks. Fails if the job or any
    /// `(job_id, chunk_index)` pair already exists.
    pub fn create_job_with_chunks(&self, job: &Job, chunks: &[Chunk]) -> Result<Job> {
        let job_key = encode_job_key(&job.job_id);
        if self.jobs.get(&job_key)?.is_some() {
            return Err(LedgerError::DuplicateJob(job.job_id.clone()));
        }

        let mut seen = HashSet::new();
        for chunk in chunks {
            if chunk.job_id != job.job_id {
                return Err(LedgerError::ForeignChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    expected: job.job_id.clone(),
                    actual: chunk.job_id.clone(),
                });
            }
            let key = encode_chunk_key(&chunk.job_id, chunk.chunk_index);
            if !seen.insert(chunk.chunk_index) || self.chunks.get(&key)?.is_some() {
                return Err(LedgerError::DuplicateChunk {
                    job_id: chunk.job_id.clone(),
                    chunk_index: chunk.chunk_index,
                });
            }
        }

        let mut job = job.clone();
        job.total_chunks = chunks.len() as u32;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.jobs, job_key, serde_json::to_vec(&job)?);
        for chunk in chunks {
            let key = encode_chunk_key(&chunk.job_id, chunk.chunk_index);
            batch.insert(&self.chunks, key.clone(), serde_json::to_vec(chunk)?);
            batch.insert(&self.chunk_ids, encode_chunk_id_key(&chunk.chunk_id), key);
            batch.insert(
                &self.chunk_status,
                encode_status_key(&chunk.job_id, chunk.status, chunk.chunk_index),
                chunk.chunk_id.as_bytes(),
            );
        }
        batch.commit()?;

        debug!(job_id = %job.job_id, total_chunks = job.total_chunks, "Created job with chunks");
        Ok(job)
    }

    /// Get a job by ID
    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Apply `f` to the stored job and write it back, serialized per job id
    pub fn update_job<F>(&self, job_id: &str, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let _guard = self.job_locks.lock(job_id);

        let mut job = self
            .get_job(job_id)?
            .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))?;
        f(&mut job);
        self.jobs
            .insert(encode_job_key(job_id), serde_json::to_vec(&job)?)?;

        debug!(job_id, status = ?job.status, progress = job.progress, "Updated job");
        Ok(job)
    }

    /// Jobs that have not reached `completed` or `failed`
    pub fn unfinished_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for item in self.jobs.iter() {
            let (_, value) = item?;
            let job: Job = serde_json::from_slice(&value)?;
            if !job.status.is_terminal() {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Get a chunk by its ID
    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let Some(key) = self.chunk_ids.get(encode_chunk_id_key(chunk_id))? else {
            return Ok(None);
        };
        match self.chunks.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Apply `f` to the stored chunk, serialized per chunk id.
    ///
    /// `f` returns `false` to leave the record untouched, in which case
    /// `Ok(None)` is returned. The `(job_id, status)` index follows the
    /// record in the same batch.
    pub fn update_chunk<F>(&self, chunk_id: &str, f: F) -> Result<Option<Chunk>>
    where
        F: FnOnce(&mut Chunk) -> bool,
    {
        let _guard = self.chunk_locks.lock(chunk_id);

        let mut chunk = self
            .get_chunk(chunk_id)?
            .ok_or_else(|| LedgerError::ChunkNotFound(chunk_id.to_string()))?;
        let previous_status = chunk.status;

        if !f(&mut chunk) {
            return Ok(None);
        }
        chunk.updated_at = Utc::now();

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.chunks,
            encode_chunk_key(&chunk.job_id, chunk.chunk_index),
            serde_json::to_vec(&chunk)?,
        );
        if previous_status != chunk.status {
            batch.remove(
                &self.chunk_status,
                encode_status_key(&chunk.job_id, previous_status, chunk.chunk_index),
            );
            batch.insert(
                &self.chunk_status,
                encode_status_key(&chunk.job_id, chunk.status, chunk.chunk_index),
                chunk.chunk_id.as_bytes(),
            );
        }
        batch.commit()?;

        debug!(
            chunk_id,
            job_id = %chunk.job_id,
            from = ?previous_status,
            to = ?chunk.status,
            retry_count = chunk.retry_count,
            "Updated chunk"
        );
        Ok(Some(chunk))
    }

    /// All chunks of a job in `chunk_index` order
    pub fn list_chunks(&self, job_id: &str) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for item in self.chunks.prefix(encode_chunk_prefix(job_id)) {
            let (_, value) = item?;
            chunks.push(serde_json::from_slice(&value)?);
        }
        Ok(chunks)
    }

    /// Chunks of a job currently in `status`, in `chunk_index` order
    pub fn chunks_by_status(&self, job_id: &str, status: ChunkStatus) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for item in self.chunk_status.prefix(encode_status_prefix(job_id, status)) {
            let (_, chunk_id) = item?;
            let chunk_id = String::from_utf8_lossy(&chunk_id).to_string();
            if let Some(chunk) = self.get_chunk(&chunk_id)? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Per-status chunk counts, read from the status index only
    pub fn chunk_statistics(&self, job_id: &str) -> Result<ChunkStatistics> {
        let mut stats = ChunkStatistics::default();
        for status in ChunkStatus::ALL {
            let mut count = 0;
            for item in self.chunk_status.prefix(encode_status_prefix(job_id, status)) {
                item?;
                count += 1;
            }
            match status {
                ChunkStatus::Pending => stats.pending = count,
                ChunkStatus::Processing => stats.processing = count,
                ChunkStatus::Completed => stats.completed = count,
                ChunkStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut job_count = 0;
        let mut chunk_count = 0;

        for item in self.jobs.iter() {
            item?;
            job_count += 1;
        }

        for item in self.chunks.iter() {
            item?;
            chunk_count += 1;
        }

        Ok(StoreStats {
            job_count,
            chunk_count,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub job_count: usize,
    pub chunk_count: usize,
}
