//! Chunk worker: runs every backend for one chunk and aggregates the result.
//!
//! Quotas are fixed before any backend starts ([`allocate_quotas`]), and
//! each backend writes only under `<chunk dir>/<engine name>`. Backends run
//! concurrently and share nothing in memory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::engine::{EngineExecutor, ExecutorSettings};
use super::files::count_files;
use super::variations::generate_variations;
use crate::engines::EngineRegistry;
use crate::jobs::{ChunkResult, ChunkTask, ENGINE_FAILURE_KEYWORD, EngineResult, VariationResult};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("no search engines configured")]
    NoEngines,

    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("recount of {path} failed: {source}")]
    Recount {
        path: PathBuf,
        #[source]
        source: io::Error,
        /// Kept for diagnostics only
        engine_results: Vec<EngineResult>,
    },
}

impl ChunkError {
    /// Per-backend results gathered before the error, if any
    pub fn into_engine_results(self) -> Vec<EngineResult> {
        match self {
            ChunkError::Recount { engine_results, .. } => engine_results,
            _ => Vec::new(),
        }
    }
}

/// Split `total` across `engines` backends: even shares, remainder to the
/// first backends. Always sums to `total`.
pub fn allocate_quotas(total: u32, engines: usize) -> Vec<u32> {
    if engines == 0 {
        return Vec::new();
    }
    let n = engines as u32;
    let base = total / n;
    let remainder = total % n;
    (0..n).map(|i| base + u32::from(i < remainder)).collect()
}

/// `<output_root>/<job_id>/chunk_<index>`
pub fn chunk_dir(output_root: &Path, job_id: &str, chunk_index: u32) -> PathBuf {
    output_root
        .join(job_id)
        .join(format!("chunk_{:04}", chunk_index))
}

fn engine_failure(engine: &str, target: u32, error: String) -> EngineResult {
    EngineResult {
        engine: engine.to_string(),
        target,
        downloaded: 0,
        variations_attempted: 0,
        success_rate: 0.0,
        elapsed_ms: 0,
        variations: vec![VariationResult {
            keyword: ENGINE_FAILURE_KEYWORD.to_string(),
            offset: 0,
            downloaded: 0,
            success: false,
            elapsed_ms: 0,
            error: Some(error),
        }],
    }
}

#[derive(Clone)]
pub struct ChunkWorker {
    registry: EngineRegistry,
    settings: ExecutorSettings,
    suffixes: Arc<Vec<String>>,
    output_root: PathBuf,
}

impl ChunkWorker {
    pub fn new(
        registry: EngineRegistry,
        settings: ExecutorSettings,
        suffixes: Vec<String>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            settings,
            suffixes: Arc::new(suffixes),
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Run one chunk to completion.
    ///
    /// Backend failures never fail the chunk; only a missing registry or an
    /// I/O error on the chunk directory does.
    pub async fn execute(&self, task: &ChunkTask) -> Result<ChunkResult, ChunkError> {
        if self.registry.is_empty() {
            return Err(ChunkError::NoEngines);
        }

        let started = Instant::now();
        let dir = chunk_dir(&self.output_root, &task.job_id, task.chunk_index);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ChunkError::Prepare {
                path: dir.clone(),
                source,
            })?;
        let initial_chunk_count =
            count_files(&dir)
                .await
                .map_err(|source| ChunkError::Prepare {
                    path: dir.clone(),
                    source,
                })?;

        let quota = task.image_range.len();
        let quotas = allocate_quotas(quota, self.registry.len());
        let variations = Arc::new(generate_variations(&task.keywords, &self.suffixes));

        info!(
            job_id = %task.job_id,
            chunk_id = %task.chunk_id,
            chunk_index = task.chunk_index,
            quota,
            ?quotas,
            variations = variations.len(),
            "Starting chunk"
        );

        let engines = self.registry.engines();
        let mut slots: Vec<Option<EngineResult>> = vec![None; engines.len()];
        let mut running = JoinSet::new();

        for (index, (engine, target)) in engines
            .iter()
            .cloned()
            .zip(quotas.iter().copied())
            .enumerate()
        {
            let engine_dir = dir.join(&engine.name);
            let executor = EngineExecutor::new(engine, self.settings.clone());
            let variations = Arc::clone(&variations);
            let page_start = task.image_range.start;

            running.spawn(async move {
                let result = match count_files(&engine_dir).await {
                    Ok(initial) => {
                        executor
                            .run(&variations, &engine_dir, target, initial, page_start)
                            .await
                    }
                    Err(e) => engine_failure(
                        executor.engine_name(),
                        target,
                        format!("snapshot of {} failed: {}", engine_dir.display(), e),
                    ),
                };
                (index, result)
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    error!(chunk_id = %task.chunk_id, error = %e, "Engine task did not finish")
                }
            }
        }

        // A slot is only empty when its task panicked
        let engine_results: Vec<EngineResult> = slots
            .into_iter()
            .zip(engines.iter().zip(quotas))
            .map(|(slot, (engine, target))| {
                slot.unwrap_or_else(|| {
                    engine_failure(&engine.name, target, "engine task panicked".to_string())
                })
            })
            .collect();

        let contributed: u32 = engine_results.iter().map(|r| r.downloaded).sum();

        let files_on_disk = match count_files(&dir).await {
            Ok(count) => count,
            Err(source) => {
                error!(chunk_id = %task.chunk_id, error = %source, "Chunk recount failed");
                return Err(ChunkError::Recount {
                    path: dir,
                    source,
                    engine_results,
                });
            }
        };
        let recounted = files_on_disk.saturating_sub(initial_chunk_count);
        if recounted != contributed {
            warn!(
                chunk_id = %task.chunk_id,
                contributed,
                recounted,
                "Recount disagrees with engine contributions"
            );
        }

        let result = ChunkResult {
            total_downloaded: contributed.max(recounted),
            files_on_disk,
            engine_results,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            job_id = %task.job_id,
            chunk_id = %task.chunk_id,
            total_downloaded = result.total_downloaded,
            files_on_disk,
            elapsed_ms = result.elapsed_ms,
            "Chunk finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engines::{Downloader, Engine};
    use crate::jobs::ImageRange;
    use crate::worker::engine::tests::{ScriptedDownloader, no_delay};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Writes a few files, then replaces the whole chunk directory with a
    /// plain file so that every later count of it fails.
    pub(crate) struct ClobberingDownloader;

    #[async_trait]
    impl Downloader for ClobberingDownloader {
        async fn download(
            &self,
            _keyword: &str,
            output_dir: &Path,
            _max_count: u32,
            _offset: u32,
        ) -> crate::engines::traits::Result<u32> {
            tokio::fs::create_dir_all(output_dir).await?;
            for i in 0..3 {
                tokio::fs::write(output_dir.join(format!("img_{i}.jpg")), b"img").await?;
            }
            if let Some(chunk) = output_dir.parent() {
                tokio::fs::remove_dir_all(chunk).await?;
                tokio::fs::write(chunk, b"not a directory").await?;
            }
            Ok(3)
        }
    }

    fn task(range: ImageRange) -> ChunkTask {
        task_at(0, range)
    }

    fn task_at(chunk_index: u32, range: ImageRange) -> ChunkTask {
        ChunkTask {
            task_id: format!("task-{chunk_index}"),
            job_id: "job-1".into(),
            chunk_id: format!("chunk-{chunk_index}"),
            chunk_index,
            image_range: range,
            priority: 5,
            keywords: vec!["cat".into()],
            attempt: 0,
        }
    }

    fn suffixes() -> Vec<String> {
        vec!["photo".into(), "hd".into(), "wallpaper".into()]
    }

    #[test]
    fn test_allocate_quotas_conserves_total() {
        assert_eq!(allocate_quotas(30, 2), vec![15, 15]);
        assert_eq!(allocate_quotas(10, 3), vec![4, 3, 3]);
        assert_eq!(allocate_quotas(2, 4), vec![1, 1, 0, 0]);
        assert!(allocate_quotas(5, 0).is_empty());

        for total in [0u32, 1, 7, 40, 99, 100] {
            for n in 1..=6 {
                let quotas = allocate_quotas(total, n);
                assert_eq!(quotas.len(), n);
                assert_eq!(quotas.iter().sum::<u32>(), total);
            }
        }
    }

    #[test]
    fn test_chunk_dir_layout() {
        assert_eq!(
            chunk_dir(Path::new("/out"), "job", 7),
            PathBuf::from("/out/job/chunk_0007")
        );
    }

    #[tokio::test]
    async fn test_two_engines_one_failing_late() {
        let out = TempDir::new().unwrap();
        let a = Arc::new(ScriptedDownloader::new(vec![Some(15)]));
        let b = Arc::new(ScriptedDownloader::new(vec![Some(5), Some(5), None]));
        let registry = EngineRegistry::new(vec![
            Engine::new("a", a.clone()),
            Engine::new("b", b.clone()),
        ]);

        let worker = ChunkWorker::new(registry, no_delay(), suffixes(), out.path());
        let result = worker.execute(&task(ImageRange::new(0, 30))).await.unwrap();

        assert_eq!(result.engine_results.len(), 2);
        assert_eq!(result.engine_results[0].engine, "a");
        assert_eq!(result.engine_results[0].target, 15);
        assert_eq!(result.engine_results[0].downloaded, 15);
        assert_eq!(result.engine_results[1].target, 15);
        assert_eq!(result.engine_results[1].downloaded, 10);
        assert_eq!(result.engine_results[1].variations_attempted, 3);
        assert_eq!(result.total_downloaded, 25);
        assert_eq!(result.files_on_disk, 25);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 3);

        let chunk = chunk_dir(out.path(), "job-1", 0);
        assert_eq!(count_files(&chunk.join("a")).await.unwrap(), 15);
        assert_eq!(count_files(&chunk.join("b")).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_aborted_engine_does_not_affect_sibling() {
        let out = TempDir::new().unwrap();
        let registry = EngineRegistry::new(vec![
            Engine::new("good", Arc::new(ScriptedDownloader::new(vec![Some(10)]))),
            Engine::new("bad", Arc::new(ScriptedDownloader::failing_setup())),
        ]);

        let worker = ChunkWorker::new(registry, no_delay(), suffixes(), out.path());
        let result = worker.execute(&task(ImageRange::new(0, 20))).await.unwrap();

        // name order: "bad" then "good"
        assert!(result.engine_results[0].aborted());
        assert_eq!(result.engine_results[1].downloaded, 10);
        assert_eq!(result.total_downloaded, 10);
    }

    #[tokio::test]
    async fn test_retry_does_not_count_previous_attempt_files() {
        let out = TempDir::new().unwrap();
        let engine_dir = chunk_dir(out.path(), "job-1", 0).join("a");
        std::fs::create_dir_all(&engine_dir).unwrap();
        for i in 0..6 {
            std::fs::write(engine_dir.join(format!("earlier_{}.jpg", i)), b"x").unwrap();
        }

        let registry = EngineRegistry::new(vec![Engine::new(
            "a",
            Arc::new(ScriptedDownloader::new(vec![Some(4)])),
        )]);
        let worker = ChunkWorker::new(registry, no_delay(), suffixes(), out.path());
        let result = worker.execute(&task(ImageRange::new(0, 4))).await.unwrap();

        assert_eq!(result.total_downloaded, 4);
        assert_eq!(result.files_on_disk, 10);
    }

    #[tokio::test]
    async fn test_unusable_output_root_fails_chunk() {
        let out = TempDir::new().unwrap();
        let root = out.path().join("not_a_dir");
        std::fs::write(&root, b"file").unwrap();

        let registry = EngineRegistry::new(vec![Engine::new(
            "a",
            Arc::new(ScriptedDownloader::new(vec![Some(1)])),
        )]);
        let worker = ChunkWorker::new(registry, no_delay(), suffixes(), root);

        assert!(matches!(
            worker.execute(&task(ImageRange::new(0, 5))).await,
            Err(ChunkError::Prepare { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_registry_fails_chunk() {
        let out = TempDir::new().unwrap();
        let worker = ChunkWorker::new(EngineRegistry::default(), no_delay(), vec![], out.path());
        assert!(matches!(
            worker.execute(&task(ImageRange::new(0, 5))).await,
            Err(ChunkError::NoEngines)
        ));
    }

    #[tokio::test]
    async fn test_chunks_of_one_job_request_different_pages() {
        let out = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::new(vec![Some(40), Some(40)]));
        let registry = EngineRegistry::new(vec![
            Engine::new("a", downloader.clone()).with_offsets(5, 10),
        ]);
        let worker = ChunkWorker::new(registry, no_delay(), suffixes(), out.path());

        worker.execute(&task_at(0, ImageRange::new(0, 40))).await.unwrap();
        worker.execute(&task_at(1, ImageRange::new(40, 80))).await.unwrap();

        assert_eq!(*downloader.offsets.lock().unwrap(), vec![5, 45]);
    }

    #[tokio::test]
    async fn test_recount_failure_keeps_engine_results() {
        let out = TempDir::new().unwrap();
        let registry = EngineRegistry::new(vec![Engine::new("a", Arc::new(ClobberingDownloader))]);
        let worker = ChunkWorker::new(registry, no_delay(), suffixes(), out.path());

        let err = worker
            .execute(&task(ImageRange::new(0, 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkError::Recount { .. }));
        assert!(err.to_string().contains("chunk_0000"));

        let engine_results = err.into_engine_results();
        assert_eq!(engine_results.len(), 1);
        assert_eq!(engine_results[0].engine, "a");
    }
}
