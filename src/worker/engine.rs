//! Engine executor: one backend working toward its own quota for one chunk.
//!
//! The executor never looks at anything another backend can touch. It
//! snapshots the file count of its own output directory when it starts and,
//! after every variation, derives its progress from the delta against that
//! snapshot:
//!
//! ```text
//! new_downloads = max(0, current - initial - downloaded_so_far)
//! ```
//!
//! Variations run strictly one after another.

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::files::count_files;
use crate::config::ExecutorConfig;
use crate::engines::Engine;
use crate::jobs::{ENGINE_FAILURE_KEYWORD, EngineResult, VariationResult};

/// Files gained by the latest variation
pub fn new_downloads(current_count: u32, initial_count: u32, downloaded_so_far: u32) -> u32 {
    current_count.saturating_sub(initial_count.saturating_add(downloaded_so_far))
}

/// Size of the working subset of variations for a backend with `target`
///
/// `clamp(ceil(target / images_per_variation), min_variations, available)`,
/// and nothing at all for a zero target.
pub fn variation_budget(
    target: u32,
    available: usize,
    min_variations: u32,
    images_per_variation: u32,
) -> usize {
    if target == 0 || available == 0 {
        return 0;
    }
    let needed = target.div_ceil(images_per_variation.max(1));
    (needed.max(min_variations) as usize).min(available)
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub variation_delay: Duration,
    pub min_variations: u32,
    pub images_per_variation: u32,
}

impl From<&ExecutorConfig> for ExecutorSettings {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            variation_delay: config.variation_delay.as_duration(),
            min_variations: config.min_variations,
            images_per_variation: config.images_per_variation,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

/// Running totals for one backend
struct Tally {
    downloaded: u32,
    variations: Vec<VariationResult>,
}

impl Tally {
    fn into_result(self, engine: &str, target: u32, started: Instant) -> EngineResult {
        let attempted: Vec<_> = self
            .variations
            .iter()
            .filter(|v| v.keyword != ENGINE_FAILURE_KEYWORD)
            .collect();
        let succeeded = attempted.iter().filter(|v| v.success).count();
        let success_rate = if attempted.is_empty() {
            0.0
        } else {
            succeeded as f64 / attempted.len() as f64
        };

        EngineResult {
            engine: engine.to_string(),
            target,
            downloaded: self.downloaded,
            variations_attempted: attempted.len() as u32,
            success_rate,
            elapsed_ms: started.elapsed().as_millis() as u64,
            variations: self.variations,
        }
    }
}

pub struct EngineExecutor {
    engine: Engine,
    settings: ExecutorSettings,
}

impl EngineExecutor {
    pub fn new(engine: Engine, settings: ExecutorSettings) -> Self {
        Self { engine, settings }
    }

    pub fn engine_name(&self) -> &str {
        &self.engine.name
    }

    /// Drive the backend until `target` new files exist in `output_dir` or
    /// the working subset of `variations` is exhausted.
    ///
    /// `page_start` shifts every requested offset so that different chunks
    /// of one job ask the backend for different result pages.
    ///
    /// Never fails: a backend-level error ends the run early and is recorded
    /// as a synthetic `engine_failure` variation.
    pub async fn run(
        &self,
        variations: &[String],
        output_dir: &Path,
        target: u32,
        initial_file_count: u32,
        page_start: u32,
    ) -> EngineResult {
        let started = Instant::now();
        let mut tally = Tally {
            downloaded: 0,
            variations: Vec::new(),
        };

        if let Err(error) = self
            .drive(variations, output_dir, target, initial_file_count, page_start, &mut tally)
            .await
        {
            warn!(
                engine = %self.engine.name,
                downloaded = tally.downloaded,
                error = %error,
                "Engine aborted"
            );
            tally.variations.push(VariationResult {
                keyword: ENGINE_FAILURE_KEYWORD.to_string(),
                offset: 0,
                downloaded: 0,
                success: false,
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: Some(error),
            });
        }

        let result = tally.into_result(&self.engine.name, target, started);
        info!(
            engine = %result.engine,
            target,
            downloaded = result.downloaded,
            variations = result.variations_attempted,
            elapsed_ms = result.elapsed_ms,
            "Engine finished"
        );
        result
    }

    async fn drive(
        &self,
        variations: &[String],
        output_dir: &Path,
        target: u32,
        initial_file_count: u32,
        page_start: u32,
        tally: &mut Tally,
    ) -> Result<(), String> {
        let budget = variation_budget(
            target,
            variations.len(),
            self.settings.min_variations,
            self.settings.images_per_variation,
        );
        if budget == 0 {
            return Ok(());
        }

        self.engine
            .downloader
            .prepare()
            .await
            .map_err(|e| format!("setup failed: {}", e))?;

        for (index, keyword) in variations[..budget].iter().enumerate() {
            let offset = self.engine.offset_for(page_start, index as u32);
            let remaining = target.saturating_sub(tally.downloaded);
            let variation_started = Instant::now();

            let outcome = self
                .engine
                .downloader
                .download(keyword, output_dir, remaining, offset)
                .await;

            // The delta is taken even after a failed call; it may have
            // written some files before failing.
            let current = count_files(output_dir)
                .await
                .map_err(|e| format!("recount of {} failed: {}", output_dir.display(), e))?;
            let gained = new_downloads(current, initial_file_count, tally.downloaded);
            tally.downloaded = tally.downloaded.saturating_add(gained);

            let elapsed_ms = variation_started.elapsed().as_millis() as u64;
            let error = outcome.err().map(|e| e.to_string());
            match &error {
                None => debug!(
                    engine = %self.engine.name,
                    keyword = %keyword,
                    offset,
                    gained,
                    "Variation finished"
                ),
                Some(e) => warn!(
                    engine = %self.engine.name,
                    keyword = %keyword,
                    offset,
                    gained,
                    error = %e,
                    "Variation failed"
                ),
            }

            tally.variations.push(VariationResult {
                keyword: keyword.clone(),
                offset,
                downloaded: gained,
                success: error.is_none(),
                elapsed_ms,
                error,
            });

            if tally.downloaded >= target {
                break;
            }
            if index + 1 < budget && !self.settings.variation_delay.is_zero() {
                tokio::time::sleep(self.settings.variation_delay).await;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engines::{DownloadError, Downloader};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Writes a scripted number of files per call; `None` means fail
    pub(crate) struct ScriptedDownloader {
        script: Vec<Option<u32>>,
        calls: AtomicU32,
        pub(crate) offsets: std::sync::Mutex<Vec<u32>>,
        fail_prepare: bool,
    }

    impl ScriptedDownloader {
        pub(crate) fn new(script: Vec<Option<u32>>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
                offsets: std::sync::Mutex::new(Vec::new()),
                fail_prepare: false,
            }
        }

        pub(crate) fn failing_setup() -> Self {
            Self {
                fail_prepare: true,
                ..Self::new(vec![])
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Downloader for ScriptedDownloader {
        async fn prepare(&self) -> crate::engines::traits::Result<()> {
            if self.fail_prepare {
                return Err(DownloadError::Setup("no credentials".into()));
            }
            Ok(())
        }

        async fn download(
            &self,
            keyword: &str,
            output_dir: &Path,
            max_count: u32,
            offset: u32,
        ) -> crate::engines::traits::Result<u32> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.offsets.lock().unwrap().push(offset);
            tokio::fs::create_dir_all(output_dir).await?;

            match self.script.get(call).copied().flatten() {
                Some(count) => {
                    let count = count.min(max_count);
                    for i in 0..count {
                        let name = format!("{}_{}_{}.jpg", keyword.replace(' ', "_"), call, i);
                        tokio::fs::write(output_dir.join(name), b"img").await?;
                    }
                    Ok(count)
                }
                None => Err(DownloadError::RequestFailed("HTTP 503".into())),
            }
        }
    }

    pub(crate) fn no_delay() -> ExecutorSettings {
        ExecutorSettings {
            variation_delay: Duration::ZERO,
            min_variations: 3,
            images_per_variation: 20,
        }
    }

    fn keywords(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("kw{}", i)).collect()
    }

    #[test]
    fn test_new_downloads_is_delta() {
        assert_eq!(new_downloads(10, 4, 0), 6);
        assert_eq!(new_downloads(10, 4, 6), 0);
        assert_eq!(new_downloads(3, 4, 0), 0);
    }

    #[test]
    fn test_variation_budget() {
        assert_eq!(variation_budget(0, 10, 3, 20), 0);
        assert_eq!(variation_budget(15, 10, 3, 20), 3);
        assert_eq!(variation_budget(100, 10, 3, 20), 5);
        assert_eq!(variation_budget(1000, 10, 3, 20), 10);
        assert_eq!(variation_budget(15, 2, 3, 20), 2);
    }

    #[tokio::test]
    async fn test_stops_once_target_met() {
        let dir = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::new(vec![Some(15), Some(15)]));
        let engine = Engine::new("a", downloader.clone()).with_offsets(5, 10);

        let result = EngineExecutor::new(engine, no_delay())
            .run(&keywords(5), dir.path(), 15, 0, 0)
            .await;

        assert_eq!(result.downloaded, 15);
        assert_eq!(result.variations_attempted, 1);
        assert_eq!(result.success_rate, 1.0);
        assert_eq!(downloader.calls(), 1);
        assert_eq!(*downloader.offsets.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_failed_variation_does_not_abort() {
        let dir = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::new(vec![Some(5), None, Some(5)]));
        let engine = Engine::new("b", downloader.clone()).with_offsets(0, 10);

        let result = EngineExecutor::new(engine, no_delay())
            .run(&keywords(5), dir.path(), 15, 0, 0)
            .await;

        assert_eq!(result.downloaded, 10);
        assert_eq!(result.variations_attempted, 3);
        assert!(!result.variations[1].success);
        assert_eq!(result.variations[1].error.as_deref(), Some("HTTP request failed: HTTP 503"));
        assert!((result.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(*downloader.offsets.lock().unwrap(), vec![0, 10, 20]);
        assert!(!result.aborted());
    }

    #[tokio::test]
    async fn test_pre_existing_files_are_not_credited() {
        let dir = TempDir::new().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("old_{}.jpg", i)), b"x").unwrap();
        }
        let downloader = Arc::new(ScriptedDownloader::new(vec![Some(3)]));
        let engine = Engine::new("c", downloader);

        let result = EngineExecutor::new(engine, no_delay())
            .run(&keywords(1), dir.path(), 10, 4, 0)
            .await;

        assert_eq!(result.downloaded, 3);
    }

    #[tokio::test]
    async fn test_setup_failure_yields_synthetic_entry() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new("broken", Arc::new(ScriptedDownloader::failing_setup()));

        let result = EngineExecutor::new(engine, no_delay())
            .run(&keywords(3), dir.path(), 10, 0, 0)
            .await;

        assert_eq!(result.downloaded, 0);
        assert_eq!(result.variations_attempted, 0);
        assert!(result.aborted());
        assert_eq!(result.variations.len(), 1);
        assert_eq!(result.variations[0].keyword, ENGINE_FAILURE_KEYWORD);
    }

    #[tokio::test]
    async fn test_zero_target_does_nothing() {
        let dir = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::new(vec![Some(5)]));
        let engine = Engine::new("idle", downloader.clone());

        let result = EngineExecutor::new(engine, no_delay())
            .run(&keywords(3), dir.path(), 0, 0, 0)
            .await;

        assert_eq!(result.downloaded, 0);
        assert_eq!(downloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let mut progressions = Vec::new();
        for _ in 0..2 {
            let dir = TempDir::new().unwrap();
            let downloader = Arc::new(ScriptedDownloader::new(vec![Some(4), None, Some(7)]));
            let engine = Engine::new("r", downloader);
            let result = EngineExecutor::new(engine, no_delay())
                .run(&keywords(3), dir.path(), 20, 0, 0)
                .await;
            progressions.push(
                result
                    .variations
                    .iter()
                    .map(|v| v.downloaded)
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(progressions[0], vec![4, 0, 7]);
        assert_eq!(progressions[0], progressions[1]);
    }
}
