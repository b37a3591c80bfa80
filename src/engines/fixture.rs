//! Offline backend that serves images from a local directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::traits::{DownloadError, Downloader, Result, keyword_slug};

/// Copies files from `source_dir` as if they were search results.
///
/// Results are the directory's regular files sorted by name; `offset`
/// skips into that list.
pub struct FixtureDownloader {
    source_dir: PathBuf,
}

impl FixtureDownloader {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    async fn source_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.source_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Downloader for FixtureDownloader {
    async fn prepare(&self) -> Result<()> {
        match tokio::fs::metadata(&self.source_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DownloadError::Setup(format!(
                "{} is not a directory",
                self.source_dir.display()
            ))),
            Err(e) => Err(DownloadError::Setup(format!(
                "{}: {}",
                self.source_dir.display(),
                e
            ))),
        }
    }

    async fn download(
        &self,
        keyword: &str,
        output_dir: &Path,
        max_count: u32,
        offset: u32,
    ) -> Result<u32> {
        tokio::fs::create_dir_all(output_dir).await?;
        let slug = keyword_slug(keyword);
        let mut written = 0;

        for source in self
            .source_files()
            .await?
            .into_iter()
            .skip(offset as usize)
            .take(max_count as usize)
        {
            let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let target = output_dir.join(format!("{}_{}", slug, name));
            if tokio::fs::try_exists(&target).await? {
                continue;
            }
            tokio::fs::copy(&source, &target).await?;
            written += 1;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed(dir: &Path, count: usize) {
        for i in 0..count {
            std::fs::write(dir.join(format!("img_{:03}.jpg", i)), b"jpeg").unwrap();
        }
    }

    #[tokio::test]
    async fn test_copies_window_of_files() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed(source.path(), 10);

        let downloader = FixtureDownloader::new(source.path());
        downloader.prepare().await.unwrap();

        let written = downloader.download("Cat", out.path(), 3, 4).await.unwrap();
        assert_eq!(written, 3);
        assert!(out.path().join("cat_img_004.jpg").exists());
        assert!(out.path().join("cat_img_006.jpg").exists());
        assert!(!out.path().join("cat_img_007.jpg").exists());
    }

    #[tokio::test]
    async fn test_existing_files_are_not_counted_twice() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed(source.path(), 5);

        let downloader = FixtureDownloader::new(source.path());
        assert_eq!(downloader.download("cat", out.path(), 5, 0).await.unwrap(), 5);
        assert_eq!(downloader.download("cat", out.path(), 5, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prepare_fails_for_missing_directory() {
        let downloader = FixtureDownloader::new("/definitely/not/here");
        assert!(matches!(
            downloader.prepare().await,
            Err(DownloadError::Setup(_))
        ));
    }
}
