use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Downloader errors
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),

    #[error("Backend setup failed: {0}")]
    Setup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Search-and-download capability of one search-engine backend
///
/// Implementations fetch up to `max_count` images matching `keyword`,
/// starting at result `offset`, and write them into `output_dir`. The
/// return value is advisory: callers measure progress by counting files in
/// `output_dir` before and after the call.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// One-time check before the first variation (credentials, paths, ...)
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn download(
        &self,
        keyword: &str,
        output_dir: &Path,
        max_count: u32,
        offset: u32,
    ) -> Result<u32>;
}

/// File-name friendly form of a keyword
pub fn keyword_slug(keyword: &str) -> String {
    let slug: String = keyword
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if slug.is_empty() {
        "keyword".to_string()
    } else {
        slug
    }
}
