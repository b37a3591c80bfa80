//! Backend driven by a JSON search endpoint.
//!
//! The endpoint is called as `GET {search_url}?keyword=..&offset=..&count=..`
//! and answers either with a JSON array of image URLs or with
//! `{"results": [{"url": "..."}, ...]}`. Every URL is fetched and written
//! into the output directory; files that already exist are left alone.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

use super::http::HttpClient;
use super::traits::{DownloadError, Downloader, Result, keyword_slug};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Urls(Vec<String>),
    Results { results: Vec<SearchHit> },
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    url: String,
}

impl SearchResponse {
    fn into_urls(self) -> Vec<String> {
        match self {
            SearchResponse::Urls(urls) => urls,
            SearchResponse::Results { results } => results.into_iter().map(|h| h.url).collect(),
        }
    }
}

fn parse_search_response(body: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice::<SearchResponse>(body)
        .map(SearchResponse::into_urls)
        .map_err(|e| DownloadError::InvalidResponse(e.to_string()))
}

/// Extension taken from the URL path, `jpg` when absent or unknown
fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext {
        Some(ext) => IMAGE_EXTENSIONS
            .iter()
            .find(|known| **known == ext)
            .copied()
            .unwrap_or("jpg"),
        None => "jpg",
    }
}

pub struct HttpSearchDownloader {
    client: HttpClient,
    search_url: String,
}

impl HttpSearchDownloader {
    pub fn new(client: HttpClient, search_url: impl Into<String>) -> Self {
        Self {
            client,
            search_url: search_url.into(),
        }
    }

    async fn search(&self, keyword: &str, max_count: u32, offset: u32) -> Result<Vec<String>> {
        let query = [
            ("keyword", keyword.to_string()),
            ("offset", offset.to_string()),
            ("count", max_count.to_string()),
        ];
        let body = self.client.get(&self.search_url, &query).await?;
        parse_search_response(&body)
    }
}

#[async_trait]
impl Downloader for HttpSearchDownloader {
    async fn download(
        &self,
        keyword: &str,
        output_dir: &Path,
        max_count: u32,
        offset: u32,
    ) -> Result<u32> {
        if max_count == 0 {
            return Ok(0);
        }

        let urls = self.search(keyword, max_count, offset).await?;
        debug!(keyword, offset, hits = urls.len(), "Search returned results");

        tokio::fs::create_dir_all(output_dir).await?;
        let slug = keyword_slug(keyword);
        let mut written = 0;

        for (i, url) in urls.iter().take(max_count as usize).enumerate() {
            let name = format!("{}_{:06}.{}", slug, offset as usize + i, image_extension(url));
            let target = output_dir.join(&name);
            if tokio::fs::try_exists(&target).await? {
                continue;
            }

            let bytes = match self.client.get(url, &[]).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(keyword, url, error = %e, "Image download failed, skipping");
                    continue;
                }
            };

            // Write-then-rename so counters never see half-written files
            let partial = output_dir.join(format!(".{}.part", name));
            tokio::fs::write(&partial, &bytes).await?;
            tokio::fs::rename(&partial, &target).await?;
            written += 1;
        }

        Ok(written)
    }
}
