use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::fixture::FixtureDownloader;
use super::http::{HttpClient, HttpConfig};
use super::search::HttpSearchDownloader;
use super::traits::{DownloadError, Downloader};
use crate::config::{EngineConfig, EngineKind};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("engine '{engine}' is missing {field}")]
    MissingField { engine: String, field: &'static str },

    #[error("engine '{engine}' could not be built: {source}")]
    Build {
        engine: String,
        #[source]
        source: DownloadError,
    },
}

/// One configured backend together with its offset scheme
#[derive(Clone)]
pub struct Engine {
    pub name: String,
    pub base_offset: u32,
    pub offset_step: u32,
    pub downloader: Arc<dyn Downloader>,
}

impl Engine {
    pub fn new(name: impl Into<String>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            name: name.into(),
            base_offset: 0,
            offset_step: 10,
            downloader,
        }
    }

    pub fn with_offsets(mut self, base_offset: u32, offset_step: u32) -> Self {
        self.base_offset = base_offset;
        self.offset_step = offset_step;
        self
    }

    /// Result offset for the `index`-th variation of a chunk whose results
    /// start at `page_start`
    pub fn offset_for(&self, page_start: u32, index: u32) -> u32 {
        self.base_offset
            .saturating_add(page_start)
            .saturating_add(index.saturating_mul(self.offset_step))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("base_offset", &self.base_offset)
            .field("offset_step", &self.offset_step)
            .finish_non_exhaustive()
    }
}

/// Enabled backends in name order
///
/// Name order matters: quota remainders go to the first engines.
#[derive(Clone, Debug, Default)]
pub struct EngineRegistry {
    engines: Vec<Engine>,
}

impl EngineRegistry {
    pub fn new(mut engines: Vec<Engine>) -> Self {
        engines.sort_by(|a, b| a.name.cmp(&b.name));
        Self { engines }
    }

    /// Build downloaders for every enabled engine in `configs`
    pub fn from_config(configs: &BTreeMap<String, EngineConfig>) -> Result<Self, RegistryError> {
        let mut engines = Vec::new();

        for (name, config) in configs.iter().filter(|(_, c)| c.enabled) {
            let downloader = build_downloader(name, config)?;
            engines.push(
                Engine::new(name.clone(), downloader)
                    .with_offsets(config.base_offset, config.offset_step),
            );
            tracing::debug!(engine = %name, kind = ?config.kind, "Registered engine");
        }

        Ok(Self { engines })
    }

    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

fn build_downloader(
    name: &str,
    config: &EngineConfig,
) -> Result<Arc<dyn Downloader>, RegistryError> {
    match config.kind {
        EngineKind::Http => {
            let search_url = config
                .search_url
                .clone()
                .ok_or_else(|| RegistryError::MissingField {
                    engine: name.to_string(),
                    field: "search_url",
                })?;

            let mut http_config = HttpConfig::default();
            if let Some(user_agent) = &config.user_agent {
                http_config.user_agent = user_agent.clone();
            }

            let client = HttpClient::new(http_config, config.proxy.as_deref()).map_err(|source| {
                RegistryError::Build {
                    engine: name.to_string(),
                    source,
                }
            })?;

            Ok(Arc::new(HttpSearchDownloader::new(client, search_url)))
        }
        EngineKind::Fixture => {
            let dir = config
                .fixture_dir
                .clone()
                .ok_or_else(|| RegistryError::MissingField {
                    engine: name.to_string(),
                    field: "fixture_dir",
                })?;
            Ok(Arc::new(FixtureDownloader::new(dir)))
        }
    }
}
