use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Search-engine backends keyed by name; iteration order is name order
    #[serde(default)]
    pub engines: BTreeMap<String, EngineConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root for the fjall ledger and task queue
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root under which chunk output directories are created
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl ServerConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/images")
}

/// What a job becomes once every chunk is terminal and some failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPolicy {
    /// `completed` as long as at least one chunk completed
    #[default]
    Partial,
    /// `failed` as soon as any chunk failed permanently
    Strict,
}

/// How jobs are split into chunks and how often chunks are retried
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            default_priority: default_priority(),
            max_retries: default_max_retries(),
            completion_policy: CompletionPolicy::default(),
        }
    }
}

fn default_chunk_size() -> u32 {
    100
}

fn default_priority() -> u8 {
    5
}

fn default_max_retries() -> u32 {
    3
}

/// Worker pool and per-task limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Max chunks of one job in flight at once (0 = all of them)
    #[serde(default)]
    pub dispatch_window: u32,
    #[serde(default = "default_soft_time_limit")]
    pub soft_time_limit: HumanDuration,
    #[serde(default = "default_hard_time_limit")]
    pub hard_time_limit: HumanDuration,
    /// How often unfinished jobs are checked for chunks left pending
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: HumanDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            dispatch_window: 0,
            soft_time_limit: default_soft_time_limit(),
            hard_time_limit: default_hard_time_limit(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_num_workers() -> usize {
    4
}

fn default_soft_time_limit() -> HumanDuration {
    HumanDuration::from_secs(10 * 60)
}

fn default_hard_time_limit() -> HumanDuration {
    HumanDuration::from_secs(15 * 60)
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

/// Engine executor tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Pause between two variations against the same backend
    #[serde(default = "default_variation_delay")]
    pub variation_delay: HumanDuration,
    /// Lower bound on variations explored by a backend with a non-zero quota
    #[serde(default = "default_min_variations")]
    pub min_variations: u32,
    /// Expected yield of one variation, used to size the working subset
    #[serde(default = "default_images_per_variation")]
    pub images_per_variation: u32,
    /// Appended to each keyword to form further variations
    #[serde(default = "default_variation_suffixes")]
    pub variation_suffixes: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            variation_delay: default_variation_delay(),
            min_variations: default_min_variations(),
            images_per_variation: default_images_per_variation(),
            variation_suffixes: default_variation_suffixes(),
        }
    }
}

fn default_variation_delay() -> HumanDuration {
    HumanDuration::from_secs(1)
}

fn default_min_variations() -> u32 {
    3
}

fn default_images_per_variation() -> u32 {
    20
}

fn default_variation_suffixes() -> Vec<String> {
    ["photo", "image", "picture", "high resolution", "hd"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Backend implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// JSON search endpoint + HTTP image fetches
    Http,
    /// Local directory of sample images
    Fixture,
}

/// One search-engine backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub kind: EngineKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// First result offset requested by this backend
    #[serde(default)]
    pub base_offset: u32,
    /// Offset increment between consecutive variations
    #[serde(default = "default_offset_step")]
    pub offset_step: u32,
    /// Required for `http`
    pub search_url: Option<String>,
    /// Required for `fixture`
    pub fixture_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_offset_step() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.ledger_path(), PathBuf::from("data/ledger"));
        assert_eq!(config.chunking.chunk_size, 100);
        assert_eq!(config.chunking.max_retries, 3);
        assert_eq!(config.chunking.completion_policy, CompletionPolicy::Partial);
        assert_eq!(config.dispatcher.num_workers, 4);
        assert_eq!(config.executor.min_variations, 3);
        assert!(config.engines.is_empty());
    }

    #[test]
    fn test_engine_config_from_toml() {
        let engine: EngineConfig = toml::from_str(
            r#"
kind = "http"
search_url = "http://search.local/api"
base_offset = 5
            "#,
        )
        .unwrap();

        assert_eq!(engine.kind, EngineKind::Http);
        assert!(engine.enabled);
        assert_eq!(engine.base_offset, 5);
        assert_eq!(engine.offset_step, 10);
    }
}
