//! Configuration management for Crawlbox
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use crawlbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `CRAWLBOX__<section>__<key>`:
//! - `CRAWLBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CRAWLBOX__CHUNKING__CHUNK_SIZE=50`
//! - `CRAWLBOX__DISPATCHER__SOFT_TIME_LIMIT=5m`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/crawlbox.toml`.
//! This can be overridden using the `CRAWLBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{
    ChunkingConfig, CompletionPolicy, Config, DispatcherConfig, EngineConfig, EngineKind,
    ExecutorConfig, ServerConfig,
};
pub use validation::{MAX_RETRIES_LIMIT, ValidationError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails
    /// (no enabled engine, inverted time limits, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Re-run validation, e.g. after CLI overrides were applied
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[engines.local]
kind = "fixture"
fixture_dir = "samples"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.engines.len(), 1);
        assert_eq!(config.chunking.chunk_size, 100);
    }

    #[test]
    fn test_validation_catches_missing_engines() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[chunking]\nchunk_size = 10\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::NoEnginesConfigured)
        ));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[chunking]\nchunk_size = \"lots\"\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path).unwrap_err(),
            ConfigError::LoadError(_)
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
data_dir = "data"
output_dir = "data/images"

[chunking]
chunk_size = 100
default_priority = 5
max_retries = 3
completion_policy = "partial"

[dispatcher]
num_workers = 4
dispatch_window = 8
soft_time_limit = "10m"
hard_time_limit = "15m"

[executor]
variation_delay = "1s"
min_variations = 3
images_per_variation = 20

[engines.bing]
kind = "http"
search_url = "https://search.internal/bing"
base_offset = 0
offset_step = 35

[engines.google]
kind = "http"
search_url = "https://search.internal/google"
proxy = "http://proxy:3128"

[engines.disabled]
kind = "http"
enabled = false
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.dispatcher.dispatch_window, 8);
        assert_eq!(config.engines.len(), 3);
        assert_eq!(config.engines["bing"].offset_step, 35);
        assert_eq!(
            config.engines["google"].proxy.as_deref(),
            Some("http://proxy:3128")
        );
        assert!(!config.engines["disabled"].enabled);
    }
}
