use super::models::{Config, EngineKind};
use crate::jobs::MAX_PRIORITY;
use thiserror::Error;

/// Upper bound on `chunking.max_retries`
pub const MAX_RETRIES_LIMIT: u32 = 20;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No search engines configured (at least one enabled engine is required)")]
    NoEnginesConfigured,

    #[error("Engine '{engine}' of kind http requires search_url")]
    MissingSearchUrl { engine: String },

    #[error("Engine '{engine}' of kind fixture requires fixture_dir")]
    MissingFixtureDir { engine: String },

    #[error("Engine '{engine}' has an invalid search_url '{url}', expected http:// or https://")]
    InvalidSearchUrl { engine: String, url: String },

    #[error("chunking.chunk_size must be positive")]
    InvalidChunkSize,

    #[error("chunking.default_priority ({0}) exceeds {MAX_PRIORITY}")]
    InvalidPriority(u8),

    #[error("chunking.max_retries ({0}) exceeds {MAX_RETRIES_LIMIT}")]
    TooManyRetries(u32),

    #[error("dispatcher.num_workers must be positive")]
    NoWorkers,

    #[error("dispatcher.soft_time_limit ({soft}) must not exceed hard_time_limit ({hard})")]
    SoftLimitAboveHard { soft: String, hard: String },

    #[error("dispatcher.hard_time_limit must be positive")]
    ZeroHardLimit,

    #[error("dispatcher.sweep_interval must be positive")]
    ZeroSweepInterval,

    #[error("executor.images_per_variation must be positive")]
    InvalidVariationYield,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_engines(config)?;
    validate_chunking(config)?;
    validate_dispatcher(config)?;
    validate_executor(config)?;
    Ok(())
}

/// At least one enabled engine, each with the settings its kind needs
fn validate_engines(config: &Config) -> Result<(), ValidationError> {
    if !config.engines.values().any(|engine| engine.enabled) {
        return Err(ValidationError::NoEnginesConfigured);
    }

    for (name, engine) in config.engines.iter().filter(|(_, e)| e.enabled) {
        match engine.kind {
            EngineKind::Http => {
                let url = engine
                    .search_url
                    .as_ref()
                    .ok_or_else(|| ValidationError::MissingSearchUrl {
                        engine: name.clone(),
                    })?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ValidationError::InvalidSearchUrl {
                        engine: name.clone(),
                        url: url.clone(),
                    });
                }
            }
            EngineKind::Fixture => {
                if engine.fixture_dir.is_none() {
                    return Err(ValidationError::MissingFixtureDir {
                        engine: name.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn validate_chunking(config: &Config) -> Result<(), ValidationError> {
    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        return Err(ValidationError::InvalidChunkSize);
    }
    if chunking.default_priority > MAX_PRIORITY {
        return Err(ValidationError::InvalidPriority(chunking.default_priority));
    }
    if chunking.max_retries > MAX_RETRIES_LIMIT {
        return Err(ValidationError::TooManyRetries(chunking.max_retries));
    }
    Ok(())
}

fn validate_dispatcher(config: &Config) -> Result<(), ValidationError> {
    let dispatcher = &config.dispatcher;
    if dispatcher.num_workers == 0 {
        return Err(ValidationError::NoWorkers);
    }
    if dispatcher.hard_time_limit.as_duration().is_zero() {
        return Err(ValidationError::ZeroHardLimit);
    }
    if dispatcher.sweep_interval.as_duration().is_zero() {
        return Err(ValidationError::ZeroSweepInterval);
    }
    if dispatcher.soft_time_limit > dispatcher.hard_time_limit {
        return Err(ValidationError::SoftLimitAboveHard {
            soft: dispatcher.soft_time_limit.to_string(),
            hard: dispatcher.hard_time_limit.to_string(),
        });
    }
    Ok(())
}

fn validate_executor(config: &Config) -> Result<(), ValidationError> {
    if config.executor.images_per_variation == 0 {
        return Err(ValidationError::InvalidVariationYield);
    }
    Ok(())
}
