use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GmailError, Result};

/// Largest batch Gmail accepts for `messages.batchModify`
pub const PROVIDER_MAX_BATCH_SIZE: usize = 1000;

/// Largest page Gmail returns for `messages.list`
pub const PROVIDER_MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub deletion: DeletionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_units_per_second")]
    pub units_per_second: f64,
    #[serde(default = "default_burst_units")]
    pub burst_units: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            units_per_second: default_units_per_second(),
            burst_units: default_burst_units(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Above this many matches the CLI asks an extra question
    #[serde(default = "default_large_deletion_threshold")]
    pub large_deletion_threshold: usize,
    #[serde(default = "default_require_typed_confirmation")]
    pub require_typed_confirmation: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            large_deletion_threshold: default_large_deletion_threshold(),
            require_typed_confirmation: default_require_typed_confirmation(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}

fn default_page_size() -> u32 {
    PROVIDER_MAX_PAGE_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    30
}

fn default_units_per_second() -> f64 {
    250.0
}

fn default_burst_units() -> f64 {
    500.0
}

fn default_large_deletion_threshold() -> usize {
    1000
}

fn default_require_typed_confirmation() -> bool {
    true
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.deletion.batch_size == 0 {
            return Err(GmailError::ConfigError(
                "deletion.batch_size must be at least 1".to_string(),
            ));
        }
        if self.deletion.batch_size > PROVIDER_MAX_BATCH_SIZE {
            return Err(GmailError::ConfigError(format!(
                "deletion.batch_size cannot exceed {} (Gmail batch limit)",
                PROVIDER_MAX_BATCH_SIZE
            )));
        }

        if self.deletion.page_size == 0 {
            return Err(GmailError::ConfigError(
                "deletion.page_size must be at least 1".to_string(),
            ));
        }
        if self.deletion.page_size > PROVIDER_MAX_PAGE_SIZE {
            return Err(GmailError::ConfigError(format!(
                "deletion.page_size cannot exceed {} (Gmail list limit)",
                PROVIDER_MAX_PAGE_SIZE
            )));
        }

        if self.retry.max_retries > 10 {
            return Err(GmailError::ConfigError(
                "retry.max_retries cannot exceed 10".to_string(),
            ));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(GmailError::ConfigError(
                "retry.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay_secs == 0 {
            return Err(GmailError::ConfigError(
                "retry.max_delay_secs must be greater than 0".to_string(),
            ));
        }

        if self.quota.units_per_second <= 0.0 {
            return Err(GmailError::ConfigError(
                "quota.units_per_second must be positive".to_string(),
            ));
        }
        // A batch delete costs 50 units and must fit in one burst
        if self.quota.burst_units < 50.0 {
            return Err(GmailError::ConfigError(
                "quota.burst_units must be at least 50".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}
