//! Configuration structures and loading logic

use crate::models::ParameterSizeTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main depot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DepotConfig {
    pub api_port: u16,
    /// Root directory holding one subdirectory per local model
    pub storage_root: PathBuf,
    /// JSON file with the remote catalog listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_file: Option<PathBuf>,
    /// URL returning the remote catalog listing as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    /// Maximum number of transfers in `downloading` at once
    pub max_concurrent_downloads: usize,
    /// Files below this size are rejected outright by the integrity verifier
    pub min_model_size_bytes: u64,
    /// Weight of the newest sample in the smoothed download speed (0, 1]
    pub speed_smoothing: f64,
    /// Minimum interval between progress events per download
    pub progress_interval_ms: u64,
    /// Refuse downloads that do not fit on the storage volume
    pub check_disk_space: bool,
    /// Memory assumed for the host when estimating compatibility
    pub host_memory_bytes: u64,
    /// Share of host memory a model may use before being demoted (0, 1]
    pub memory_headroom: f64,
    pub min_os_version: String,
    /// Connect timeout for remote requests; transfers themselves have no deadline
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Size → parameter label table for models without a declared count
    pub parameter_table: ParameterSizeTable,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            storage_root: default_storage_root(),
            catalog_file: None,
            catalog_url: None,
            max_concurrent_downloads: default_max_concurrent_downloads(),
            min_model_size_bytes: default_min_model_size_bytes(),
            speed_smoothing: default_speed_smoothing(),
            progress_interval_ms: default_progress_interval_ms(),
            check_disk_space: true,
            host_memory_bytes: default_host_memory_bytes(),
            memory_headroom: default_memory_headroom(),
            min_os_version: default_min_os_version(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            parameter_table: ParameterSizeTable::default(),
        }
    }
}

impl DepotConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("MODEL_DEPOT_API_PORT") {
            config.api_port = port.parse().context("Invalid MODEL_DEPOT_API_PORT value")?;
        }
        if let Ok(root) = std::env::var("MODEL_DEPOT_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Ok(max) = std::env::var("MODEL_DEPOT_MAX_CONCURRENT_DOWNLOADS") {
            config.max_concurrent_downloads = max
                .parse()
                .context("Invalid MODEL_DEPOT_MAX_CONCURRENT_DOWNLOADS value")?;
        }
        if let Ok(url) = std::env::var("MODEL_DEPOT_CATALOG_URL") {
            config.catalog_url = Some(url);
        }
        if let Ok(file) = std::env::var("MODEL_DEPOT_CATALOG_FILE") {
            config.catalog_file = Some(PathBuf::from(file));
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.max_concurrent_downloads == 0 {
            anyhow::bail!("max_concurrent_downloads must be at least 1");
        }

        if self.min_model_size_bytes == 0 {
            anyhow::bail!("min_model_size_bytes must be greater than 0");
        }

        if !(self.speed_smoothing > 0.0 && self.speed_smoothing <= 1.0) {
            anyhow::bail!(
                "speed_smoothing must be in (0, 1] (got {})",
                self.speed_smoothing
            );
        }

        if !(self.memory_headroom > 0.0 && self.memory_headroom <= 1.0) {
            anyhow::bail!(
                "memory_headroom must be in (0, 1] (got {})",
                self.memory_headroom
            );
        }

        if self.host_memory_bytes == 0 {
            anyhow::bail!("host_memory_bytes must be greater than 0");
        }

        if self.catalog_file.is_some() && self.catalog_url.is_some() {
            anyhow::bail!("Configure either catalog_file or catalog_url, not both");
        }

        if let Some(file) = &self.catalog_file
            && !file.exists()
        {
            anyhow::bail!("Catalog file does not exist: {:?}", file);
        }

        self.parameter_table.validate()?;

        // Ensure the storage root exists or can be created
        if !self.storage_root.exists() {
            std::fs::create_dir_all(&self.storage_root).with_context(|| {
                format!("Cannot create storage root: {:?}", self.storage_root)
            })?;
        }

        Ok(())
    }
}

// Default functions
fn default_api_port() -> u16 {
    9100
}
fn default_storage_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("model-depot/models"))
        .unwrap_or_else(|| PathBuf::from("/tmp/model-depot/models"))
}
fn default_max_concurrent_downloads() -> usize {
    3
}
fn default_min_model_size_bytes() -> u64 {
    1024
}
fn default_speed_smoothing() -> f64 {
    0.3
}
fn default_progress_interval_ms() -> u64 {
    250
}
fn default_host_memory_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}
fn default_memory_headroom() -> f64 {
    0.75
}
fn default_min_os_version() -> String {
    "14.0".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("model-depot/{}", env!("CARGO_PKG_VERSION"))
}
