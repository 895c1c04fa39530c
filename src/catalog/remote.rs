//! Sources of the remote model listing

use crate::error::{DepotError, DepotResult};
use crate::models::ModelRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

/// Provider of the models that can be downloaded
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Current listing; records are treated as remote whatever they claim
    async fn list_models(&self) -> DepotResult<Vec<ModelRecord>>;

    /// Where the listing comes from, for logs
    fn source(&self) -> String;
}

/// Accepted listing layouts: a bare array or `{ "models": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<ModelRecord>),
    Wrapped { models: Vec<ModelRecord> },
}

/// Parse a JSON listing
pub fn parse_listing(bytes: &[u8]) -> DepotResult<Vec<ModelRecord>> {
    let listing: Listing = serde_json::from_slice(bytes)?;
    Ok(match listing {
        Listing::Bare(models) | Listing::Wrapped { models } => models,
    })
}

/// Listing held in memory, optionally loaded from a JSON file
#[derive(Default)]
pub struct StaticCatalog {
    models: RwLock<Vec<ModelRecord>>,
    path: Option<PathBuf>,
}

impl StaticCatalog {
    pub fn new(models: Vec<ModelRecord>) -> Self {
        Self {
            models: RwLock::new(models),
            path: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Read the listing from a JSON file
    ///
    /// The file is read once; call [`StaticCatalog::reload`] to pick up edits.
    pub fn from_file(path: impl AsRef<Path>) -> DepotResult<Self> {
        let path = path.as_ref();
        let models = read_listing_file(path)?;
        tracing::info!(path = ?path, models = models.len(), "Catalog file loaded");

        Ok(Self {
            models: RwLock::new(models),
            path: Some(path.to_path_buf()),
        })
    }

    /// Re-read the backing file, if there is one
    pub async fn reload(&self) -> DepotResult<usize> {
        let Some(path) = &self.path else {
            return Ok(self.models.read().await.len());
        };
        let models = read_listing_file(path)?;
        let count = models.len();
        *self.models.write().await = models;
        Ok(count)
    }

    /// Replace the listing
    pub async fn set_models(&self, models: Vec<ModelRecord>) {
        *self.models.write().await = models;
    }
}

fn read_listing_file(path: &Path) -> DepotResult<Vec<ModelRecord>> {
    let bytes = std::fs::read(path).map_err(|e| {
        DepotError::not_found(format!("Cannot read catalog file {:?}: {}", path, e))
    })?;
    parse_listing(&bytes)
}

#[async_trait]
impl RemoteCatalog for StaticCatalog {
    async fn list_models(&self) -> DepotResult<Vec<ModelRecord>> {
        Ok(self.models.read().await.clone())
    }

    fn source(&self) -> String {
        match &self.path {
            Some(path) => format!("file:{}", path.display()),
            None => "memory".to_string(),
        }
    }
}

/// Listing fetched as JSON over HTTP(S)
pub struct HttpCatalog {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, user_agent: &str) -> DepotResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DepotError::network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RemoteCatalog for HttpCatalog {
    async fn list_models(&self) -> DepotResult<Vec<ModelRecord>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DepotError::network(format!("Catalog request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DepotError::network(format!(
                "Catalog at {} returned HTTP {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DepotError::network(format!("Failed to read catalog body: {}", e)))?;

        parse_listing(&body)
    }

    fn source(&self) -> String {
        self.url.clone()
    }
}
