//! Unified catalog over local storage, the remote listing and downloads

use super::remote::{HttpCatalog, RemoteCatalog, StaticCatalog};
use super::search::{filter_models, sort_models};
use crate::compatibility::{CompatibilityChecker, CompatibilityResult, HostProfile};
use crate::config::DepotConfig;
use crate::download::{
    DownloadEvent, DownloadManager, DownloadSettings, DownloadStatistics, DownloadTicket,
    HttpTransport, Transport,
};
use crate::error::{DepotError, DepotResult};
use crate::integrity::{IntegrityVerifier, VerificationResult};
use crate::models::{ModelRecord, SearchFilters, SortDirection, SortKey};
use crate::storage::{LocalRepository, StorageStatistics};
use anyhow::Context;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};

/// Entry point for everything the depot can do with models
pub struct CatalogRepository {
    local: Arc<LocalRepository>,
    downloads: DownloadManager,
    remote: Arc<dyn RemoteCatalog>,
    checker: CompatibilityChecker,
    /// Last listing the remote catalog returned successfully
    remote_models: RwLock<Vec<ModelRecord>>,
    load_lock: Mutex<()>,
}

impl CatalogRepository {
    pub fn new(
        local: Arc<LocalRepository>,
        downloads: DownloadManager,
        remote: Arc<dyn RemoteCatalog>,
        checker: CompatibilityChecker,
    ) -> Self {
        Self {
            local,
            downloads,
            remote,
            checker,
            remote_models: RwLock::new(Vec::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// Build the default object graph from configuration
    pub fn from_config(config: &DepotConfig) -> anyhow::Result<Self> {
        let verifier = IntegrityVerifier::new(config.min_model_size_bytes);
        let local = Arc::new(LocalRepository::with_settings(
            config.storage_root.clone(),
            verifier,
            config.parameter_table.clone(),
        ));

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let transport: Arc<dyn Transport> = Arc::new(
            HttpTransport::new(connect_timeout, &config.user_agent)
                .context("Failed to build download client")?,
        );
        let downloads =
            DownloadManager::new(local.clone(), transport, DownloadSettings::from_config(config));

        let remote: Arc<dyn RemoteCatalog> = match (&config.catalog_url, &config.catalog_file) {
            (Some(url), _) => Arc::new(
                HttpCatalog::new(url.clone(), connect_timeout, &config.user_agent)
                    .context("Failed to build catalog client")?,
            ),
            (None, Some(path)) => Arc::new(
                StaticCatalog::from_file(path)
                    .with_context(|| format!("Failed to load catalog file {:?}", path))?,
            ),
            (None, None) => {
                tracing::warn!("No catalog configured; only local models will be listed");
                Arc::new(StaticCatalog::empty())
            }
        };

        let checker = CompatibilityChecker::new(HostProfile::from_config(config));

        Ok(Self::new(local, downloads, remote, checker))
    }

    /// Open local storage and take a first look at the remote listing
    ///
    /// A failing remote catalog is logged, not returned.
    pub async fn initialize(&self) -> DepotResult<usize> {
        let local = self.local.open().await?;
        let total = self.fetch_available_models().await.len();
        tracing::info!(
            local_models = local,
            available_models = total,
            source = %self.remote.source(),
            "Catalog initialized"
        );
        Ok(local)
    }

    pub fn local(&self) -> &Arc<LocalRepository> {
        &self.local
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub fn checker(&self) -> &CompatibilityChecker {
        &self.checker
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.downloads.subscribe()
    }

    /// Refresh the remote listing and return the merged catalog
    ///
    /// Local records win over remote ones with the same id. When the remote
    /// catalog fails, the last good listing is used instead.
    pub async fn fetch_available_models(&self) -> Vec<ModelRecord> {
        match self.remote.list_models().await {
            Ok(models) => {
                let models: Vec<ModelRecord> = models.into_iter().map(as_remote).collect();
                tracing::debug!(
                    source = %self.remote.source(),
                    models = models.len(),
                    "Remote catalog refreshed"
                );
                *self.remote_models.write().await = models;
            }
            Err(e) => {
                tracing::warn!(
                    source = %self.remote.source(),
                    error = %e,
                    "Remote catalog unavailable, using last known listing"
                );
            }
        }

        self.available_models().await
    }

    /// Merged catalog from the cached remote listing, without a refresh
    pub async fn available_models(&self) -> Vec<ModelRecord> {
        let local = self.local.get_local_models().await;
        let remote = self.remote_models.read().await.clone();
        merge_listings(local, remote)
    }

    /// Search the merged catalog
    ///
    /// # Errors
    /// * `Validation` if the filters can never match
    pub async fn search_models(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> DepotResult<Vec<ModelRecord>> {
        filters.validate()?;
        let models = self.available_models().await;
        let results = filter_models(models, query, filters, &self.checker);
        tracing::debug!(query = %query, results = results.len(), "Catalog searched");
        Ok(results)
    }

    /// Look up a model, preferring the local record
    pub async fn get_model(&self, model_id: &str) -> DepotResult<ModelRecord> {
        if let Some(record) = self.local.get_local_model(model_id).await {
            return Ok(record);
        }

        self.remote_models
            .read()
            .await
            .iter()
            .find(|m| m.id == model_id)
            .cloned()
            .ok_or_else(|| DepotError::not_found(format!("Model '{}' not found", model_id)))
    }

    pub async fn download_model(&self, model_id: &str) -> DepotResult<DownloadTicket> {
        let record = self.get_model(model_id).await?;
        self.downloads.download_model(&record).await
    }

    pub async fn cancel_download(&self, model_id: &str) -> DepotResult<()> {
        self.downloads.cancel_download(model_id).await
    }

    pub async fn retry_download(&self, model_id: &str) -> DepotResult<DownloadTicket> {
        self.downloads.retry_download(model_id).await
    }

    /// Remove a local model; the remote entry, if any, stays listed
    pub async fn delete_model(&self, model_id: &str) -> DepotResult<()> {
        let record = self.require_local(model_id).await?;
        self.local.delete_model(&record).await
    }

    pub async fn verify_model(&self, model_id: &str) -> DepotResult<VerificationResult> {
        let record = self.require_local(model_id).await?;
        self.local.verify_model(&record).await
    }

    pub async fn check_compatibility(&self, model_id: &str) -> DepotResult<CompatibilityResult> {
        let record = self.get_model(model_id).await?;
        Ok(self.checker.check(&record))
    }

    /// Mark a local model as the loaded one, clearing the flag elsewhere
    ///
    /// # Errors
    /// * `NotFound` if the model is not stored locally
    /// * `LoadFailed` if the stored artifact fails verification
    pub async fn set_loaded_model(&self, model_id: &str) -> DepotResult<ModelRecord> {
        let _guard = self.load_lock.lock().await;
        let record = self.require_local(model_id).await?;

        let verification = self
            .local
            .verify_model(&record)
            .await
            .map_err(|e| DepotError::load_failed(model_id, e.to_string()))?;
        if !verification.is_valid {
            return Err(DepotError::load_failed(
                model_id,
                verification.diagnostics.join("; "),
            ));
        }

        for other in self.local.get_local_models().await {
            if other.is_loaded && other.id != model_id {
                self.local.set_loaded(&other.id, false).await?;
            }
        }

        let loaded = self.local.set_loaded(model_id, true).await?;
        tracing::info!(model_id = %model_id, "Model loaded");
        Ok(loaded)
    }

    /// Clear the loaded flag; returns the model that was loaded, if any
    pub async fn unload_model(&self) -> DepotResult<Option<ModelRecord>> {
        let _guard = self.load_lock.lock().await;

        let mut unloaded = None;
        for record in self.local.get_local_models().await {
            if record.is_loaded {
                unloaded = Some(self.local.set_loaded(&record.id, false).await?);
            }
        }
        Ok(unloaded)
    }

    pub async fn storage_statistics(&self) -> StorageStatistics {
        self.local.get_storage_statistics().await
    }

    pub async fn download_statistics(&self) -> DownloadStatistics {
        self.downloads.get_download_statistics().await
    }

    pub async fn cleanup_orphaned_files(&self) -> DepotResult<Vec<PathBuf>> {
        self.local.cleanup_orphaned_files().await
    }

    /// Rebuild the local index from disk
    pub async fn rescan(&self) -> DepotResult<usize> {
        self.local.discover_local_models().await
    }

    async fn require_local(&self, model_id: &str) -> DepotResult<ModelRecord> {
        self.local.get_local_model(model_id).await.ok_or_else(|| {
            DepotError::not_found(format!("Model '{}' is not stored locally", model_id))
        })
    }
}

/// Strip local state a remote listing has no business setting
fn as_remote(mut record: ModelRecord) -> ModelRecord {
    record.is_local = false;
    record.is_loaded = false;
    record.local_path = None;
    record
}

/// Union of local and remote records keyed by id, local first, sorted by name
fn merge_listings(local: Vec<ModelRecord>, remote: Vec<ModelRecord>) -> Vec<ModelRecord> {
    let mut merged: HashMap<String, ModelRecord> = HashMap::with_capacity(local.len() + remote.len());

    for record in remote {
        merged.entry(record.id.clone()).or_insert(record);
    }

    for mut record in local {
        // Keep the remote URL so a deleted model can be fetched again
        if record.download_url.is_none()
            && let Some(remote) = merged.get(&record.id)
        {
            record.download_url = remote.download_url.clone();
        }
        merged.insert(record.id.clone(), record);
    }

    let mut models: Vec<_> = merged.into_values().collect();
    sort_models(&mut models, SortKey::Name, SortDirection::Ascending);
    models
}
