//! Local repository: the authoritative view of models present on disk

use super::sidecar::{SIDECAR_FILE, read_sidecar, write_sidecar};
use super::{
    DOWNLOADS_DIR, STAGING_DIR, available_space, format_bytes, model_id_to_dir_name,
    validate_model_id,
};
use crate::error::{DepotError, DepotResult};
use crate::integrity::{IntegrityVerifier, VerificationResult};
use crate::models::{ModelRecord, ParameterSizeTable};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Aggregate numbers about local storage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStatistics {
    pub model_count: usize,
    pub total_bytes: u64,
    pub storage_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
}

/// How a payload is brought into managed storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportMode {
    Copy,
    Move,
}

/// Repository of models physically present under the storage root
///
/// Reads go through the index lock only. Every mutation (add, delete,
/// rescan, cleanup, flag change) is serialized by `mutation_lock` and
/// publishes its result with a single write to the index.
pub struct LocalRepository {
    root: PathBuf,
    index: Arc<RwLock<HashMap<String, ModelRecord>>>,
    mutation_lock: Mutex<()>,
    verifier: IntegrityVerifier,
    parameter_table: ParameterSizeTable,
}

impl LocalRepository {
    /// Create a repository rooted at `root` with default verifier settings
    ///
    /// Nothing is read from disk until [`LocalRepository::open`] or
    /// [`LocalRepository::discover_local_models`] is called.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_settings(root, IntegrityVerifier::default(), ParameterSizeTable::default())
    }

    pub fn with_settings(
        root: impl Into<PathBuf>,
        verifier: IntegrityVerifier,
        parameter_table: ParameterSizeTable,
    ) -> Self {
        Self {
            root: root.into(),
            index: Arc::new(RwLock::new(HashMap::new())),
            mutation_lock: Mutex::new(()),
            verifier,
            parameter_table,
        }
    }

    /// Prepare the storage root, drop leftover staging and partial downloads, build the index
    pub async fn open(&self) -> DepotResult<usize> {
        fs::create_dir_all(&self.root).await?;

        // Nothing is in flight yet, so anything left here is from a previous run
        for leftover in [self.root.join(STAGING_DIR), self.downloads_dir()] {
            if fs::try_exists(&leftover).await? {
                tracing::debug!(path = ?leftover, "Removing leftover transfer data");
                fs::remove_dir_all(&leftover).await?;
            }
        }

        self.discover_local_models().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds (or would hold) a model
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id_to_dir_name(model_id))
    }

    /// Directory where in-flight downloads are written
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    /// Copy `source` into managed storage and register the model
    ///
    /// # Errors
    /// * `NotFound` if `source` does not exist
    /// * `Validation` if the model id cannot be mapped to a directory
    /// * `Storage`/`Io` if the copy fails; nothing is left registered in that case
    pub async fn add_model(&self, record: &ModelRecord, source: &Path) -> DepotResult<ModelRecord> {
        self.import(record, source, ImportMode::Copy).await
    }

    /// Move `source` into managed storage and register the model
    ///
    /// Same contract as [`LocalRepository::add_model`], but the payload is
    /// renamed into place. When a rename is impossible (e.g. across
    /// filesystems) the file is copied and the source removed afterwards.
    pub async fn adopt_model(
        &self,
        record: &ModelRecord,
        source: &Path,
    ) -> DepotResult<ModelRecord> {
        self.import(record, source, ImportMode::Move).await
    }

    async fn import(
        &self,
        record: &ModelRecord,
        source: &Path,
        mode: ImportMode,
    ) -> DepotResult<ModelRecord> {
        validate_model_id(&record.id)?;

        let source_meta = match fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                return Err(DepotError::not_found(format!(
                    "Source is not a file: {:?}",
                    source
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DepotError::not_found(format!(
                    "Source file not found: {:?}",
                    source
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let _guard = self.mutation_lock.lock().await;

        let file_name = payload_name(record, source);
        let dir_name = model_id_to_dir_name(&record.id);
        let staging_root = self.root.join(STAGING_DIR);
        let staging = staging_root.join(unique_name(&dir_name));
        let destination = self.model_dir(&record.id);

        fs::create_dir_all(&staging).await?;

        let staged = match self
            .stage_payload(record, source, &staging, &file_name, &destination, mode)
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                    tracing::warn!(path = ?staging, error = %cleanup, "Failed to remove partial import");
                }
                tracing::error!(model_id = %record.id, error = %e, "Failed to import model");
                return Err(e);
            }
        };

        // Swap the staged directory into place and publish it in one index write
        let mut index = self.index.write().await;

        let previous = if fs::try_exists(&destination).await.unwrap_or(false) {
            let trash = staging_root.join(unique_name(&format!("{}.old", dir_name)));
            fs::rename(&destination, &trash).await?;
            Some(trash)
        } else {
            None
        };

        if let Err(failure) = commit_dir(&staging, &destination, previous.as_deref()).await {
            // The old directory is gone, so its index entry would point at nothing
            if failure.previous_lost && index.remove(&record.id).is_some() {
                crate::metrics::update_local_model_count(index.len());
            }
            drop(index);
            if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                tracing::warn!(path = ?staging, error = %cleanup, "Failed to remove staged import");
            }
            tracing::error!(
                model_id = %record.id,
                error = %failure.error,
                "Failed to commit imported model"
            );
            return Err(failure.error.into());
        }

        index.insert(staged.id.clone(), staged.clone());
        let count = index.len();
        drop(index);

        if let Some(trash) = previous
            && let Err(e) = fs::remove_dir_all(&trash).await
        {
            tracing::warn!(path = ?trash, error = %e, "Failed to remove replaced model directory");
        }

        tracing::info!(
            model_id = %staged.id,
            size = %format_bytes(staged.size),
            source_size = source_meta.len(),
            path = ?staged.local_path,
            "Model added to local storage"
        );
        crate::metrics::record_model_added(&staged.id);
        crate::metrics::update_local_model_count(count);

        Ok(staged)
    }

    /// Put the payload and its sidecar into the staging directory
    ///
    /// The returned record already points at the final destination.
    async fn stage_payload(
        &self,
        record: &ModelRecord,
        source: &Path,
        staging: &Path,
        file_name: &str,
        destination: &Path,
        mode: ImportMode,
    ) -> DepotResult<ModelRecord> {
        let staged_payload = staging.join(file_name);

        let size = match mode {
            ImportMode::Copy => copy_payload(source, &staged_payload).await?,
            ImportMode::Move => match fs::rename(source, &staged_payload).await {
                Ok(()) => fs::metadata(&staged_payload).await?.len(),
                Err(e) => {
                    tracing::debug!(error = %e, "Rename failed, falling back to copy");
                    let size = copy_payload(source, &staged_payload).await?;
                    fs::remove_file(source).await?;
                    size
                }
            },
        };

        let mut stored = record.clone();
        if stored.size == 0 {
            stored.size = size;
        } else if stored.size != size {
            tracing::warn!(
                model_id = %record.id,
                declared = stored.size,
                actual = size,
                "Imported payload does not match the declared size"
            );
        }
        if stored.parameters.trim().is_empty() {
            stored.parameters = self.parameter_table.label_for_size(stored.size).to_string();
        }
        stored.is_loaded = false;
        stored.mark_local(destination.join(file_name));

        write_sidecar(staging, &stored).await?;

        Ok(stored)
    }

    /// All local models sorted by name
    pub async fn get_local_models(&self) -> Vec<ModelRecord> {
        let index = self.index.read().await;
        let mut models: Vec<_> = index.values().cloned().collect();
        sort_by_name(&mut models);
        models
    }

    /// Get a local model by id
    pub async fn get_local_model(&self, model_id: &str) -> Option<ModelRecord> {
        let index = self.index.read().await;
        index.get(model_id).cloned()
    }

    /// Remove a model's directory and index entry
    ///
    /// # Errors
    /// * `NotFound` if the model is not in the local index
    pub async fn delete_model(&self, record: &ModelRecord) -> DepotResult<()> {
        let _guard = self.mutation_lock.lock().await;

        if !self.index.read().await.contains_key(&record.id) {
            return Err(DepotError::not_found(format!(
                "Model '{}' is not stored locally",
                record.id
            )));
        }

        let dir = self.model_dir(&record.id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(model_id = %record.id, path = ?dir, "Model directory already gone");
            }
            Err(e) => return Err(e.into()),
        }

        let mut index = self.index.write().await;
        index.remove(&record.id);
        let count = index.len();
        drop(index);

        tracing::info!(model_id = %record.id, "Model deleted from local storage");
        crate::metrics::record_model_deleted(&record.id);
        crate::metrics::update_local_model_count(count);

        Ok(())
    }

    /// Rebuild the index from the sidecars under the storage root
    ///
    /// Directories without a readable sidecar or without their payload are
    /// skipped. Returns the number of models indexed.
    pub async fn discover_local_models(&self) -> DepotResult<usize> {
        let _guard = self.mutation_lock.lock().await;

        fs::create_dir_all(&self.root).await?;

        let mut discovered: HashMap<String, ModelRecord> = HashMap::new();
        for dir in self.model_dirs().await? {
            let Some(record) = self.load_valid(&dir).await else {
                continue;
            };

            if let Some(existing) = discovered.get(&record.id) {
                tracing::warn!(
                    model_id = %record.id,
                    kept = ?existing.local_path,
                    skipped = ?dir,
                    "Duplicate model id in storage"
                );
                continue;
            }
            discovered.insert(record.id.clone(), record);
        }

        let count = discovered.len();
        *self.index.write().await = discovered;

        tracing::info!(root = ?self.root, models = count, "Local models discovered");
        crate::metrics::update_local_model_count(count);

        Ok(count)
    }

    /// Remove model directories that lack valid sidecar metadata
    ///
    /// Returns the removed directories. Hidden directories (staging and
    /// downloads) are never touched.
    pub async fn cleanup_orphaned_files(&self) -> DepotResult<Vec<PathBuf>> {
        let _guard = self.mutation_lock.lock().await;

        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for dir in self.model_dirs().await? {
            if self.load_valid(&dir).await.is_some() {
                continue;
            }

            match fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    tracing::info!(path = ?dir, "Removed orphaned model directory");
                    removed.push(dir);
                }
                Err(e) => {
                    tracing::warn!(path = ?dir, error = %e, "Failed to remove orphaned directory");
                }
            }
        }

        // Drop index entries whose directory was just removed
        if !removed.is_empty() {
            let mut index = self.index.write().await;
            index.retain(|id, _| !removed.contains(&self.model_dir(id)));
        }

        Ok(removed)
    }

    /// Detailed integrity check of the stored artifact
    ///
    /// Uses the indexed record when there is one, otherwise the record as given.
    pub async fn verify_model(&self, record: &ModelRecord) -> DepotResult<VerificationResult> {
        let target = self
            .get_local_model(&record.id)
            .await
            .unwrap_or_else(|| record.clone());
        self.verifier.verify_model(&target).await
    }

    /// `true` iff the stored artifact passes every integrity check
    pub async fn verify_model_integrity(&self, record: &ModelRecord) -> DepotResult<bool> {
        Ok(self.verify_model(record).await?.is_valid)
    }

    /// `true` if the model is indexed and its payload exists
    pub async fn is_model_local(&self, record: &ModelRecord) -> bool {
        match self.get_model_path(record).await {
            Some(path) => fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Path of the stored payload, if the model is local
    pub async fn get_model_path(&self, record: &ModelRecord) -> Option<PathBuf> {
        let index = self.index.read().await;
        index.get(&record.id).and_then(|r| r.local_path.clone())
    }

    /// Update the loaded flag in the index and the sidecar
    pub async fn set_loaded(&self, model_id: &str, loaded: bool) -> DepotResult<ModelRecord> {
        let _guard = self.mutation_lock.lock().await;

        let mut record = self.get_local_model(model_id).await.ok_or_else(|| {
            DepotError::not_found(format!("Model '{}' is not stored locally", model_id))
        })?;

        if record.is_loaded == loaded {
            return Ok(record);
        }

        record.is_loaded = loaded;
        write_sidecar(&self.model_dir(model_id), &record).await?;
        self.index
            .write()
            .await
            .insert(record.id.clone(), record.clone());

        tracing::debug!(model_id = %model_id, loaded = loaded, "Loaded flag updated");
        Ok(record)
    }

    /// Count and total size of indexed models
    pub async fn get_storage_statistics(&self) -> StorageStatistics {
        let (model_count, total_bytes) = {
            let index = self.index.read().await;
            (index.len(), index.values().map(|r| r.size).sum())
        };

        StorageStatistics {
            model_count,
            total_bytes,
            storage_root: self.root.clone(),
            available_bytes: available_space(&self.root),
        }
    }

    /// Visible subdirectories of the storage root
    async fn model_dirs(&self) -> DepotResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }

        Ok(dirs)
    }

    /// Load a directory's record if its sidecar is valid and its payload exists
    ///
    /// The local path is rebased onto `dir` so a moved storage root keeps working.
    async fn load_valid(&self, dir: &Path) -> Option<ModelRecord> {
        let mut record = match read_sidecar(dir).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(path = ?dir, "No sidecar metadata");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = ?dir, error = %e, "Invalid sidecar metadata");
                return None;
            }
        };

        let file_name = record
            .local_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())?;
        let payload = dir.join(&file_name);

        if file_name == SIDECAR_FILE || !fs::try_exists(&payload).await.unwrap_or(false) {
            tracing::debug!(model_id = %record.id, path = ?payload, "Payload missing");
            return None;
        }

        if record.parameters.trim().is_empty() {
            record.parameters = self.parameter_table.label_for_size(record.size).to_string();
        }
        record.local_path = Some(payload);
        record.is_local = true;
        // Nothing is loaded until the runtime says so again
        record.is_loaded = false;

        Some(record)
    }
}

/// A staged directory that could not be swapped into place
#[derive(Debug)]
struct CommitFailure {
    error: std::io::Error,
    /// The replaced directory could not be put back at the destination
    previous_lost: bool,
}

/// Rename `staging` onto `destination`, restoring `previous` there on failure
async fn commit_dir(
    staging: &Path,
    destination: &Path,
    previous: Option<&Path>,
) -> Result<(), CommitFailure> {
    let Err(error) = fs::rename(staging, destination).await else {
        return Ok(());
    };

    let previous_lost = match previous {
        Some(trash) => match fs::rename(trash, destination).await {
            Ok(()) => false,
            Err(e) => {
                tracing::error!(
                    path = ?destination,
                    backup = ?trash,
                    error = %e,
                    "Failed to restore replaced model directory"
                );
                true
            }
        },
        None => false,
    };

    Err(CommitFailure {
        error,
        previous_lost,
    })
}

/// Copy a file with scoped handles; both are closed on every exit path
async fn copy_payload(source: &Path, destination: &Path) -> DepotResult<u64> {
    let mut reader = fs::File::open(source).await?;
    let mut writer = fs::File::create(destination).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.sync_all().await?;
    Ok(copied)
}

/// File name of the payload inside the model directory
fn payload_name(record: &ModelRecord, source: &Path) -> String {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.ends_with(".part"))
        .map(str::to_string)
        .unwrap_or_else(|| record.payload_file_name());

    if name == SIDECAR_FILE {
        format!("payload-{}", name)
    } else {
        name
    }
}

fn unique_name(base: &str) -> String {
    let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}.{}.{}", base, std::process::id(), n)
}

fn sort_by_name(models: &mut [ModelRecord]) {
    models.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
}
