//! Sidecar metadata stored next to each payload

use crate::error::{DepotError, DepotResult};
use crate::models::ModelRecord;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// File name of the sidecar inside a model directory
pub const SIDECAR_FILE: &str = "model.json";

/// Write the sidecar atomically: write to a temp file, sync, then rename
pub async fn write_sidecar(dir: &Path, record: &ModelRecord) -> DepotResult<()> {
    let path = dir.join(SIDECAR_FILE);
    let temp_file = path.with_extension("tmp");
    let content = serde_json::to_vec_pretty(record)?;

    let mut file = fs::File::create(&temp_file).await?;
    file.write_all(&content).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_file, &path).await?;

    tracing::trace!(model_id = %record.id, path = ?path, "Sidecar written");
    Ok(())
}

/// Read the sidecar from a model directory
///
/// Returns `Ok(None)` when there is no sidecar and an error when it exists
/// but cannot be parsed.
pub async fn read_sidecar(dir: &Path) -> DepotResult<Option<ModelRecord>> {
    let path = dir.join(SIDECAR_FILE);

    let content = match fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let record: ModelRecord = serde_json::from_slice(&content)?;
    if record.id.trim().is_empty() {
        return Err(DepotError::validation(format!(
            "Sidecar {:?} has an empty model id",
            path
        )));
    }

    Ok(Some(record))
}
