//! Local model storage
//!
//! Layout under the storage root:
//! ```text
//! <root>/
//! ├── .downloads/                 in-flight transfers (*.part)
//! ├── .staging/                   imports being assembled
//! ├── TheBloke--Llama-2-7B-GGUF/
//! │   ├── llama-2-7b.Q4_K_M.gguf
//! │   └── model.json              sidecar (serialized ModelRecord)
//! └── some-orphan/                no sidecar, removed by cleanup
//! ```

pub mod local;
pub mod sidecar;

pub use local::{LocalRepository, StorageStatistics};
pub use sidecar::{SIDECAR_FILE, read_sidecar, write_sidecar};

use crate::error::{DepotError, DepotResult};
use std::path::Path;

/// Directory for transfers that have not finished yet
pub const DOWNLOADS_DIR: &str = ".downloads";

/// Directory for imports that have not been committed yet
pub const STAGING_DIR: &str = ".staging";

/// Convert model ID to storage directory name
///
/// e.g., "TheBloke/Llama-2-7B-GGUF" -> "TheBloke--Llama-2-7B-GGUF"
pub fn model_id_to_dir_name(model_id: &str) -> String {
    model_id.replace('/', "--")
}

/// Reject ids that cannot be mapped to a single directory under the root
pub fn validate_model_id(model_id: &str) -> DepotResult<()> {
    if model_id.trim().is_empty() {
        return Err(DepotError::validation("Model id cannot be empty"));
    }
    if model_id.starts_with('.') {
        return Err(DepotError::validation(format!(
            "Model id '{}' cannot start with '.'",
            model_id
        )));
    }
    if model_id.contains('\\') || model_id.contains('\0') {
        return Err(DepotError::validation(format!(
            "Model id '{}' contains invalid characters",
            model_id
        )));
    }
    if model_id.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(DepotError::validation(format!(
            "Model id '{}' has an empty or relative path segment",
            model_id
        )));
    }
    Ok(())
}

/// Free bytes on the volume holding `path`, if the platform reports it
#[allow(clippy::unnecessary_cast)]
pub fn available_space(path: &Path) -> Option<u64> {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stats) => Some(stats.blocks_available() as u64 * stats.fragment_size() as u64),
        Err(e) => {
            tracing::debug!(path = ?path, error = %e, "Failed to query free space");
            None
        }
    }
}

/// Format bytes as human-readable string
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_to_dir_name() {
        assert_eq!(
            model_id_to_dir_name("TheBloke/Llama-2-7B-GGUF"),
            "TheBloke--Llama-2-7B-GGUF"
        );
        assert_eq!(model_id_to_dir_name("plain"), "plain");
    }

    #[test]
    fn test_validate_model_id() {
        assert!(validate_model_id("org/name").is_ok());
        assert!(validate_model_id("name-v1.5").is_ok());
        assert!(validate_model_id("").is_err());
        assert!(validate_model_id(".hidden").is_err());
        assert!(validate_model_id("..").is_err());
        assert!(validate_model_id("org/../etc").is_err());
        assert!(validate_model_id("org//name").is_err());
        assert!(validate_model_id("org\\name").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_610_612_736), "1.50 GB");
    }

    #[test]
    fn test_available_space_of_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        // Every supported platform reports statvfs for a real directory
        assert!(available_space(dir.path()).is_some());
    }

    #[test]
    fn test_available_space_missing_path() {
        assert!(available_space(Path::new("/nonexistent/path/for/depot/12345")).is_none());
    }
}
