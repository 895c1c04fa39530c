//! Integrity verification of on-disk model artifacts
//!
//! The verifier is stateless and never trusts the local index: it only looks
//! at the file the record points to. Only two conditions are raised as errors
//! (missing path/file and files below the size floor); every other problem is
//! reported inside the returned [`VerificationResult`].

use crate::error::{DepotError, DepotResult};
use crate::models::{ModelFormat, ModelRecord};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

/// Default minimum payload size; anything smaller cannot be a model
pub const DEFAULT_MIN_MODEL_SIZE: u64 = 1024;

/// "GGUF" read as a little-endian u32
const GGUF_MAGIC: u32 = 0x4655_4747;

/// Legacy GGML family tags
const GGML_TAGS: [&[u8; 4]; 5] = [b"ggml", b"ggmf", b"ggjt", b"ggla", b"ggsn"];

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of verifying one artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub is_readable: bool,
    pub size_matches: bool,
    pub actual_size: u64,
    pub expected_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ModelFormat>,
    pub diagnostics: Vec<String>,
    pub elapsed: Duration,
}

/// Stateless validator of on-disk artifacts
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    min_size: u64,
}

impl IntegrityVerifier {
    pub fn new(min_size: u64) -> Self {
        Self { min_size }
    }

    /// Verify the artifact a record points at
    ///
    /// # Errors
    /// * `NotFound` when the record has no local path or the file does not exist
    /// * `Storage` when the file is below the minimum size floor
    pub async fn verify_model(&self, record: &ModelRecord) -> DepotResult<VerificationResult> {
        let started = Instant::now();

        let path = record.local_path.as_deref().ok_or_else(|| {
            DepotError::not_found(format!("Model '{}' has no local path", record.id))
        })?;

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return Err(DepotError::not_found(format!(
                    "Model path is not a file: {:?}",
                    path
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DepotError::not_found(format!(
                    "Model file not found: {:?}",
                    path
                )));
            }
            Err(e) => {
                return Ok(Self::unreadable(record, started, format!("Cannot stat file: {}", e)));
            }
        };

        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                return Ok(Self::unreadable(record, started, format!("Cannot open file: {}", e)));
            }
        };

        let actual_size = metadata.len();
        if actual_size < self.min_size {
            return Err(DepotError::storage(format!(
                "Model file {:?} is too small to be a model: {} bytes (minimum {})",
                path, actual_size, self.min_size
            )));
        }

        let mut diagnostics = Vec::new();
        let mut is_readable = true;

        let size_matches = actual_size == record.size;
        if !size_matches {
            diagnostics.push(format!(
                "Size mismatch: expected {} bytes, found {} bytes",
                record.size, actual_size
            ));
        }

        let format = ModelFormat::from_path(path);
        let mut signature_ok = true;
        if let Some(format) = format {
            let mut header = [0u8; 4];
            match file.read_exact(&mut header).await {
                Ok(_) if signature_matches(format, header) => {}
                Ok(_) => {
                    signature_ok = false;
                    diagnostics.push(format!(
                        "Invalid {} signature: leading bytes {:02x?}",
                        format, header
                    ));
                }
                Err(e) => {
                    signature_ok = false;
                    is_readable = false;
                    diagnostics.push(format!("Cannot read {} header: {}", format, e));
                }
            }
        }

        let mut checksum_ok = true;
        if let Some(expected) = &record.sha256
            && is_readable
        {
            match sha256_file(path).await {
                Ok(actual) if actual.eq_ignore_ascii_case(expected.trim()) => {}
                Ok(actual) => {
                    checksum_ok = false;
                    diagnostics.push(format!(
                        "Checksum mismatch: expected {}, calculated {}",
                        expected, actual
                    ));
                }
                Err(e) => {
                    checksum_ok = false;
                    is_readable = false;
                    diagnostics.push(format!("Cannot hash file: {}", e));
                }
            }
        }

        let is_valid = is_readable && size_matches && signature_ok && checksum_ok;

        if is_valid {
            tracing::debug!(model_id = %record.id, size = actual_size, "Integrity check passed");
        } else {
            tracing::warn!(
                model_id = %record.id,
                diagnostics = ?diagnostics,
                "Integrity check failed"
            );
            crate::metrics::record_integrity_failure(&record.id);
        }

        Ok(VerificationResult {
            is_valid,
            is_readable,
            size_matches,
            actual_size,
            expected_size: record.size,
            format,
            diagnostics,
            elapsed: started.elapsed(),
        })
    }

    /// Boolean convenience: any error counts as invalid
    pub async fn quick_verify(&self, record: &ModelRecord) -> bool {
        match self.verify_model(record).await {
            Ok(result) => result.is_valid,
            Err(e) => {
                tracing::debug!(model_id = %record.id, error = %e, "Quick verify failed");
                false
            }
        }
    }

    fn unreadable(record: &ModelRecord, started: Instant, message: String) -> VerificationResult {
        VerificationResult {
            is_valid: false,
            is_readable: false,
            size_matches: false,
            actual_size: 0,
            expected_size: record.size,
            format: record.format(),
            diagnostics: vec![message],
            elapsed: started.elapsed(),
        }
    }
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_MODEL_SIZE)
    }
}

/// Check the leading bytes against the container's fixed signature
fn signature_matches(format: ModelFormat, header: [u8; 4]) -> bool {
    match format {
        ModelFormat::Gguf => u32::from_le_bytes(header) == GGUF_MAGIC,
        ModelFormat::Ggml => {
            // Legacy writers emit the tag as a little-endian u32, so accept both byte orders
            let mut reversed = header;
            reversed.reverse();
            GGML_TAGS
                .iter()
                .any(|tag| **tag == header || **tag == reversed)
        }
    }
}

/// Hex SHA-256 of a file, streamed in chunks
async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, header: &[u8], len: usize) -> PathBuf {
        let path = dir.path().join(name);
        let mut content = header.to_vec();
        content.resize(len, 0xAB);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn local_record(path: PathBuf, size: u64) -> ModelRecord {
        let mut record = ModelRecord::new("test/model", "Test", size);
        record.mark_local(path);
        record
    }

    #[tokio::test]
    async fn test_valid_plain_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "model.bin", b"", 4096);
        let result = IntegrityVerifier::default()
            .verify_model(&local_record(path, 4096))
            .await
            .unwrap();

        assert!(result.is_valid);
        assert!(result.is_readable);
        assert!(result.size_matches);
        assert_eq!(result.actual_size, 4096);
        assert!(result.diagnostics.is_empty());
        assert!(result.format.is_none());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_reported_not_thrown() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "model.bin", b"", 4096);
        let result = IntegrityVerifier::default()
            .verify_model(&local_record(path, 5000))
            .await
            .unwrap();

        assert!(!result.is_valid);
        assert!(!result.size_matches);
        assert_eq!(result.expected_size, 5000);
        assert!(result.diagnostics[0].contains("5000"));
        assert!(result.diagnostics[0].contains("4096"));
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let record = ModelRecord::new("test/model", "Test", 10);
        let err = IntegrityVerifier::default()
            .verify_model(&record)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let record = local_record(dir.path().join("gone.gguf"), 10);
        let err = IntegrityVerifier::default()
            .verify_model(&record)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_tiny_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "model.bin", b"", 10);
        let err = IntegrityVerifier::default()
            .verify_model(&local_record(path, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("too small"));
    }

    #[tokio::test]
    async fn test_gguf_signature() {
        let dir = TempDir::new().unwrap();
        let good = write_file(&dir, "good.gguf", b"GGUF", 2048);
        let bad = write_file(&dir, "bad.gguf", b"NOPE", 2048);
        let verifier = IntegrityVerifier::default();

        let result = verifier.verify_model(&local_record(good, 2048)).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.format, Some(ModelFormat::Gguf));

        let result = verifier.verify_model(&local_record(bad, 2048)).await.unwrap();
        assert!(!result.is_valid);
        assert!(result.size_matches);
        assert!(result.diagnostics[0].contains("GGUF"));
    }

    #[tokio::test]
    async fn test_ggml_signature_both_byte_orders() {
        let dir = TempDir::new().unwrap();
        let forward = write_file(&dir, "a.ggml", b"ggjt", 2048);
        let reversed = write_file(&dir, "b.ggml", b"lmgg", 2048);
        let bad = write_file(&dir, "c.ggml", b"GGUF", 2048);
        let verifier = IntegrityVerifier::default();

        assert!(verifier.quick_verify(&local_record(forward, 2048)).await);
        assert!(verifier.quick_verify(&local_record(reversed, 2048)).await);

        let result = verifier.verify_model(&local_record(bad, 2048)).await.unwrap();
        assert!(!result.is_valid);
        assert!(result.diagnostics[0].contains("GGML"));
    }

    #[tokio::test]
    async fn test_checksum_verification() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "model.bin", b"", 2048);
        let content = std::fs::read(&path).unwrap();
        let digest = format!("{:x}", Sha256::digest(&content));
        let verifier = IntegrityVerifier::default();

        let good = local_record(path.clone(), 2048).with_sha256(digest.to_uppercase());
        assert!(verifier.quick_verify(&good).await);

        let bad = local_record(path, 2048).with_sha256("00".repeat(32));
        let result = verifier.verify_model(&bad).await.unwrap();
        assert!(!result.is_valid);
        assert!(result.diagnostics[0].contains("Checksum mismatch"));
    }

    #[tokio::test]
    async fn test_quick_verify_swallows_errors() {
        let record = ModelRecord::new("test/model", "Test", 10);
        assert!(!IntegrityVerifier::default().quick_verify(&record).await);
    }

    #[tokio::test]
    async fn test_custom_min_size() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "model.bin", b"", 16);
        let verifier = IntegrityVerifier::new(8);
        assert!(verifier.quick_verify(&local_record(path, 16)).await);
    }

    #[test]
    fn test_signature_matches() {
        assert!(signature_matches(ModelFormat::Gguf, *b"GGUF"));
        assert!(!signature_matches(ModelFormat::Gguf, *b"FUGG"));
        assert!(signature_matches(ModelFormat::Ggml, *b"ggml"));
        assert!(signature_matches(ModelFormat::Ggml, *b"fmgg"));
        assert!(!signature_matches(ModelFormat::Ggml, *b"gguf"));
    }
}
