//! Shared fixtures for integration tests
//!
//! `FakeTransport` serves scripted payloads from memory so downloads run
//! end-to-end without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use model_depot::download::{ProgressSink, TransportError};
use model_depot::models::CompatibilityTier;
use model_depot::{ModelRecord, Transport};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Clone)]
pub enum Payload {
    /// Real bytes written in 1 KiB chunks
    Bytes(Vec<u8>),
    /// Header followed by a hole up to `len`
    Sparse { header: Vec<u8>, len: u64 },
    Error(String),
}

#[derive(Default)]
pub struct FakeTransport {
    payloads: Mutex<HashMap<String, Payload>>,
}

impl FakeTransport {
    pub fn serve(&self, url: &str, payload: Payload) {
        self.payloads
            .lock()
            .unwrap()
            .insert(url.to_string(), payload);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: ProgressSink,
    ) -> Result<u64, TransportError> {
        let payload = self
            .payloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                status: 404,
                url: url.to_string(),
            })?;

        let mut file = tokio::fs::File::create(destination).await?;
        match payload {
            Payload::Bytes(bytes) => {
                let total = bytes.len() as u64;
                let mut written = 0u64;
                for chunk in bytes.chunks(1024) {
                    file.write_all(chunk).await?;
                    written += chunk.len() as u64;
                    progress.report(written, Some(total));
                    tokio::task::yield_now().await;
                }
                file.flush().await?;
                Ok(written)
            }
            Payload::Sparse { header, len } => {
                file.write_all(&header).await?;
                file.set_len(len).await?;
                file.flush().await?;
                progress.report(len, Some(len));
                Ok(len)
            }
            Payload::Error(message) => Err(TransportError::Request(message)),
        }
    }
}

/// GGUF magic followed by filler up to `len` bytes
pub fn gguf_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"GGUF".to_vec();
    bytes.resize(len, 0x11);
    bytes
}

pub fn url_for(id: &str) -> String {
    format!("https://models.test/{}/weights.gguf", id)
}

/// Remote listing entry pointing at `url_for(id)`
pub fn remote(id: &str, name: &str, size: u64) -> ModelRecord {
    ModelRecord::new(id, name, size)
        .with_download_url(url_for(id))
        .with_compatibility(CompatibilityTier::FullyCompatible)
}
