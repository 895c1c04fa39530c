//! Byte transport used by the download manager

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

/// Cumulative transfer counters reported by a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    /// Length announced by the remote side, if any
    pub total: Option<u64>,
}

/// Write end of a progress channel handed to [`Transport::fetch`]
///
/// Reporting never blocks and never fails; intermediate values may be
/// coalesced when the reader is slower than the transport.
#[derive(Debug)]
pub struct ProgressSink {
    tx: watch::Sender<TransferProgress>,
}

impl ProgressSink {
    pub fn channel() -> (Self, watch::Receiver<TransferProgress>) {
        let (tx, rx) = watch::channel(TransferProgress::default());
        (Self { tx }, rx)
    }

    pub fn report(&self, received: u64, total: Option<u64>) {
        self.tx.send_replace(TransferProgress { received, total });
    }
}

/// Failures raised while moving bytes
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("server returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to write download: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Moves the bytes behind a URL into a local file
///
/// Implementations truncate `destination`, stream into it, report cumulative
/// progress and return the number of bytes written. They must be
/// cancel-safe: the manager drops the future to abort a transfer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: ProgressSink,
    ) -> Result<u64, TransportError>;
}

/// Production transport over HTTP(S)
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with a connect timeout; the transfer itself has no deadline
    pub fn new(connect_timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: ProgressSink,
    ) -> Result<u64, TransportError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        tracing::debug!(url = %url, total = ?total, "Transfer started");

        let mut file = tokio::fs::File::create(destination).await?;
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.report(received, total);
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(received)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// What the scripted transport does for a URL
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Write `len` bytes starting with `header`, in `chunks` steps
        Serve {
            header: Vec<u8>,
            len: u64,
            chunks: u64,
        },
        /// Fail after writing a few bytes
        Fail(String),
        /// Write a little, then wait until released
        Hold { len: u64 },
    }

    /// Transport that answers from a script instead of the network
    #[derive(Default)]
    pub struct ScriptedTransport {
        scripts: Mutex<HashMap<String, Script>>,
        release: Notify,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, url: &str, script: Script) {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), script);
        }

        /// Let every held transfer finish
        pub fn release(&self) {
            self.release.notify_waiters();
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(
            &self,
            url: &str,
            destination: &Path,
            progress: ProgressSink,
        ) -> Result<u64, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| TransportError::Status {
                    status: 404,
                    url: url.to_string(),
                })?;

            let mut file = tokio::fs::File::create(destination).await?;
            match script {
                Script::Serve {
                    header,
                    len,
                    chunks,
                } => {
                    file.write_all(&header).await?;
                    let step = (len / chunks.max(1)).max(1);
                    let mut written = header.len() as u64;
                    while written < len {
                        let next = (written + step).min(len);
                        let filler = vec![0u8; (next - written) as usize];
                        file.write_all(&filler).await?;
                        written = next;
                        progress.report(written, Some(len));
                        tokio::task::yield_now().await;
                    }
                    file.flush().await?;
                    Ok(written)
                }
                Script::Fail(message) => {
                    file.write_all(b"partial").await?;
                    progress.report(7, None);
                    Err(TransportError::Request(message))
                }
                Script::Hold { len } => {
                    let notified = self.release.notified();
                    file.write_all(&vec![0u8; (len / 2) as usize]).await?;
                    progress.report(len / 2, Some(len));
                    notified.await;
                    file.write_all(&vec![0u8; (len - len / 2) as usize]).await?;
                    file.flush().await?;
                    Ok(len)
                }
            }
        }
    }
}
