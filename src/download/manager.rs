//! Download orchestration
//!
//! Every status change goes through [`Inner::apply_transition`] while the
//! table's write lock is held, so the active map, the history and the
//! published events never disagree. Terminal transitions name the attempt
//! they belong to and are ignored once that attempt is terminal.

use super::progress::{
    DownloadEvent, DownloadProgress, DownloadRecord, DownloadStatistics, DownloadStatus,
    SpeedEstimator,
};
use super::transport::{ProgressSink, TransferProgress, Transport, TransportError};
use crate::config::DepotConfig;
use crate::error::{DepotError, DepotResult};
use crate::models::ModelRecord;
use crate::storage::{LocalRepository, available_space, format_bytes, model_id_to_dir_name};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for the download manager
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub max_concurrent: usize,
    /// Weight of the newest sample in the smoothed speed
    pub speed_smoothing: f64,
    /// Minimum interval between `Progress` events for one download
    pub progress_interval: Duration,
    pub check_disk_space: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            speed_smoothing: 0.3,
            progress_interval: Duration::from_millis(250),
            check_disk_space: true,
        }
    }
}

impl DownloadSettings {
    pub fn from_config(config: &DepotConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_downloads,
            speed_smoothing: config.speed_smoothing,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            check_disk_space: config.check_disk_space,
        }
    }
}

/// Latest attempt for one model id
struct Entry {
    record: ModelRecord,
    progress: DownloadProgress,
    cancel: CancellationToken,
    last_event: Option<Instant>,
}

#[derive(Default)]
struct DownloadTable {
    attempts: HashMap<String, Entry>,
    history: Vec<DownloadRecord>,
}

impl DownloadTable {
    fn active_count(&self) -> usize {
        self.attempts
            .values()
            .filter(|e| !e.progress.is_terminal())
            .count()
    }
}

struct Inner {
    repository: Arc<LocalRepository>,
    transport: Arc<dyn Transport>,
    settings: DownloadSettings,
    table: RwLock<DownloadTable>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<DownloadEvent>,
}

/// Handle to a scheduled download attempt
///
/// Dropping the ticket does not cancel the download.
#[derive(Debug)]
pub struct DownloadTicket {
    model_id: String,
    attempt: u32,
    handle: JoinHandle<DepotResult<ModelRecord>>,
}

impl DownloadTicket {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait for the attempt to finish and return the stored record
    pub async fn wait(self) -> DepotResult<ModelRecord> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(DepotError::network(format!(
                "Download task for '{}' stopped unexpectedly: {}",
                self.model_id, e
            ))),
        }
    }
}

/// Schedules, tracks and finalizes model downloads
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        repository: Arc<LocalRepository>,
        transport: Arc<dyn Transport>,
        settings: DownloadSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));

        Self {
            inner: Arc::new(Inner {
                repository,
                transport,
                settings,
                table: RwLock::new(DownloadTable::default()),
                semaphore,
                events,
            }),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    /// Validate and schedule a download
    ///
    /// # Errors
    /// * `Validation` if the model is already local or a download for it is active
    /// * `Network` if the record has no download URL
    /// * `Storage` if the storage volume cannot hold the model
    pub async fn download_model(&self, record: &ModelRecord) -> DepotResult<DownloadTicket> {
        if record.is_local || self.inner.repository.get_local_model(&record.id).await.is_some() {
            return Err(DepotError::validation(format!(
                "Model '{}' is already downloaded",
                record.id
            )));
        }

        let url = record
            .download_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                DepotError::network(format!("Model '{}' has no download URL", record.id))
            })?
            .to_string();

        crate::storage::validate_model_id(&record.id)?;
        let space_error = self.disk_space_error(record);

        let (attempt, cancel) = {
            let mut table = self.inner.table.write().await;

            let previous_attempt = match table.attempts.get(&record.id) {
                Some(entry) if !entry.progress.is_terminal() => {
                    return Err(DepotError::validation(format!(
                        "Download of '{}' is already in progress",
                        record.id
                    )));
                }
                Some(entry) => entry.progress.attempt,
                None => 0,
            };

            if let Some(e) = space_error {
                return Err(e);
            }

            let attempt = previous_attempt + 1;
            let cancel = CancellationToken::new();
            let progress = DownloadProgress::pending(&record.id, &record.name, record.size, attempt);

            let _ = self
                .inner
                .events
                .send(DownloadEvent::for_status(progress.clone()));
            table.attempts.insert(
                record.id.clone(),
                Entry {
                    record: record.clone(),
                    progress,
                    cancel: cancel.clone(),
                    last_event: None,
                },
            );
            crate::metrics::update_active_downloads(table.active_count());

            (attempt, cancel)
        };

        tracing::info!(model_id = %record.id, attempt = attempt, url = %url, "Download queued");
        crate::metrics::record_download_started(&record.id);

        let inner = self.inner.clone();
        let task_record = record.clone();
        let handle = tokio::spawn(async move {
            inner.run_attempt(task_record, url, attempt, cancel).await
        });

        Ok(DownloadTicket {
            model_id: record.id.clone(),
            attempt,
            handle,
        })
    }

    /// Cancel the active attempt for `model_id`
    ///
    /// Cancelling an already cancelled download is a no-op.
    ///
    /// # Errors
    /// * `Network` if there is no active download for the id
    pub async fn cancel_download(&self, model_id: &str) -> DepotResult<()> {
        let mut table = self.inner.table.write().await;

        let Some(entry) = table.attempts.get(model_id) else {
            return Err(no_active_download(model_id));
        };
        match entry.progress.status {
            DownloadStatus::Cancelled => return Ok(()),
            status if status.is_terminal() => return Err(no_active_download(model_id)),
            _ => {}
        }

        let attempt = entry.progress.attempt;
        let cancel = entry.cancel.clone();
        self.inner
            .apply_transition(&mut table, model_id, attempt, DownloadStatus::Cancelled, None);
        drop(table);

        cancel.cancel();
        tracing::info!(model_id = %model_id, attempt = attempt, "Download cancelled");
        Ok(())
    }

    /// Start a fresh attempt for a download whose latest attempt failed
    ///
    /// # Errors
    /// * `Validation` if the latest attempt did not fail
    pub async fn retry_download(&self, model_id: &str) -> DepotResult<DownloadTicket> {
        let record = {
            let table = self.inner.table.read().await;
            match table.attempts.get(model_id) {
                Some(entry) if entry.progress.status == DownloadStatus::Failed => {
                    entry.record.clone()
                }
                _ => {
                    return Err(DepotError::validation(format!(
                        "No failed download for '{}' to retry",
                        model_id
                    )));
                }
            }
        };

        tracing::info!(model_id = %model_id, "Retrying download");
        self.download_model(&record).await
    }

    /// Snapshot of the latest attempt for `model_id`
    pub async fn get_download_progress(&self, model_id: &str) -> Option<DownloadProgress> {
        let table = self.inner.table.read().await;
        table.attempts.get(model_id).map(|e| e.progress.clone())
    }

    /// Snapshots of every non-terminal attempt, oldest first
    pub async fn get_active_downloads(&self) -> Vec<DownloadProgress> {
        let table = self.inner.table.read().await;
        let mut active: Vec<_> = table
            .attempts
            .values()
            .filter(|e| !e.progress.is_terminal())
            .map(|e| e.progress.clone())
            .collect();
        active.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        active
    }

    /// Finished attempts in completion order
    pub async fn get_download_history(&self) -> Vec<DownloadRecord> {
        self.inner.table.read().await.history.clone()
    }

    /// Forget finished attempts; active downloads are unaffected
    pub async fn clear_download_history(&self) {
        let mut table = self.inner.table.write().await;
        let cleared = table.history.len();
        table.history.clear();
        tracing::debug!(cleared = cleared, "Download history cleared");
    }

    pub async fn get_download_statistics(&self) -> DownloadStatistics {
        let table = self.inner.table.read().await;
        DownloadStatistics::from_history(&table.history, table.active_count())
    }

    /// Cancel every active download, e.g. on shutdown
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<String> = {
            let table = self.inner.table.read().await;
            table
                .attempts
                .iter()
                .filter(|(_, e)| !e.progress.is_terminal())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if self.cancel_download(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    fn disk_space_error(&self, record: &ModelRecord) -> Option<DepotError> {
        if !self.inner.settings.check_disk_space {
            return None;
        }

        // The root may not exist yet; ask the closest existing ancestor
        let probe = self
            .inner
            .repository
            .root()
            .ancestors()
            .find(|p| p.exists())?;
        let available = available_space(probe)?;
        if available >= record.size {
            return None;
        }

        Some(DepotError::storage(format!(
            "Not enough disk space for '{}': needs {}, {} available",
            record.id,
            format_bytes(record.size),
            format_bytes(available)
        )))
    }
}

enum Outcome {
    Transferred(Result<u64, TransportError>),
    Cancelled,
}

impl Inner {
    async fn run_attempt(
        self: Arc<Self>,
        record: ModelRecord,
        url: String,
        attempt: u32,
        cancel: CancellationToken,
    ) -> DepotResult<ModelRecord> {
        let model_id = record.id.clone();

        // Wait in `pending` for a transfer slot
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled_error(&model_id)),
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let message = "download manager is shutting down".to_string();
                    self.transition(&model_id, attempt, DownloadStatus::Failed, Some(message.clone()))
                        .await;
                    return Err(DepotError::network(message));
                }
            },
        };

        if !self
            .transition(&model_id, attempt, DownloadStatus::Downloading, None)
            .await
        {
            return Err(cancelled_error(&model_id));
        }

        let partial = self.partial_path(&model_id);
        if let Err(e) = self.prepare_partial(&partial).await {
            let message = format!("Failed to prepare download directory: {}", e);
            self.transition(&model_id, attempt, DownloadStatus::Failed, Some(message))
                .await;
            return Err(e);
        }

        let outcome = self
            .transfer(&record, &url, &partial, attempt, &cancel)
            .await;

        let received = match outcome {
            Outcome::Cancelled => {
                remove_partial(&partial).await;
                self.transition(&model_id, attempt, DownloadStatus::Cancelled, None)
                    .await;
                return Err(cancelled_error(&model_id));
            }
            Outcome::Transferred(Err(e)) => {
                remove_partial(&partial).await;
                let message = e.to_string();
                tracing::warn!(model_id = %model_id, attempt = attempt, error = %message, "Transfer failed");
                self.transition(&model_id, attempt, DownloadStatus::Failed, Some(message.clone()))
                    .await;
                return Err(DepotError::network(format!(
                    "Download of '{}' failed: {}",
                    model_id, message
                )));
            }
            Outcome::Transferred(Ok(received)) => received,
        };

        match self.finalize(&record, &partial, received).await {
            Ok(stored) => {
                if self
                    .transition(&model_id, attempt, DownloadStatus::Completed, None)
                    .await
                {
                    tracing::info!(
                        model_id = %model_id,
                        attempt = attempt,
                        bytes = received,
                        "Download completed"
                    );
                    return Ok(stored);
                }

                // A cancel won the race while the payload was being stored
                if let Err(e) = self.repository.delete_model(&stored).await {
                    tracing::warn!(model_id = %model_id, error = %e, "Failed to discard cancelled download");
                }
                Err(cancelled_error(&model_id))
            }
            Err(e) => {
                remove_partial(&partial).await;
                self.transition(&model_id, attempt, DownloadStatus::Failed, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Drive the transport while folding its progress into the table
    async fn transfer(
        &self,
        record: &ModelRecord,
        url: &str,
        partial: &Path,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Outcome {
        let (sink, mut progress_rx) = ProgressSink::channel();
        let fetch = self.transport.fetch(url, partial, sink);
        tokio::pin!(fetch);

        let mut estimator = SpeedEstimator::new(self.settings.speed_smoothing);
        let mut progress_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                result = &mut fetch => {
                    let last = *progress_rx.borrow();
                    self.apply_progress(record, attempt, last, &mut estimator).await;
                    return Outcome::Transferred(result);
                }
                changed = progress_rx.changed(), if progress_open => {
                    if changed.is_err() {
                        progress_open = false;
                        continue;
                    }
                    let update = *progress_rx.borrow_and_update();
                    self.apply_progress(record, attempt, update, &mut estimator).await;
                }
            }
        }
    }

    /// Size check and hand-over to local storage
    async fn finalize(
        &self,
        record: &ModelRecord,
        partial: &Path,
        received: u64,
    ) -> DepotResult<ModelRecord> {
        let actual = tokio::fs::metadata(partial).await?.len();
        if actual != received {
            tracing::debug!(
                model_id = %record.id,
                reported = received,
                on_disk = actual,
                "Transport count differs from file length"
            );
        }

        if record.size > 0 && actual != record.size {
            return Err(DepotError::storage(format!(
                "Downloaded size mismatch for '{}': expected {} bytes, received {} bytes",
                record.id, record.size, actual
            )));
        }

        let mut stored = record.clone();
        stored.is_local = false;
        stored.local_path = None;
        self.repository.adopt_model(&stored, partial).await
    }

    async fn apply_progress(
        &self,
        record: &ModelRecord,
        attempt: u32,
        update: TransferProgress,
        estimator: &mut SpeedEstimator,
    ) {
        let speed = estimator.update(update.received, Instant::now());
        let total = if record.size > 0 {
            record.size
        } else {
            update.total.unwrap_or(0)
        };

        let mut table = self.table.write().await;
        let Some(entry) = table.attempts.get_mut(&record.id) else {
            return;
        };
        if entry.progress.attempt != attempt || entry.progress.status != DownloadStatus::Downloading
        {
            return;
        }

        let progress = &mut entry.progress;
        progress.bytes_received = update.received;
        if total > 0 {
            let fraction = (update.received as f64 / total as f64).min(1.0);
            progress.fraction = progress.fraction.max(fraction);
        }
        progress.speed = speed;
        progress.eta = estimator.eta(total.saturating_sub(update.received));

        let now = Instant::now();
        let due = entry
            .last_event
            .is_none_or(|at| now.duration_since(at) >= self.settings.progress_interval);
        if due {
            entry.last_event = Some(now);
            let _ = self
                .events
                .send(DownloadEvent::Progress(entry.progress.clone()));
        }
    }

    async fn transition(
        &self,
        model_id: &str,
        attempt: u32,
        next: DownloadStatus,
        error: Option<String>,
    ) -> bool {
        let mut table = self.table.write().await;
        self.apply_transition(&mut table, model_id, attempt, next, error)
    }

    /// Move an attempt to `next` if it is still current and the move is legal
    ///
    /// Returns whether the transition was accepted.
    fn apply_transition(
        &self,
        table: &mut DownloadTable,
        model_id: &str,
        attempt: u32,
        next: DownloadStatus,
        error: Option<String>,
    ) -> bool {
        let Some(entry) = table.attempts.get_mut(model_id) else {
            return false;
        };
        if entry.progress.attempt != attempt || !entry.progress.status.can_transition_to(next) {
            tracing::debug!(
                model_id = %model_id,
                attempt = attempt,
                current = %entry.progress.status,
                requested = %next,
                "Ignoring stale download transition"
            );
            return false;
        }

        let progress = &mut entry.progress;
        progress.status = next;
        if next.is_terminal() {
            progress.ended_at = Some(Utc::now());
            progress.speed = 0.0;
            progress.eta = None;
            progress.error = error;
            if next == DownloadStatus::Completed {
                progress.fraction = 1.0;
                progress.bytes_received = progress.bytes_received.max(progress.total_size);
            }
        }

        let snapshot = progress.clone();
        if next.is_terminal() {
            let record = DownloadRecord::from_progress(&snapshot);
            match next {
                DownloadStatus::Completed => {
                    crate::metrics::record_download_completed(model_id, record.size, record.duration)
                }
                DownloadStatus::Failed => crate::metrics::record_download_failed(model_id),
                _ => crate::metrics::record_download_cancelled(model_id),
            }
            table.history.push(record);
            crate::metrics::update_active_downloads(table.active_count());
        }

        let _ = self.events.send(DownloadEvent::for_status(snapshot));
        true
    }

    fn partial_path(&self, model_id: &str) -> PathBuf {
        self.repository
            .downloads_dir()
            .join(format!("{}.part", model_id_to_dir_name(model_id)))
    }

    async fn prepare_partial(&self, partial: &Path) -> DepotResult<()> {
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Transfers always restart from zero
        remove_partial(partial).await;
        Ok(())
    }
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => tracing::debug!(path = ?partial, "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?partial, error = %e, "Failed to remove partial download"),
    }
}

fn no_active_download(model_id: &str) -> DepotError {
    DepotError::network(format!("No active download for '{}'", model_id))
}

fn cancelled_error(model_id: &str) -> DepotError {
    DepotError::network(format!("Download of '{}' was cancelled", model_id))
}
