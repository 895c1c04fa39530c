//! Download status, progress snapshots and history records

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Lifecycle of one download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(self, next: DownloadStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Downloading) => true,
            (Self::Pending | Self::Downloading, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Live view of one attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub model_id: String,
    pub model_name: String,
    pub total_size: u64,
    pub bytes_received: u64,
    /// Completed share in [0, 1], never decreasing within an attempt
    pub fraction: f64,
    pub status: DownloadStatus,
    /// Smoothed transfer rate in bytes per second
    pub speed: f64,
    pub eta: Option<Duration>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attempt: u32,
}

impl DownloadProgress {
    pub(crate) fn pending(model_id: &str, model_name: &str, total_size: u64, attempt: u32) -> Self {
        Self {
            model_id: model_id.to_string(),
            model_name: model_name.to_string(),
            total_size,
            bytes_received: 0,
            fraction: 0.0,
            status: DownloadStatus::Pending,
            speed: 0.0,
            eta: None,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            attempt,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time between queueing and the terminal transition (or now)
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

/// Immutable summary of an attempt that reached a terminal state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub model_id: String,
    pub model_name: String,
    pub size: u64,
    pub status: DownloadStatus,
    pub duration: Duration,
    pub attempt: u32,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadRecord {
    pub(crate) fn from_progress(progress: &DownloadProgress) -> Self {
        Self {
            model_id: progress.model_id.clone(),
            model_name: progress.model_name.clone(),
            size: progress.total_size,
            status: progress.status,
            duration: progress.elapsed(),
            attempt: progress.attempt,
            finished_at: progress.ended_at.unwrap_or_else(Utc::now),
            error: progress.error.clone(),
        }
    }
}

/// Aggregates over the download history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadStatistics {
    pub total_downloads: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_bytes_downloaded: u64,
    /// `completed / total_downloads`, 0.0 when there is no history
    pub success_rate: f64,
    pub active_downloads: usize,
    /// Mean duration of completed attempts
    pub average_duration: Duration,
}

impl DownloadStatistics {
    pub(crate) fn from_history(history: &[DownloadRecord], active_downloads: usize) -> Self {
        let count = |status: DownloadStatus| history.iter().filter(|r| r.status == status).count();
        let completed = count(DownloadStatus::Completed);

        let completed_records = || {
            history
                .iter()
                .filter(|r| r.status == DownloadStatus::Completed)
        };
        let total_bytes_downloaded = completed_records().map(|r| r.size).sum();
        let average_duration = if completed == 0 {
            Duration::ZERO
        } else {
            completed_records().map(|r| r.duration).sum::<Duration>() / completed as u32
        };

        let success_rate = if history.is_empty() {
            0.0
        } else {
            completed as f64 / history.len() as f64
        };

        Self {
            total_downloads: history.len(),
            completed,
            failed: count(DownloadStatus::Failed),
            cancelled: count(DownloadStatus::Cancelled),
            total_bytes_downloaded,
            success_rate,
            active_downloads,
            average_duration,
        }
    }
}

/// Lifecycle notification published by the download manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "progress", rename_all = "snake_case")]
pub enum DownloadEvent {
    Queued(DownloadProgress),
    Started(DownloadProgress),
    Progress(DownloadProgress),
    Completed(DownloadProgress),
    Failed(DownloadProgress),
    Cancelled(DownloadProgress),
}

impl DownloadEvent {
    /// Event announcing that `progress` entered its current status
    pub(crate) fn for_status(progress: DownloadProgress) -> Self {
        match progress.status {
            DownloadStatus::Pending => Self::Queued(progress),
            DownloadStatus::Downloading => Self::Started(progress),
            DownloadStatus::Completed => Self::Completed(progress),
            DownloadStatus::Failed => Self::Failed(progress),
            DownloadStatus::Cancelled => Self::Cancelled(progress),
        }
    }

    pub fn progress(&self) -> &DownloadProgress {
        match self {
            Self::Queued(p)
            | Self::Started(p)
            | Self::Progress(p)
            | Self::Completed(p)
            | Self::Failed(p)
            | Self::Cancelled(p) => p,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.progress().model_id
    }

    /// Short event name, used as the SSE event type
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued(_) => "queued",
            Self::Started(_) => "started",
            Self::Progress(_) => "progress",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Below this window a rate sample is too noisy to use
const MIN_SAMPLE_WINDOW: Duration = Duration::from_millis(50);

/// Exponentially smoothed transfer rate
#[derive(Debug)]
pub(crate) struct SpeedEstimator {
    smoothing: f64,
    last_bytes: u64,
    last_at: Instant,
    speed: Option<f64>,
}

impl SpeedEstimator {
    pub(crate) fn new(smoothing: f64) -> Self {
        Self::starting_at(smoothing, Instant::now())
    }

    pub(crate) fn starting_at(smoothing: f64, now: Instant) -> Self {
        Self {
            smoothing: smoothing.clamp(f64::EPSILON, 1.0),
            last_bytes: 0,
            last_at: now,
            speed: None,
        }
    }

    /// Fold in the cumulative byte count observed at `now`
    pub(crate) fn update(&mut self, bytes: u64, now: Instant) -> f64 {
        let window = now.saturating_duration_since(self.last_at);
        if window < MIN_SAMPLE_WINDOW || bytes < self.last_bytes {
            return self.speed.unwrap_or(0.0);
        }

        let sample = (bytes - self.last_bytes) as f64 / window.as_secs_f64();
        let speed = match self.speed {
            Some(previous) => self.smoothing * sample + (1.0 - self.smoothing) * previous,
            None => sample,
        };

        self.speed = Some(speed);
        self.last_bytes = bytes;
        self.last_at = now;
        speed
    }

    /// Remaining time at the current speed
    pub(crate) fn eta(&self, remaining: u64) -> Option<Duration> {
        match self.speed {
            Some(speed) if speed > 0.0 => {
                Duration::try_from_secs_f64(remaining as f64 / speed).ok()
            }
            _ => None,
        }
    }
}
