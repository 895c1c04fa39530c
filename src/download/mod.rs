//! Model downloads: transport, progress tracking and the manager driving them

pub mod manager;
pub mod progress;
pub mod transport;

pub use manager::{DownloadManager, DownloadSettings, DownloadTicket};
pub use progress::{
    DownloadEvent, DownloadProgress, DownloadRecord, DownloadStatistics, DownloadStatus,
};
pub use transport::{HttpTransport, ProgressSink, TransferProgress, Transport, TransportError};
