//! Model Depot - lifecycle manager for local LLM artifacts
//!
//! Keeps a catalog of downloadable models, downloads them with progress and
//! cancellation, stores them under a managed directory with sidecar metadata,
//! verifies their integrity and estimates whether the host can run them.

pub mod api;
pub mod catalog;
pub mod compatibility;
pub mod config;
pub mod download;
pub mod error;
pub mod integrity;
pub mod metrics;
pub mod models;
pub mod storage;

pub use catalog::{CatalogRepository, HttpCatalog, RemoteCatalog, StaticCatalog};
pub use compatibility::{CompatibilityChecker, CompatibilityResult, HostProfile};
pub use config::DepotConfig;
pub use download::{
    DownloadEvent, DownloadManager, DownloadProgress, DownloadStatus, DownloadTicket,
    HttpTransport, Transport,
};
pub use error::{DepotError, DepotResult, ErrorKind};
pub use integrity::{IntegrityVerifier, VerificationResult};
pub use models::{CompatibilityTier, ModelRecord, SearchFilters};
pub use storage::{LocalRepository, StorageStatistics};
