//! End-to-end lifecycle tests: catalog → download → verify → load → delete
//!
//! A scripted transport stands in for the network so the whole stack runs
//! against a temporary storage root.

mod common;

use common::{FakeTransport, GIB, Payload, gguf_bytes, remote, url_for};
use model_depot::download::DownloadSettings;
use model_depot::models::{Category, CompatibilityTier, SearchFilters};
use model_depot::{
    CatalogRepository, CompatibilityChecker, DownloadEvent, DownloadManager, DownloadStatus,
    ErrorKind, LocalRepository, ModelRecord, StaticCatalog,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Depot {
    dir: TempDir,
    catalog: CatalogRepository,
    transport: Arc<FakeTransport>,
}

async fn depot(listing: Vec<ModelRecord>, settings: DownloadSettings) -> Depot {
    let dir = TempDir::new().unwrap();
    depot_at(dir, listing, settings).await
}

async fn depot_at(dir: TempDir, listing: Vec<ModelRecord>, settings: DownloadSettings) -> Depot {
    let local = Arc::new(LocalRepository::new(dir.path().join("models")));
    let transport = Arc::new(FakeTransport::default());
    let downloads = DownloadManager::new(local.clone(), transport.clone(), settings);
    let catalog = CatalogRepository::new(
        local,
        downloads,
        Arc::new(StaticCatalog::new(listing)),
        CompatibilityChecker::default(),
    );
    catalog.initialize().await.unwrap();

    Depot {
        dir,
        catalog,
        transport,
    }
}

fn fast_settings() -> DownloadSettings {
    DownloadSettings {
        progress_interval: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_model_lifecycle() {
    let listing = vec![
        remote("acme/small-chat", "Small Chat", 16 * 1024).with_tags(["chat", "featured"]),
        remote("acme/coder", "Coder", 8 * 1024).with_tags(["code"]),
    ];
    let depot = depot(listing, fast_settings()).await;
    depot
        .transport
        .serve(&url_for("acme/small-chat"), Payload::Bytes(gguf_bytes(16 * 1024)));
    let mut events = depot.catalog.subscribe();

    // Everything starts remote
    let remote_only = SearchFilters {
        category: Category::Remote,
        ..Default::default()
    };
    assert_eq!(depot.catalog.search_models("", &remote_only).await.unwrap().len(), 2);

    // Download
    let stored = depot
        .catalog
        .download_model("acme/small-chat")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(stored.is_local);
    let path = stored.local_path.clone().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 16 * 1024);
    assert!(path.starts_with(depot.dir.path().join("models/acme--small-chat")));

    // Events: queued first, completed last, progress in between
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(DownloadEvent::Queued(_))));
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed(_))));
    assert!(seen.iter().any(|e| matches!(e, DownloadEvent::Progress(_))));

    // The merged catalog now reports it as local
    let local_only = SearchFilters {
        category: Category::Local,
        ..Default::default()
    };
    let local = depot.catalog.search_models("chat", &local_only).await.unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, "acme/small-chat");

    // Verify, check, load
    let verification = depot.catalog.verify_model("acme/small-chat").await.unwrap();
    assert!(verification.is_valid);
    assert!(verification.size_matches);

    let compatibility = depot
        .catalog
        .check_compatibility("acme/small-chat")
        .await
        .unwrap();
    assert_eq!(compatibility.tier, CompatibilityTier::FullyCompatible);

    let loaded = depot.catalog.set_loaded_model("acme/small-chat").await.unwrap();
    assert!(loaded.is_loaded);

    // Statistics
    let storage = depot.catalog.storage_statistics().await;
    assert_eq!(storage.model_count, 1);
    assert_eq!(storage.total_bytes, 16 * 1024);

    let downloads = depot.catalog.download_statistics().await;
    assert_eq!(downloads.completed, 1);
    assert_eq!(downloads.success_rate, 1.0);

    // Delete
    depot.catalog.delete_model("acme/small-chat").await.unwrap();
    assert!(!path.exists());
    let model = depot.catalog.get_model("acme/small-chat").await.unwrap();
    assert!(!model.is_local);
    assert_eq!(depot.catalog.storage_statistics().await.model_count, 0);
}

#[tokio::test]
async fn test_five_gigabyte_download_is_moved_not_copied() {
    let size = 5 * GIB;
    let listing = vec![remote("acme/big", "Big", size)];
    let settings = DownloadSettings {
        // The test volume may be smaller than the sparse payload claims
        check_disk_space: false,
        ..fast_settings()
    };
    let depot = depot(listing, settings).await;
    depot.transport.serve(
        &url_for("acme/big"),
        Payload::Sparse {
            header: b"GGUF".to_vec(),
            len: size,
        },
    );

    let stored = depot
        .catalog
        .download_model("acme/big")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(stored.size, size);
    assert_eq!(
        std::fs::metadata(stored.local_path.as_ref().unwrap())
            .unwrap()
            .len(),
        size
    );
    assert!(depot.catalog.verify_model("acme/big").await.unwrap().is_valid);

    let progress = depot
        .catalog
        .downloads()
        .get_download_progress("acme/big")
        .await
        .unwrap();
    assert_eq!(progress.status, DownloadStatus::Completed);
    assert_eq!(progress.fraction, 1.0);

    // 10 GiB estimated memory is over the default 6 GiB budget
    let compatibility = depot.catalog.check_compatibility("acme/big").await.unwrap();
    assert_eq!(compatibility.tier, CompatibilityTier::PartiallyCompatible);
    assert!(!compatibility.warnings.is_empty());
}

#[tokio::test]
async fn test_models_survive_restart() {
    let listing = vec![remote("acme/persisted", "Persisted", 4096)];
    let depot = depot(listing.clone(), fast_settings()).await;
    depot
        .transport
        .serve(&url_for("acme/persisted"), Payload::Bytes(gguf_bytes(4096)));
    depot
        .catalog
        .download_model("acme/persisted")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let Depot { dir, .. } = depot;
    let reopened = depot_at(dir, listing, fast_settings()).await;

    let model = reopened.catalog.get_model("acme/persisted").await.unwrap();
    assert!(model.is_local);
    assert!(reopened.catalog.verify_model("acme/persisted").await.unwrap().is_valid);

    // Already local, so a second download is refused
    let err = reopened
        .catalog
        .download_model("acme/persisted")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_failed_download_can_be_retried() {
    let listing = vec![remote("acme/flaky", "Flaky", 2048)];
    let depot = depot(listing, fast_settings()).await;
    let url = url_for("acme/flaky");
    depot
        .transport
        .serve(&url, Payload::Error("connection reset by peer".to_string()));

    let err = depot
        .catalog
        .download_model("acme/flaky")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.recovery_suggestion().is_some());

    depot.transport.serve(&url, Payload::Bytes(gguf_bytes(2048)));
    let stored = depot
        .catalog
        .retry_download("acme/flaky")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(stored.is_local);

    let history = depot.catalog.downloads().get_download_history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, DownloadStatus::Failed);
    assert_eq!(history[1].status, DownloadStatus::Completed);
    assert_eq!(history[1].attempt, 2);

    let stats = depot.catalog.download_statistics().await;
    assert_eq!(stats.success_rate, 0.5);
}

#[tokio::test]
async fn test_wrong_size_payload_is_rejected() {
    let listing = vec![remote("acme/truncated", "Truncated", 8192)];
    let depot = depot(listing, fast_settings()).await;
    depot
        .transport
        .serve(&url_for("acme/truncated"), Payload::Bytes(gguf_bytes(4096)));

    let err = depot
        .catalog
        .download_model("acme/truncated")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let model = depot.catalog.get_model("acme/truncated").await.unwrap();
    assert!(!model.is_local);
    let leftovers: Vec<_> = std::fs::read_dir(depot.dir.path().join("models/.downloads"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_cleanup_keeps_valid_models() {
    let listing = vec![remote("acme/keep", "Keep", 4096)];
    let depot = depot(listing, fast_settings()).await;
    depot
        .transport
        .serve(&url_for("acme/keep"), Payload::Bytes(gguf_bytes(4096)));
    depot
        .catalog
        .download_model("acme/keep")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let root = depot.dir.path().join("models");
    std::fs::create_dir_all(root.join("stray")).unwrap();
    std::fs::write(root.join("stray/blob.gguf"), b"GGUF").unwrap();

    let removed = depot.catalog.cleanup_orphaned_files().await.unwrap();
    assert_eq!(removed, vec![root.join("stray")]);
    assert!(root.join("acme--keep").is_dir());
    assert_eq!(depot.catalog.rescan().await.unwrap(), 1);
}
