//! API request handlers

use super::models::{
    CleanupResponse, HealthResponse, ModelInfo, RescanResponse, SearchQuery, model_id_from_path,
};
use super::routes::AppState;
use crate::compatibility::CompatibilityResult;
use crate::download::{DownloadProgress, DownloadRecord, DownloadStatistics};
use crate::error::{DepotError, DepotResult};
use crate::integrity::VerificationResult;
use crate::models::ModelRecord;
use crate::storage::StorageStatistics;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// GET /health - Service health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /models - Search the merged catalog
pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> DepotResult<Json<Vec<ModelRecord>>> {
    if params.refresh {
        state.catalog.fetch_available_models().await;
    }

    let query = params.query().to_string();
    let filters = params.into_filters();
    let models = state.catalog.search_models(&query, &filters).await?;

    Ok(Json(models))
}

/// GET /models/{id} - Model details with compatibility and download state
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<Json<ModelInfo>> {
    let id = model_id_from_path(id)?;
    let model = state.catalog.get_model(&id).await?;
    let resolved_compatibility = state.catalog.checker().resolve_tier(&model);
    let download = state.catalog.downloads().get_download_progress(&id).await;

    Ok(Json(ModelInfo {
        model,
        resolved_compatibility,
        download,
    }))
}

/// DELETE /models/{id} - Remove a local model
pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<StatusCode> {
    let id = model_id_from_path(id)?;
    state.catalog.delete_model(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /models/{id}/verify - Integrity check of the stored artifact
pub async fn verify_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<Json<VerificationResult>> {
    let id = model_id_from_path(id)?;
    Ok(Json(state.catalog.verify_model(&id).await?))
}

/// GET /models/{id}/compatibility - Host compatibility estimate
pub async fn check_compatibility(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<Json<CompatibilityResult>> {
    let id = model_id_from_path(id)?;
    Ok(Json(state.catalog.check_compatibility(&id).await?))
}

/// POST /models/{id}/download - Schedule a download
///
/// Returns immediately; follow progress on `/downloads/{id}` or the event stream.
pub async fn download_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<(StatusCode, Json<DownloadProgress>)> {
    let id = model_id_from_path(id)?;
    let ticket = state.catalog.download_model(&id).await?;
    accepted(&state, ticket.model_id()).await
}

/// POST /models/{id}/load - Mark a local model as the loaded one
pub async fn load_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<Json<ModelRecord>> {
    let id = model_id_from_path(id)?;
    Ok(Json(state.catalog.set_loaded_model(&id).await?))
}

/// GET /downloads - Active downloads
pub async fn list_downloads(State(state): State<AppState>) -> Json<Vec<DownloadProgress>> {
    Json(state.catalog.downloads().get_active_downloads().await)
}

/// GET /downloads/{id} - Progress of the latest attempt
pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<Json<DownloadProgress>> {
    let id = model_id_from_path(id)?;
    state
        .catalog
        .downloads()
        .get_download_progress(&id)
        .await
        .map(Json)
        .ok_or_else(|| DepotError::not_found(format!("No download tracked for '{}'", id)))
}

/// POST /downloads/{id}/cancel
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<StatusCode> {
    let id = model_id_from_path(id)?;
    state.catalog.cancel_download(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /downloads/{id}/retry
pub async fn retry_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> DepotResult<(StatusCode, Json<DownloadProgress>)> {
    let id = model_id_from_path(id)?;
    let ticket = state.catalog.retry_download(&id).await?;
    accepted(&state, ticket.model_id()).await
}

/// GET /downloads/history
pub async fn download_history(State(state): State<AppState>) -> Json<Vec<DownloadRecord>> {
    Json(state.catalog.downloads().get_download_history().await)
}

/// DELETE /downloads/history
pub async fn clear_download_history(State(state): State<AppState>) -> StatusCode {
    state.catalog.downloads().clear_download_history().await;
    StatusCode::NO_CONTENT
}

/// GET /downloads/stats
pub async fn download_stats(State(state): State<AppState>) -> Json<DownloadStatistics> {
    Json(state.catalog.download_statistics().await)
}

/// GET /downloads/events - Server-sent download lifecycle events
pub async fn download_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.catalog.subscribe()).filter_map(|event| match event {
        Ok(event) => match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode download event");
                None
            }
        },
        Err(e) => {
            tracing::debug!(error = %e, "Event subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /storage/stats
pub async fn storage_stats(State(state): State<AppState>) -> Json<StorageStatistics> {
    Json(state.catalog.storage_statistics().await)
}

/// POST /storage/cleanup - Remove directories without valid metadata
pub async fn cleanup_storage(State(state): State<AppState>) -> DepotResult<Json<CleanupResponse>> {
    let removed = state.catalog.cleanup_orphaned_files().await?;
    Ok(Json(CleanupResponse { removed }))
}

/// POST /storage/rescan - Rebuild the local index from disk
pub async fn rescan_storage(State(state): State<AppState>) -> DepotResult<Json<RescanResponse>> {
    let models = state.catalog.rescan().await?;
    Ok(Json(RescanResponse { models }))
}

async fn accepted(
    state: &AppState,
    model_id: &str,
) -> DepotResult<(StatusCode, Json<DownloadProgress>)> {
    let progress = state
        .catalog
        .downloads()
        .get_download_progress(model_id)
        .await
        .ok_or_else(|| DepotError::not_found(format!("No download tracked for '{}'", model_id)))?;
    Ok((StatusCode::ACCEPTED, Json(progress)))
}
