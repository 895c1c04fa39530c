//! API request and response models

use crate::download::DownloadProgress;
use crate::error::{DepotError, DepotResult};
use crate::models::{Category, CompatibilityTier, ModelRecord, SearchFilters, SortDirection, SortKey};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Query string accepted by `GET /models`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Free-text query over name, author and tags
    pub q: Option<String>,
    pub min_parameters: Option<f64>,
    pub max_parameters: Option<f64>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub author: Option<String>,
    /// Comma-separated list of required tags
    pub tags: Option<String>,
    pub compatible_only: bool,
    pub category: Category,
    pub sort_by: SortKey,
    pub sort_direction: SortDirection,
    /// Refresh the remote listing before searching
    pub refresh: bool,
}

impl SearchQuery {
    pub fn query(&self) -> &str {
        self.q.as_deref().unwrap_or_default()
    }

    pub fn into_filters(self) -> SearchFilters {
        let tags = self
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        SearchFilters {
            query: None,
            min_parameters: self.min_parameters,
            max_parameters: self.max_parameters,
            min_size: self.min_size,
            max_size: self.max_size,
            author: self.author,
            tags,
            compatible_only: self.compatible_only,
            category: self.category,
            sort_by: self.sort_by,
            sort_direction: self.sort_direction,
        }
    }
}

/// A model with its resolved compatibility and download state
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    #[serde(flatten)]
    pub model: ModelRecord,
    pub resolved_compatibility: CompatibilityTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadProgress>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RescanResponse {
    pub models: usize,
}

/// Decode a model id taken from the path
///
/// Ids contain `/`, so clients send them percent-encoded (`org%2Fname`);
/// axum has already decoded them by the time they get here.
pub fn model_id_from_path(raw: String) -> DepotResult<String> {
    let id = raw.trim().to_string();
    if id.is_empty() {
        return Err(DepotError::validation("Model id cannot be empty"));
    }
    Ok(id)
}
