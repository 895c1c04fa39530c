//! Error types shared by the repositories, the download manager and the API

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Result alias used throughout the crate
pub type DepotResult<T> = Result<T, DepotError>;

/// Errors surfaced by the model depot
///
/// The first five variants form the public taxonomy. `Io` and `Serialization`
/// are wrapped low-level failures and classify as storage problems.
#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    /// Missing local file, missing path, missing catalog entry or a non-local record
    #[error("{message}")]
    NotFound { message: String },

    /// The artifact is present but cannot be used
    #[error("model '{model_id}' is unusable: {message}")]
    LoadFailed { model_id: String, message: String },

    /// A precondition was violated before any I/O happened
    #[error("{message}")]
    Validation { message: String },

    /// Missing download URL, no transfer to act on, or a transport failure
    #[error("{message}")]
    Network { message: String },

    /// Disk problems: too-small files, copy failures, lack of space
    #[error("{message}")]
    Storage { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize model metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error category, stable across variants that wrap lower-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    LoadFailed,
    Validation,
    Network,
    Storage,
}

impl DepotError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn load_failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LoadFailed { .. } => ErrorKind::LoadFailed,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Network { .. } => ErrorKind::Network,
            Self::Storage { .. } | Self::Io(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Human-readable hint on how to recover, where one exists
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::NotFound => {
                Some("Refresh the catalog or rescan local storage, then try again.")
            }
            ErrorKind::LoadFailed => {
                Some("Delete the model and download it again.")
            }
            ErrorKind::Network => Some("Check the connection and retry the download."),
            ErrorKind::Storage => {
                Some("Free up disk space or check permissions on the storage directory.")
            }
            ErrorKind::Validation => None,
        }
    }
}

impl IntoResponse for DepotError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::LoadFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Network => StatusCode::CONFLICT,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Storage error while handling request");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            suggestion: self.recovery_suggestion(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'static str>,
    timestamp: chrono::DateTime<chrono::Utc>,
}
