use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use backup_engine::BackupError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    /// Operation failed for a reason the caller should see.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<BackupError> for AppError {
    fn from(e: BackupError) -> Self {
        let msg = e.to_string();
        match e {
            BackupError::NotFound(_) => AppError::NotFound(msg),
            BackupError::Validation(_) | BackupError::UnsupportedFormat(_) => AppError::BadRequest(msg),
            BackupError::CorruptBackup(_)
            | BackupError::UnsupportedVersion(_)
            | BackupError::EmptySnapshot => AppError::Unprocessable(msg),
            BackupError::Cancelled => AppError::Conflict(msg),
            BackupError::SafetyBackupFailed(_)
            | BackupError::StoreIo(_)
            | BackupError::Table(_)
            | BackupError::Serialization(_) => AppError::Failed(msg),
        }
    }
}

/// HTTP status for a failed `BackupResult`, keyed by its error kind.
pub fn status_for_kind(kind: Option<&str>) -> StatusCode {
    match kind {
        Some("NotFound") => StatusCode::NOT_FOUND,
        Some("ValidationError") | Some("UnsupportedFormat") => StatusCode::BAD_REQUEST,
        Some("CorruptBackup") | Some("UnsupportedVersion") | Some("EmptySnapshot") => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Some("Cancelled") => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::Failed(m) => {
                tracing::error!("Request failed: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "success": false, "message": msg }))).into_response()
    }
}
