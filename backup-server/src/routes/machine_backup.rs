use crate::error::{status_for_kind, AppError};
use crate::state::AppState;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use backup_engine::snapshot::CreateBackupRequest;
use backup_engine::transfer::ExportFormat;
use backup_engine::{BackupOrigin, BackupResult, SnapshotFilter};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create_backup))
        .route("/list", get(list_backups))
        .route("/daily", post(create_daily_backup))
        .route("/import", post(import_backup))
        .route("/restore/{id}", post(restore_backup))
        .route("/{id}", delete(delete_backup))
        .route("/{id}/data", get(get_backup_data))
        .route("/{id}/verify", get(verify_backup))
        .route("/{id}/export", get(export_backup))
        .route("/{id}/stats", get(get_backup_stats))
}

/// Response envelope shared by every JSON endpoint.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
}

fn ok<T: Serialize>(data: T, message: impl Into<String>) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        message: message.into(),
    })
}

fn backup_result_response(result: BackupResult) -> (StatusCode, Json<ApiResponse<BackupResult>>) {
    let status = if result.success {
        StatusCode::OK
    } else {
        status_for_kind(result.error_kind.as_deref())
    };
    let message = result.message.clone();
    (
        status,
        Json(ApiResponse {
            success: result.success,
            data: Some(result),
            message,
        }),
    )
}

/// Request bodies on these endpoints are optional: an empty body means
/// "all defaults".
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))
}

// ── Create ──

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBackupBody {
    pub description: Option<String>,
    pub include_all_machines: Option<bool>,
    pub machines: Option<Vec<i32>>,
    pub require_non_empty: Option<bool>,
}

impl CreateBackupBody {
    fn into_request(self) -> Result<CreateBackupRequest, AppError> {
        let filter = match (self.include_all_machines.unwrap_or(true), self.machines) {
            (true, _) => SnapshotFilter::All,
            (false, Some(machines)) if !machines.is_empty() => SnapshotFilter::Machines(machines),
            (false, _) => {
                return Err(AppError::BadRequest(
                    "machines is required when includeAllMachines is false".into(),
                ))
            }
        };
        Ok(CreateBackupRequest {
            description: self.description,
            filter,
            origin: BackupOrigin::Manual,
            require_non_empty: self.require_non_empty,
        })
    }
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request = optional_json::<CreateBackupBody>(&body)?.into_request()?;
    let result = state.backups.create_backup(request).await;
    if let Some(id) = &result.backup_id {
        state.ui.broadcast("backup:created", serde_json::json!({ "backupId": id, "origin": "MANUAL" }));
    }
    Ok(backup_result_response(result))
}

async fn create_daily_backup(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.backups.create_daily_backup().await;
    if let Some(id) = &result.backup_id {
        state.ui.broadcast("backup:created", serde_json::json!({ "backupId": id, "origin": "DAILY" }));
    }
    backup_result_response(result)
}

// ── List / Delete ──

async fn list_backups(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let backups = state.backups.list_backups().await?;
    let message = format!("{} backups found", backups.len());
    Ok(ok(backups, message))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.backups.delete_backup(&id).await?;
    state.ui.broadcast("backup:deleted", serde_json::json!({ "backupId": id }));
    Ok(Json(ApiResponse::<()> {
        success: true,
        data: None,
        message: format!("Backup {id} deleted"),
    }))
}

// ── Restore ──

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreBody {
    pub create_backup_before_restore: Option<bool>,
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let body = optional_json::<RestoreBody>(&body)?;
    let safety_first = body.create_backup_before_restore.unwrap_or(true);
    let cancel = state.shutdown.child_token();

    let report = state.backups.restore_backup(&id, safety_first, &cancel).await?;
    state.ui.broadcast(
        "backup:restored",
        serde_json::json!({
            "backupId": report.backup_id,
            "recordsRestored": report.records_restored,
            "safetyBackupId": report.safety_backup_id,
        }),
    );
    let message = format!("Restored {} records from {}", report.records_restored, id);
    Ok(ok(report, message))
}

// ── Verify / Data / Stats ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyData {
    backup_id: String,
    is_valid: bool,
}

async fn verify_backup(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let is_valid = state.backups.verify_backup(&id).await;
    let message = if is_valid {
        "Backup is valid"
    } else {
        "Backup failed verification"
    };
    ok(VerifyData { backup_id: id, is_valid }, message)
}

async fn get_backup_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let records = state.backups.get_backup_data(&id).await?;
    let message = format!("{} records", records.len());
    Ok(ok(records, message))
}

async fn get_backup_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.backups.get_backup_stats(&id).await?;
    Ok(ok(stats, "Backup statistics"))
}

// ── Export / Import ──

#[derive(Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

async fn export_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("zip").parse()?;
    let cancel = state.shutdown.child_token();
    let file = state.backups.export_backup(&id, format, &cancel).await?;

    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes,
    )
        .into_response())
}

async fn import_backup(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.json").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = upload.ok_or_else(|| AppError::BadRequest("file field is required".into()))?;
    let cancel = state.shutdown.child_token();
    let result = state.backups.import_backup(bytes.to_vec(), &file_name, &cancel).await;

    if let Some(id) = &result.backup_id {
        state.ui.broadcast("backup:imported", serde_json::json!({ "backupId": id, "fileName": file_name }));
    }
    Ok(backup_result_response(result))
}
