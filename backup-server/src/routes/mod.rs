pub mod machine_backup;

use crate::error::AppError;
use crate::models::machine_program;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .nest("/machine-backup", machine_backup::router())
        .route("/health", get(health))
        .route("/ws", get(crate::ws::ui::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let db = state.db.clone();
    let programs = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        machine_program::count(&conn)
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))??;

    let phase = *state.backups.restore_phase().borrow();
    Ok(Json(json!({
        "status": "ok",
        "programs": programs,
        "restorePhase": phase,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::program_table::tests::seeded_pool;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_live_row_count() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::from_env();
        config.db_path = dir.path().join("test.db");
        config.backups_dir = dir.path().join("backups");
        let state = AppState::new(seeded_pool(&dir), config, CancellationToken::new())
            .await
            .unwrap();
        let app = create_router(Arc::new(state));

        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["programs"], 3);
        assert_eq!(body["restorePhase"], "IDLE");
    }
}
