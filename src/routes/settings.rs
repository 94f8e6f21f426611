use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::Value;

use crate::db;
use crate::routes::{bad_request, internal_err, AppError, AppState};
use crate::settings;

const AUDIT_PAGE: i64 = 100;

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let doc = state.settings.read().await;
    Json(settings::masked(&doc))
}

pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if !payload.is_object() {
        return Err(bad_request("Settings must be a JSON object"));
    }

    let merged = {
        let mut doc = state.settings.write().await;
        let merged = settings::merge(&doc, payload);
        db::save_settings(&state.db, &merged).await.map_err(internal_err)?;
        *doc = merged.clone();
        merged
    };
    db::log_event(&state.db, "System", "Config Updated", "Connection settings updated via Dashboard").await;
    tracing::info!("connection settings updated");

    Ok(Json(settings::masked(&merged)))
}

pub async fn get_audit_logs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<db::AuditLog>>, AppError> {
    db::recent_audit_logs(&state.db, AUDIT_PAGE)
        .await
        .map(Json)
        .map_err(internal_err)
}

pub async fn get_system_logs(State(state): State<Arc<AppState>>) -> Result<String, AppError> {
    tokio::fs::read_to_string(&state.log_path)
        .await
        .map_err(|e| AppError::new(StatusCode::NOT_FOUND, format!("Log file not found: {}", e)))
}
