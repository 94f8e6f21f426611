pub mod cloudinary;
pub mod settings;
pub mod tautulli;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::api::cloudinary::DEFAULT_API_BASE;
use crate::api::Transport;
use crate::config::{self, EnvLookup, RemoteConfig};
use crate::images::{ImageMap, DEFAULT_MAP_PATH};

pub struct AppState {
    /// Connection-settings document, mirrored in the database.
    pub settings: RwLock<Value>,
    pub transport: Transport,
    pub db: SqlitePool,
    pub env: EnvLookup,
    pub log_path: PathBuf,
    /// Hosted URLs of the static images, keyed by path under `public/`.
    pub image_map: RwLock<ImageMap>,
    pub image_map_path: PathBuf,
    pub cloudinary_api_base: String,
}

impl AppState {
    pub fn new(settings: Value, transport: Transport, db: SqlitePool, env: EnvLookup, log_path: PathBuf) -> Self {
        Self {
            settings: RwLock::new(settings),
            transport,
            db,
            env,
            log_path,
            image_map: RwLock::new(ImageMap::new()),
            image_map_path: PathBuf::from(DEFAULT_MAP_PATH),
            cloudinary_api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_image_map(mut self, path: PathBuf, map: ImageMap) -> Self {
        self.image_map = RwLock::new(map);
        self.image_map_path = path;
        self
    }

    pub fn with_cloudinary_api_base(mut self, api_base: &str) -> Self {
        self.cloudinary_api_base = api_base.to_string();
        self
    }

    /// Fresh connection parameters from the current settings and environment.
    pub async fn remote_config(&self) -> RemoteConfig {
        let doc = self.settings.read().await;
        config::resolve(self.env, &doc)
    }
}

/// Error reply rendered as `{ "error": message }`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn internal_err(e: impl std::fmt::Display) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, message)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/tautulli", tautulli::router())
        .route("/api/config", get(settings::get_config).post(settings::update_config))
        .route("/api/logs/audit", get(settings::get_audit_logs))
        .route("/api/logs/system", get(settings::get_system_logs))
        .route("/api/cloudinary/test", post(cloudinary::test_image_host))
        .route("/api/cloudinary/clear", post(cloudinary::clear_folder))
        .route("/api/cloudinary/map", get(cloudinary::get_image_map))
        .route("/api/_reload_cloudinary_map", post(cloudinary::reload_image_map))
        .with_state(state)
}
