use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::cloudinary::{settings_folder, CloudinaryClient, CloudinaryCredentials};
use crate::db;
use crate::error::ImageError;
use crate::images::{self, ImageMap};
use crate::routes::{bad_request, AppError, AppState};
use crate::settings;

#[derive(Deserialize)]
pub struct ClearPayload {
    folder: Option<String>,
}

fn client_for(state: &AppState, doc: &Value) -> Result<CloudinaryClient, ImageError> {
    let credentials = CloudinaryCredentials::from_settings(doc, state.env)?;
    Ok(CloudinaryClient::new(credentials)?.with_api_base(&state.cloudinary_api_base))
}

fn failure(e: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "ok": false, "error": e.to_string() }))
}

// POST /api/cloudinary/test { imageHost, cloudinary: { cloudName, apiKey, apiSecret?, folder } }
pub async fn test_image_host(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if !payload.is_object() {
        return Err(bad_request("Settings must be a JSON object"));
    }
    let embedded = payload.get("imageHost").and_then(Value::as_str) == Some("embedded");
    let patch = if embedded {
        json!({ "imageHost": "embedded" })
    } else {
        let mut patch = json!({ "imageHost": "cloudinary" });
        if let Some(block) = payload.get("cloudinary").filter(|b| b.is_object()) {
            patch["cloudinary"] = block.clone();
        }
        patch
    };

    let mut doc = state.settings.write().await;
    let candidate = settings::merge(&doc, patch);

    if !embedded {
        let checked = match client_for(&state, &candidate) {
            Ok(client) => client.ping().await,
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            tracing::warn!("cloudinary check failed: {}", e);
            return Ok(failure(e));
        }
    }

    if let Err(e) = db::save_settings(&state.db, &candidate).await {
        tracing::error!("saving image host settings failed: {}", e);
        return Ok(failure(e));
    }
    *doc = candidate;
    drop(doc);

    let host = if embedded { "embedded" } else { "cloudinary" };
    db::log_event(&state.db, "Cloudinary", "Image Host Saved", &format!("Image host set to {host}")).await;
    Ok(Json(json!({ "ok": true })))
}

// POST /api/cloudinary/clear { folder }
pub async fn clear_folder(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ClearPayload>,
) -> Json<Value> {
    let doc = state.settings.read().await.clone();
    let folder = payload
        .folder
        .as_deref()
        .map(|f| f.trim().trim_matches('/'))
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| settings_folder(&doc));

    let client = match client_for(&state, &doc) {
        Ok(client) => client,
        Err(e) => return failure(e),
    };
    let deleted = match client.delete_folder(&folder).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("clearing cloudinary folder {} failed: {}", folder, e);
            return failure(e);
        }
    };

    let pruned = {
        let mut map = state.image_map.write().await;
        let before = map.len();
        map.retain(|_, url| !hosted_under(url, &folder));
        let pruned = before - map.len();
        if pruned > 0 {
            if let Err(e) = images::save_map(&state.image_map_path, &map).await {
                tracing::warn!("could not rewrite image map: {}", e);
            }
        }
        pruned
    };

    db::log_event(
        &state.db,
        "Cloudinary",
        "Folder Cleared",
        &format!("Deleted {deleted} images under {folder}"),
    )
    .await;
    Json(json!({ "ok": true, "folder": folder, "deleted": deleted, "pruned": pruned }))
}

/// True when `url` points at an asset inside `folder`.
fn hosted_under(url: &str, folder: &str) -> bool {
    url.contains(&format!("/{folder}/"))
}

pub async fn get_image_map(State(state): State<Arc<AppState>>) -> Json<ImageMap> {
    Json(state.image_map.read().await.clone())
}

// POST /api/_reload_cloudinary_map
pub async fn reload_image_map(State(state): State<Arc<AppState>>) -> Json<Value> {
    let fresh = images::load_map(&state.image_map_path).await;
    let count = fresh.len();
    *state.image_map.write().await = fresh;
    tracing::info!("reloaded image map ({} entries)", count);
    Json(json!({ "ok": true, "count": count }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_under_matches_whole_folder_segments() {
        let url = "https://res.cloudinary.com/demo/image/upload/v1/newzlettr/platforms/android.png";
        assert!(hosted_under(url, "newzlettr"));
        assert!(hosted_under(url, "newzlettr/platforms"));
        assert!(!hosted_under(url, "newz"));
    }
}
