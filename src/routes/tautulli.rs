use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::tautulli;
use crate::config::mask_key;
use crate::media::{self, RecentQuery, DEFAULT_WINDOW_DAYS};
use crate::routes::{bad_request, internal_err, AppError, AppState};
use crate::settings::is_placeholder;
use crate::stats::Totals;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(command))
        .route("/passthrough", get(passthrough))
        .route("/_debug", get(debug_config))
        .route("/home", get(home))
        .route("/summary", get(summary))
        .route("/users", get(users))
        .route("/recent", get(recent))
        .route("/test", post(test_connection))
}

#[derive(Deserialize)]
struct DaysQuery {
    days: Option<String>,
}

impl DaysQuery {
    /// Trailing window for the stats endpoints; never negative.
    fn window(&self) -> i64 {
        media::parse_int_or(self.days.as_deref(), DEFAULT_WINDOW_DAYS).max(0)
    }
}

#[derive(Deserialize)]
struct RecentParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    days: Option<String>,
    limit: Option<String>,
}

#[derive(Deserialize)]
struct TestPayload {
    #[serde(rename = "tautulliUrl")]
    url: Option<String>,
    #[serde(rename = "tautulliApiKey")]
    api_key: Option<String>,
}

/// Splits `cmd` from the rest of the query string.
fn split_command(params: Vec<(String, String)>) -> Option<(String, Vec<(String, String)>)> {
    let cmd = params
        .iter()
        .find(|(k, v)| k == "cmd" && !v.is_empty())
        .map(|(_, v)| v.clone())?;
    let rest = params.into_iter().filter(|(k, _)| k != "cmd").collect();
    Some((cmd, rest))
}

async fn forward(state: &AppState, params: Vec<(String, String)>) -> Result<Value, AppError> {
    let (cmd, rest) = split_command(params).ok_or_else(|| bad_request("Missing ?cmd="))?;
    let cfg = state.remote_config().await;
    let borrowed: Vec<(&str, &str)> = rest.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    tautulli::call(&state.transport, &cfg, &cmd, &borrowed)
        .await
        .map_err(internal_err)
}

// GET /api/tautulli?cmd=<command>&...
async fn command(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, AppError> {
    let data = forward(&state, params).await?;
    Ok(Json(json!({ "data": data })))
}

// GET /api/tautulli/passthrough?cmd=<command>&... (raw payload, no wrapping)
async fn passthrough(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, AppError> {
    forward(&state, params).await.map(Json)
}

async fn debug_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cfg = state.remote_config().await;
    let url = (!cfg.base_url.is_empty()).then_some(cfg.base_url.as_str());
    Json(json!({
        "tautulli": {
            "url": url,
            "sniHost": cfg.sni_host,
            "hostHeader": cfg.host_header,
            "apiKey": mask_key(&cfg.api_key),
        }
    }))
}

async fn home(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Value>, AppError> {
    let cfg = state.remote_config().await;
    let home = tautulli::get_home_stats(&state.transport, &cfg, q.window())
        .await
        .map_err(|e| {
            tracing::error!("GET /tautulli/home failed: {}", e);
            internal_err(e)
        })?;
    Ok(Json(json!({ "home": home })))
}

async fn summary(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Value>, AppError> {
    let cfg = state.remote_config().await;
    let days = q.window();
    let transport = &state.transport;

    let (home, plays, durations) = tokio::try_join!(
        tautulli::get_home_stats(transport, &cfg, days),
        tautulli::get_plays_by_date(transport, &cfg, days, "plays"),
        tautulli::get_plays_by_date(transport, &cfg, days, "duration"),
    )
    .map_err(|e| {
        tracing::error!("GET /tautulli/summary failed: {}", e);
        internal_err("fetch failed")
    })?;

    let totals = Totals::from_series(&plays, &durations);
    Ok(Json(json!({ "home": home, "totals": totals })))
}

async fn users(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let cfg = state.remote_config().await;
    let data = tautulli::get_users(&state.transport, &cfg).await.map_err(|e| {
        tracing::error!("GET /tautulli/users failed: {}", e);
        internal_err("fetch failed")
    })?;
    Ok(Json(json!({ "users": media::recipients(&data) })))
}

// GET /api/tautulli/recent?type=movie|episode&days=7&limit=12
async fn recent(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentParams>,
) -> Json<Value> {
    let query = RecentQuery::from_raw(
        params.kind.as_deref(),
        params.days.as_deref(),
        params.limit.as_deref(),
    );
    let cfg = state.remote_config().await;

    match tautulli::get_recently_added(&state.transport, &cfg, query.window_days, query.limit).await {
        Ok(data) => {
            let now = chrono::Utc::now().timestamp();
            let rows = media::recent_media(media::recently_added_rows(&data), &query, now);
            Json(json!({ "ok": true, "rows": rows }))
        }
        Err(e) => {
            tracing::warn!("GET /tautulli/recent failed: {}", e);
            Json(json!({ "ok": false, "error": e.to_string() }))
        }
    }
}

// POST /api/tautulli/test { tautulliUrl, tautulliApiKey }
async fn test_connection(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TestPayload>,
) -> Json<Value> {
    let mut cfg = state.remote_config().await;
    if let Some(url) = payload.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        cfg.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(key) = payload.api_key.as_deref().map(str::trim).filter(|k| !is_placeholder(k)) {
        cfg.api_key = key.to_string();
    }

    match tautulli::get_tautulli_info(&state.transport, &cfg).await {
        Ok(info) => Json(json!({ "ok": true, "data": info })),
        Err(e) => Json(json!({ "ok": false, "error": e.to_string() })),
    }
}
