use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;

use crate::api::Transport;
use crate::config::RemoteConfig;
use crate::error::TautulliError;

const API_PATH: &str = "/api/v2";
const BODY_SNIPPET_CHARS: usize = 200;
const RESERVED_PARAMS: [&str; 2] = ["apikey", "cmd"];

// ── Core call ──────────────────────────────────────────────────

/// Run one Tautulli command and return the envelope's `data` payload.
pub async fn call(
    transport: &Transport,
    cfg: &RemoteConfig,
    cmd: &str,
    params: &[(&str, &str)],
) -> Result<Value, TautulliError> {
    if cfg.base_url.is_empty() || cfg.api_key.is_empty() {
        return Err(TautulliError::Configuration);
    }
    let url = command_url(cfg, cmd, params)?;

    let result = execute(transport, cfg, &url).await;
    if let Err(e) = &result {
        tracing::error!(cmd, url = %redacted(&url), error = %e, "tautulli call failed");
    }
    result
}

/// `<base>/api/v2?apikey=..&cmd=..&<params>`. Caller params may not shadow
/// the reserved pair.
pub fn command_url(
    cfg: &RemoteConfig,
    cmd: &str,
    params: &[(&str, &str)],
) -> Result<Url, TautulliError> {
    let mut query = format!(
        "apikey={}&cmd={}",
        urlencoding::encode(&cfg.api_key),
        urlencoding::encode(cmd)
    );
    for (key, value) in params {
        if RESERVED_PARAMS.contains(key) {
            continue;
        }
        query.push_str(&format!(
            "&{}={}",
            urlencoding::encode(key),
            urlencoding::encode(value)
        ));
    }
    let raw = format!("{}{}?{}", cfg.base_url, API_PATH, query);
    Url::parse(&raw).map_err(|e| TautulliError::InvalidUrl(format!("{}: {}", cfg.base_url, e)))
}

/// The request URL with the API key blanked, for logs.
pub fn redacted(url: &Url) -> Url {
    let mut out = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apikey" { "REDACTED".into() } else { v };
            (k.into_owned(), v.into_owned())
        })
        .collect();
    out.query_pairs_mut().clear().extend_pairs(pairs);
    out
}

async fn execute(
    transport: &Transport,
    cfg: &RemoteConfig,
    url: &Url,
) -> Result<Value, TautulliError> {
    let route = Route::prepare(transport, cfg, url).await?;

    let first = route.get(&route.transport.manual, url).send().await?;
    let response = if is_redirect(first.status()) {
        let target = redirect_target(url, &first)?;
        tracing::debug!(status = %first.status(), "following tautulli redirect");
        route.get(&route.transport.follow, &target).send().await?
    } else {
        first
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TautulliError::Http {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body: body.chars().take(BODY_SNIPPET_CHARS).collect(),
        });
    }

    let bytes = response.bytes().await?;
    let json: Value = serde_json::from_slice(&bytes)?;
    unwrap_envelope(json)
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolve `Location` against the request URL; absolute values win.
fn redirect_target(request_url: &Url, response: &Response) -> Result<Url, TautulliError> {
    let status = response.status().as_u16();
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(TautulliError::Redirect { status })?;
    request_url
        .join(location)
        .map_err(|_| TautulliError::Redirect { status })
}

/// `{ response: { result, message, data } }` -> `data`.
fn unwrap_envelope(mut json: Value) -> Result<Value, TautulliError> {
    let response = json.get_mut("response");
    let Some(response) = response else {
        return Err(TautulliError::RemoteApi("Tautulli API error".to_string()));
    };
    if response.get("result").and_then(Value::as_str) != Some("success") {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("Tautulli API error");
        return Err(TautulliError::RemoteApi(message.to_string()));
    }
    Ok(response.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

// ── Routing overrides ──────────────────────────────────────────

/// How requests for one call reach the server: optional `Host` header and
/// optional TLS server name different from the configured host.
struct Route {
    transport: Transport,
    host_header: Option<String>,
    sni: Option<SniOverride>,
}

struct SniOverride {
    original_host: String,
    server_name: String,
}

impl Route {
    async fn prepare(
        transport: &Transport,
        cfg: &RemoteConfig,
        url: &Url,
    ) -> Result<Self, TautulliError> {
        let Some(server_name) = cfg.sni_host.clone() else {
            return Ok(Self {
                transport: transport.clone(),
                host_header: cfg.host_header.clone(),
                sni: None,
            });
        };

        let original_host = url
            .host_str()
            .ok_or_else(|| TautulliError::InvalidUrl(cfg.base_url.clone()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        let dns_host = original_host.trim_start_matches('[').trim_end_matches(']');
        let addr = tokio::net::lookup_host((dns_host, port))
            .await
            .map_err(|e| TautulliError::Resolve {
                host: original_host.clone(),
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TautulliError::Resolve {
                host: original_host.clone(),
                message: "no addresses".to_string(),
            })?;

        // Keep the original authority in Host unless told otherwise.
        let authority = match url.port() {
            Some(p) => format!("{original_host}:{p}"),
            None => original_host.clone(),
        };

        Ok(Self {
            transport: transport.pinned(&server_name, addr)?,
            host_header: cfg.host_header.clone().or(Some(authority)),
            sni: Some(SniOverride {
                original_host,
                server_name,
            }),
        })
    }

    fn get(&self, client: &Client, url: &Url) -> RequestBuilder {
        let mut target = url.clone();
        if let Some(sni) = &self.sni {
            if target.host_str() == Some(sni.original_host.as_str()) {
                if let Err(e) = target.set_host(Some(&sni.server_name)) {
                    tracing::warn!(server_name = %sni.server_name, error = %e, "ignoring SNI override");
                }
            }
        }
        let mut builder = client.get(target);
        if let Some(host) = &self.host_header {
            builder = builder.header(header::HOST, host);
        }
        builder
    }
}

// ── Commands ───────────────────────────────────────────────────

pub async fn get_home_stats(
    transport: &Transport,
    cfg: &RemoteConfig,
    days: i64,
) -> Result<Value, TautulliError> {
    let days = days.to_string();
    call(
        transport,
        cfg,
        "get_home_stats",
        &[
            ("time_range", &days),
            ("stats_type", "0"),
            ("stats_count", "25"),
            ("grouping", "0"),
        ],
    )
    .await
}

/// `y_axis` is `plays` or `duration`.
pub async fn get_plays_by_date(
    transport: &Transport,
    cfg: &RemoteConfig,
    days: i64,
    y_axis: &str,
) -> Result<Value, TautulliError> {
    let days = days.to_string();
    call(
        transport,
        cfg,
        "get_plays_by_date",
        &[("time_range", &days), ("y_axis", y_axis)],
    )
    .await
}

pub async fn get_users(transport: &Transport, cfg: &RemoteConfig) -> Result<Value, TautulliError> {
    call(transport, cfg, "get_users", &[]).await
}

pub async fn get_recently_added(
    transport: &Transport,
    cfg: &RemoteConfig,
    days: i64,
    count: i64,
) -> Result<Value, TautulliError> {
    let days = days.to_string();
    let count = count.to_string();
    call(
        transport,
        cfg,
        "get_recently_added",
        &[("time_range", &days), ("count", &count)],
    )
    .await
}

pub async fn get_tautulli_info(
    transport: &Transport,
    cfg: &RemoteConfig,
) -> Result<Value, TautulliError> {
    call(transport, cfg, "get_tautulli_info", &[]).await
}
