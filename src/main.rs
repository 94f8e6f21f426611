use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newzlettr::api::Transport;
use newzlettr::config::process_env;
use newzlettr::db;
use newzlettr::images::{self, DEFAULT_MAP_PATH};
use newzlettr::routes::{self, AppState};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let log_path = PathBuf::from(env_or("LOG_PATH", "data/app.log"));
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::File::create(&log_path)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "newzlettr=debug,tower_http=debug,axum=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .init();

    tracing::info!("Logger initialized (console + {})", log_path.display());

    let db = db::init_db().await?;
    db::import_legacy_config(&db, &PathBuf::from(env_or("CONFIG_PATH", "config.json"))).await;
    let settings = db::load_settings(&db).await;

    let timeout = env_or("TAUTULLI_TIMEOUT_SECS", "30").parse().unwrap_or(30);
    let transport = Transport::new(Duration::from_secs(timeout))?;

    let image_map_path = PathBuf::from(env_or("IMAGE_MAP_PATH", DEFAULT_MAP_PATH));
    let image_map = images::load_map(&image_map_path).await;
    let state = Arc::new(
        AppState::new(settings, transport, db, process_env, log_path)
            .with_image_map(image_map_path, image_map),
    );
    let app = routes::router(state)
        .fallback_service(ServeDir::new(env_or("STATIC_DIR", "dist")))
        .layer(CorsLayer::permissive());

    let port: u16 = env_or("PORT", "3001").parse().unwrap_or(3001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API on http://localhost:{}", port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
