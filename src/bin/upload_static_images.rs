//! Push the bundled static images to Cloudinary and record their hosted URLs.

use std::path::PathBuf;
use std::process::ExitCode;

use newzlettr::api::cloudinary::{CloudinaryClient, CloudinaryCredentials};
use newzlettr::config::process_env;
use newzlettr::error::ImageError;
use newzlettr::images::{self, DEFAULT_MAP_PATH, DEFAULT_ROOT_FOLDER};

fn env_or(key: &str, default: &str) -> String {
    process_env(key).unwrap_or_else(|| default.to_string())
}

async fn run() -> Result<(), ImageError> {
    let credentials = CloudinaryCredentials::from_env(process_env)?;
    let uploader = CloudinaryClient::new(credentials)?;

    let public_dir = PathBuf::from(env_or("PUBLIC_DIR", "public"));
    let map_path = PathBuf::from(env_or("IMAGE_MAP_PATH", DEFAULT_MAP_PATH));
    let root_folder = env_or("CLOUDINARY_ROOT_FOLDER", DEFAULT_ROOT_FOLDER);

    let mut map = images::load_map(&map_path).await;
    let report = images::sync_static_images(&public_dir, &mut map, &root_folder, &uploader).await?;
    images::save_map(&map_path, &map).await?;

    tracing::info!("Done. {} new images uploaded.", report.uploaded.len());
    if !report.failed.is_empty() {
        tracing::warn!("{} uploads failed", report.failed.len());
    }
    tracing::info!("Map saved to {}", map_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
