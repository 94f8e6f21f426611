//! One-off migration of the bundled static images to the image host.
//!
//! Idempotent: a JSON map of `relative/path.png -> hosted URL` records what
//! has been uploaded, and mapped files are skipped on the next run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::api::cloudinary::ImageUploader;
use crate::error::ImageError;

pub const ALLOWED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "gif", "svg"];
pub const DEFAULT_ROOT_FOLDER: &str = "newzlettr";
pub const DEFAULT_MAP_PATH: &str = "server/cloudinary_urls.json";

pub type ImageMap = BTreeMap<String, String>;

#[derive(Debug, Default)]
pub struct SyncReport {
    /// `(relative path, hosted url)` for each new upload.
    pub uploaded: Vec<(String, String)>,
    /// `(relative path, error)` for each upload that failed.
    pub failed: Vec<(String, String)>,
}

/// Existing map, or an empty one when the file is missing or unreadable.
pub async fn load_map(path: &Path) -> ImageMap {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("ignoring unreadable image map {}: {}", path.display(), e);
            ImageMap::new()
        }),
        Err(_) => ImageMap::new(),
    }
}

pub async fn save_map(path: &Path, map: &ImageMap) -> Result<(), ImageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(map)?).await?;
    Ok(())
}

/// Every file under `root`, depth-first, entries in name order.
pub async fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok::<_, std::io::Error>(files)
    })
    .await
    .map_err(std::io::Error::other)?
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// `/`-separated path of `file` relative to `root`.
pub fn relative_key(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Remote folder mirroring the local directory of `rel`.
pub fn target_folder(root_folder: &str, rel: &str) -> String {
    match rel.rsplit_once('/') {
        Some((dir, _)) => format!("{root_folder}/{dir}"),
        None => root_folder.to_string(),
    }
}

/// Upload every image under `public_dir` not yet in `map`, recording the new
/// URLs in `map`. Individual upload failures are logged and skipped.
pub async fn sync_static_images(
    public_dir: &Path,
    map: &mut ImageMap,
    root_folder: &str,
    uploader: &dyn ImageUploader,
) -> Result<SyncReport, ImageError> {
    let mut report = SyncReport::default();

    for file in collect_files(public_dir).await? {
        if !is_image(&file) {
            continue;
        }
        let Some(rel) = relative_key(public_dir, &file) else {
            continue;
        };
        if map.contains_key(&rel) {
            continue;
        }

        let folder = target_folder(root_folder, &rel);
        match uploader.upload(&file, &folder).await {
            Ok(image) => {
                tracing::info!("✓ Uploaded: {} -> {}", rel, image.secure_url);
                map.insert(rel.clone(), image.secure_url.clone());
                report.uploaded.push((rel, image.secure_url));
            }
            Err(e) => {
                tracing::error!("✗ Failed: {} {}", rel, e);
                report.failed.push((rel, e.to_string()));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::cloudinary::UploadedImage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records uploads and fails for file names containing "broken".
    #[derive(Default)]
    struct FakeUploader {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ImageUploader for FakeUploader {
        async fn upload(&self, file: &Path, folder: &str) -> Result<UploadedImage, ImageError> {
            let name = file.file_name().unwrap().to_string_lossy().into_owned();
            self.calls.lock().unwrap().push((name.clone(), folder.to_string()));
            if name.contains("broken") {
                return Err(ImageError::Api("boom".to_string()));
            }
            Ok(UploadedImage {
                secure_url: format!("https://cdn.test/{folder}/{name}"),
                public_id: None,
            })
        }
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"img").unwrap();
    }

    #[test]
    fn folders_mirror_local_directories() {
        assert_eq!(target_folder("newzlettr", "logo.png"), "newzlettr");
        assert_eq!(target_folder("newzlettr", "platforms/android.png"), "newzlettr/platforms");
        assert_eq!(target_folder("newzlettr", "a/b/c.gif"), "newzlettr/a/b");
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(is_image(Path::new("x/Banner.JPG")));
        assert!(is_image(Path::new("icon.svg")));
        assert!(!is_image(Path::new("robots.txt")));
        assert!(!is_image(Path::new("Makefile")));
    }

    #[tokio::test]
    async fn uploads_new_images_and_skips_mapped_ones() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        touch(&public, "logo.png");
        touch(&public, "platforms/android.png");
        touch(&public, "platforms/ios.webp");
        touch(&public, "favicon.ico");
        touch(&public, "notes.txt");

        let mut map = ImageMap::new();
        map.insert("platforms/ios.webp".to_string(), "https://cdn.test/old".to_string());

        let uploader = FakeUploader::default();
        let report = sync_static_images(&public, &mut map, DEFAULT_ROOT_FOLDER, &uploader)
            .await
            .unwrap();

        let calls = uploader.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("logo.png".to_string(), "newzlettr".to_string()),
                ("android.png".to_string(), "newzlettr/platforms".to_string()),
            ]
        );
        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(map["logo.png"], "https://cdn.test/newzlettr/logo.png");
        assert_eq!(map["platforms/ios.webp"], "https://cdn.test/old");
    }

    #[tokio::test]
    async fn failed_upload_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a-broken.png");
        touch(dir.path(), "b-fine.png");

        let mut map = ImageMap::new();
        let uploader = FakeUploader::default();
        let report = sync_static_images(dir.path(), &mut map, "root", &uploader)
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a-broken.png");
        assert_eq!(report.uploaded.len(), 1);
        assert!(map.contains_key("b-fine.png"));
        assert!(!map.contains_key("a-broken.png"));
    }

    #[tokio::test]
    async fn files_are_listed_depth_first_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.png");
        touch(dir.path(), "a/z.png");
        touch(dir.path(), "a/c/d.png");
        touch(dir.path(), "c.svg");

        let files = collect_files(dir.path()).await.unwrap();
        let keys: Vec<String> = files
            .iter()
            .map(|f| relative_key(dir.path(), f).unwrap())
            .collect();
        assert_eq!(keys, vec!["a/c/d.png", "a/z.png", "b.png", "c.svg"]);
    }

    #[tokio::test]
    async fn missing_public_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_files(&dir.path().join("absent")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn map_round_trips_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server").join("cloudinary_urls.json");
        assert!(load_map(&path).await.is_empty());

        let mut map = ImageMap::new();
        map.insert("logo.png".to_string(), "https://cdn.test/logo.png".to_string());
        save_map(&path, &map).await.unwrap();
        assert_eq!(load_map(&path).await, map);

        std::fs::write(&path, "not json").unwrap();
        assert!(load_map(&path).await.is_empty());
    }
}
