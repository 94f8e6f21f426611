use std::path::Path;

use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::env;

/// Key under which the connection-settings document is stored.
const SETTINGS_KEY: &str = "config";

pub async fn init_db() -> Result<SqlitePool, sqlx::Error> {
    let database_path = env::var("DATABASE_PATH")
        .unwrap_or_else(|_| "data/newzlettr.db".to_string());

    if let Some(parent) = Path::new(&database_path).parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }

    let opts = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&database_path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
            service TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT NOT NULL
        );"
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS dashboard_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );"
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR REPLACE INTO dashboard_settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Option<String> {
    sqlx::query_scalar::<_, String>("SELECT value FROM dashboard_settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .unwrap_or(None)
}

/// The stored settings document; an empty object when nothing (or garbage)
/// is stored.
pub async fn load_settings(pool: &SqlitePool) -> Value {
    get_setting(pool, SETTINGS_KEY)
        .await
        .and_then(|raw| match serde_json::from_str::<Value>(&raw) {
            Ok(doc) if doc.is_object() => Some(doc),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("stored settings are not valid JSON, ignoring: {}", e);
                None
            }
        })
        .unwrap_or_else(|| Value::Object(Default::default()))
}

pub async fn save_settings(pool: &SqlitePool, doc: &Value) -> Result<(), sqlx::Error> {
    set_setting(pool, SETTINGS_KEY, &doc.to_string()).await
}

/// Import a legacy `config.json` into the store, then move it aside to
/// `<name>.bak`. Returns whether an import happened.
pub async fn import_legacy_config(pool: &SqlitePool, path: &Path) -> bool {
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        if metadata.is_dir() {
            tracing::warn!("{} is a directory, skipping migration", path.display());
            return false;
        }
    }

    let Ok(data) = tokio::fs::read_to_string(path).await else {
        return false;
    };
    let doc = match serde_json::from_str::<Value>(&data) {
        Ok(doc) if doc.is_object() => doc,
        _ => {
            tracing::warn!("{} is not a JSON object, skipping migration", path.display());
            return false;
        }
    };

    tracing::info!("Migrating {} to database...", path.display());
    if let Err(e) = save_settings(pool, &doc).await {
        tracing::error!("settings migration failed: {}", e);
        return false;
    }
    log_event(pool, "System", "Migration", &format!("Imported {} into the settings store", path.display())).await;

    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    if let Err(e) = tokio::fs::rename(path, &backup).await {
        tracing::warn!("could not rename {}: {}", path.display(), e);
    }
    true
}

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub timestamp: String,
    pub service: String,
    pub action: String,
    pub details: String,
}

pub async fn log_event(pool: &SqlitePool, service: &str, action: &str, details: &str) {
    let _ = sqlx::query("INSERT INTO audit_logs (service, action, details) VALUES (?, ?, ?)")
        .bind(service)
        .bind(action)
        .bind(details)
        .execute(pool)
        .await;
}

pub async fn recent_audit_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditLog>, sqlx::Error> {
    sqlx::query_as::<_, AuditLog>(
        "SELECT id, timestamp, service, action, details FROM audit_logs ORDER BY timestamp DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let pool = memory_pool().await;
        assert_eq!(load_settings(&pool).await, json!({}));

        let doc = json!({ "tautulli": { "url": "http://t:8181", "apiKey": "k" } });
        save_settings(&pool, &doc).await.unwrap();
        assert_eq!(load_settings(&pool).await, doc);
    }

    #[tokio::test]
    async fn legacy_config_is_imported_and_moved_aside() {
        let pool = memory_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"tautulliUrl":"http://legacy:8181","tautulliApiKey":"abc"}"#).unwrap();

        assert!(import_legacy_config(&pool, &path).await);
        assert_eq!(load_settings(&pool).await["tautulliUrl"], "http://legacy:8181");
        assert!(!path.exists());
        assert!(dir.path().join("config.json.bak").exists());

        let logs = recent_audit_logs(&pool, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "Migration");
    }

    #[tokio::test]
    async fn missing_or_invalid_legacy_config_is_ignored() {
        let pool = memory_pool().await;
        let dir = tempfile::tempdir().unwrap();
        assert!(!import_legacy_config(&pool, &dir.path().join("absent.json")).await);

        let bad = dir.path().join("config.json");
        std::fs::write(&bad, "[1, 2]").unwrap();
        assert!(!import_legacy_config(&pool, &bad).await);
        assert!(bad.exists());
    }
}
