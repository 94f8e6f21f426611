use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::api::USER_AGENT;
use crate::error::ImageError;
use crate::images::DEFAULT_ROOT_FOLDER;
use crate::settings::is_placeholder;

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com";
const MAX_DELETE_ROUNDS: usize = 20;

/// Where an uploaded image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub secure_url: String,
    pub public_id: Option<String>,
}

/// Image host the static-image migration pushes files to.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    /// Upload `file` into `folder`, keeping its file name and never
    /// overwriting an existing asset.
    async fn upload(&self, file: &Path, folder: &str) -> Result<UploadedImage, ImageError>;
}

#[derive(Debug, Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl CloudinaryCredentials {
    pub const ENV_VARS: [&'static str; 3] = [
        "CLOUDINARY_CLOUD_NAME",
        "CLOUDINARY_API_KEY",
        "CLOUDINARY_API_SECRET",
    ];

    /// Read credentials, reporting every missing variable at once.
    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> Result<Self, ImageError> {
        let values: Vec<Option<String>> = Self::ENV_VARS
            .iter()
            .map(|k| env(*k).filter(|v| !v.trim().is_empty()))
            .collect();
        let missing: Vec<&'static str> = Self::ENV_VARS
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(ImageError::MissingEnv(missing));
        }
        let mut values = values.into_iter().flatten();
        Ok(Self {
            cloud_name: values.next().unwrap_or_default(),
            api_key: values.next().unwrap_or_default(),
            api_secret: values.next().unwrap_or_default(),
        })
    }
}

impl CloudinaryCredentials {
    /// Credentials from the `cloudinary` block of the settings document,
    /// falling back to the `CLOUDINARY_*` variables per field.
    pub fn from_settings(
        doc: &Value,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ImageError> {
        let block = doc.get("cloudinary");
        let field = |keys: [&str; 2], var: &str| {
            block
                .and_then(|b| {
                    keys.iter()
                        .filter_map(|k| b.get(*k).and_then(Value::as_str))
                        .map(str::trim)
                        .find(|v| !v.is_empty() && !is_placeholder(v))
                })
                .map(str::to_string)
                .or_else(|| env(var).filter(|v| !v.trim().is_empty()))
        };

        let cloud_name = field(["cloudName", "cloud_name"], "CLOUDINARY_CLOUD_NAME");
        let api_key = field(["apiKey", "api_key"], "CLOUDINARY_API_KEY");
        let api_secret = field(["apiSecret", "api_secret"], "CLOUDINARY_API_SECRET");

        let missing: Vec<&'static str> = [
            ("cloudName", cloud_name.is_none()),
            ("apiKey", api_key.is_none()),
            ("apiSecret", api_secret.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        match (cloud_name, api_key, api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(Self {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => Err(ImageError::MissingSettings(missing)),
        }
    }
}

/// Target folder from the settings document, `newzlettr` when unset.
pub fn settings_folder(doc: &Value) -> String {
    doc.get("cloudinary")
        .and_then(|b| ["folder", "path"].iter().find_map(|k| b.get(*k).and_then(Value::as_str)))
        .map(|f| f.trim().trim_matches('/'))
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_ROOT_FOLDER)
        .to_string()
}

/// Signed uploads against Cloudinary's REST API.
pub struct CloudinaryClient {
    client: Client,
    api_base: String,
    credentials: CloudinaryCredentials,
}

impl CloudinaryClient {
    pub fn new(credentials: CloudinaryCredentials) -> Result<Self, ImageError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            credentials,
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, tail: &str) -> String {
        format!(
            "{}/v1_1/{}/{}",
            self.api_base,
            urlencoding::encode(&self.credentials.cloud_name),
            tail
        )
    }

    fn upload_url(&self) -> String {
        self.endpoint("image/upload")
    }

    /// Admin API ping; succeeds only when the credentials are accepted.
    pub async fn ping(&self) -> Result<(), ImageError> {
        let resp = self
            .client
            .get(self.endpoint("ping"))
            .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
            .send()
            .await?;
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(ImageError::Api(api_message(&json, status)));
        }
        Ok(())
    }

    /// Delete every uploaded image under `folder`. Returns how many were
    /// removed.
    pub async fn delete_folder(&self, folder: &str) -> Result<usize, ImageError> {
        let prefix = format!("{}/", folder.trim_matches('/'));
        let mut deleted = 0;
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_DELETE_ROUNDS {
            let mut query = vec![("prefix", prefix.clone())];
            if let Some(c) = cursor.take() {
                query.push(("next_cursor", c));
            }
            let resp = self
                .client
                .delete(self.endpoint("resources/image/upload"))
                .basic_auth(&self.credentials.api_key, Some(&self.credentials.api_secret))
                .query(&query)
                .send()
                .await?;
            let status = resp.status();
            let json: Value = resp.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                return Err(ImageError::Api(api_message(&json, status)));
            }

            let round = json.get("deleted").and_then(Value::as_object).map_or(0, |d| d.len());
            deleted += round;
            cursor = json
                .get("next_cursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() || round == 0 {
                break;
            }
        }

        tracing::info!(folder, deleted, "cleared cloudinary folder");
        Ok(deleted)
    }
}

fn api_message(json: &Value, status: reqwest::StatusCode) -> String {
    json.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// SHA-256 request signature: sorted `k=v` pairs joined by `&`, then the
/// secret appended.
pub fn sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ImageUploader for CloudinaryClient {
    async fn upload(&self, file: &Path, folder: &str) -> Result<UploadedImage, ImageError> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let mut params: BTreeMap<&'static str, String> = BTreeMap::new();
        params.insert("folder", folder.to_string());
        params.insert("overwrite", "false".to_string());
        params.insert("timestamp", chrono::Utc::now().timestamp().to_string());
        params.insert("unique_filename", "false".to_string());
        params.insert("use_filename", "true".to_string());
        let signature = sign(&params, &self.credentials.api_secret);

        let mut form = multipart::Form::new()
            .text("api_key", self.credentials.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");
        for (key, value) in params {
            form = form.text(key, value);
        }
        form = form.part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let resp = self.client.post(self.upload_url()).multipart(form).send().await?;
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(ImageError::Api(api_message(&json, status)));
        }

        let secure_url = json
            .get("secure_url")
            .and_then(Value::as_str)
            .ok_or_else(|| ImageError::Api("response carried no secure_url".to_string()))?
            .to_string();
        Ok(UploadedImage {
            secure_url,
            public_id: json.get("public_id").and_then(Value::as_str).map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> CloudinaryCredentials {
        CloudinaryCredentials {
            cloud_name: "demo".to_string(),
            api_key: "1234".to_string(),
            api_secret: "shh".to_string(),
        }
    }

    #[test]
    fn signature_covers_sorted_params_and_secret() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1315060510".to_string());
        params.insert("folder", "newzlettr".to_string());

        let mut expected = Sha256::new();
        expected.update(b"folder=newzlettr&timestamp=1315060510shh");
        assert_eq!(sign(&params, "shh"), hex::encode(expected.finalize()));
    }

    #[test]
    fn every_missing_variable_is_reported() {
        let env = |k: &str| (k == "CLOUDINARY_CLOUD_NAME").then(|| "demo".to_string());
        match CloudinaryCredentials::from_env(env) {
            Err(ImageError::MissingEnv(missing)) => {
                assert_eq!(missing, vec!["CLOUDINARY_API_KEY", "CLOUDINARY_API_SECRET"]);
            }
            other => panic!("expected missing env, got {other:?}"),
        }
    }

    #[test]
    fn settings_credentials_fall_back_to_env_per_field() {
        let doc = json!({ "cloudinary": { "cloudName": "demo", "apiKey": " 1234 ", "apiSecret": "********" } });
        let env = |k: &str| (k == "CLOUDINARY_API_SECRET").then(|| "from-env".to_string());
        let creds = CloudinaryCredentials::from_settings(&doc, env).unwrap();
        assert_eq!(creds.cloud_name, "demo");
        assert_eq!(creds.api_key, "1234");
        assert_eq!(creds.api_secret, "from-env");
    }

    #[test]
    fn settings_credentials_report_missing_fields() {
        let doc = json!({ "cloudinary": { "cloud_name": "demo" } });
        match CloudinaryCredentials::from_settings(&doc, |_: &str| None) {
            Err(e @ ImageError::MissingSettings(_)) => {
                assert_eq!(e.to_string(), "Missing Cloudinary settings: apiKey, apiSecret");
            }
            other => panic!("expected missing settings, got {other:?}"),
        }
    }

    #[test]
    fn folder_defaults_and_trims() {
        assert_eq!(settings_folder(&json!({})), "newzlettr");
        assert_eq!(settings_folder(&json!({ "cloudinary": { "folder": "/news/" } })), "news");
        assert_eq!(settings_folder(&json!({ "cloudinary": { "folder": "  " } })), "newzlettr");
    }

    #[tokio::test]
    async fn ping_uses_basic_auth_and_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1_1/demo/ping"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;
        let client = CloudinaryClient::new(credentials()).unwrap().with_api_base(&server.uri());
        client.ping().await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid api_key 1234" }
            })))
            .mount(&server)
            .await;
        let client = CloudinaryClient::new(credentials()).unwrap().with_api_base(&server.uri());
        let err = client.ping().await.unwrap_err();
        assert_eq!(err.to_string(), "Cloudinary error: Invalid api_key 1234");
    }

    #[tokio::test]
    async fn delete_folder_pages_through_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/image/upload"))
            .and(query_param("prefix", "newzlettr/"))
            .and(query_param("next_cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deleted": { "newzlettr/c": "deleted" }, "partial": false
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1_1/demo/resources/image/upload"))
            .and(query_param("prefix", "newzlettr/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deleted": { "newzlettr/a": "deleted", "newzlettr/b": "deleted" },
                "partial": true,
                "next_cursor": "page2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudinaryClient::new(credentials()).unwrap().with_api_base(&server.uri());
        assert_eq!(client.delete_folder("/newzlettr/").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn upload_posts_signed_form_and_returns_secure_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1_1/demo/image/upload"))
            .and(body_string_contains("newzlettr/platforms"))
            .and(body_string_contains("signature_algorithm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "public_id": "newzlettr/platforms/android",
                "secure_url": "https://res.cloudinary.com/demo/image/upload/newzlettr/platforms/android.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("android.png");
        std::fs::write(&file, b"PNG").unwrap();

        let client = CloudinaryClient::new(credentials()).unwrap().with_api_base(&server.uri());
        let uploaded = client.upload(&file, "newzlettr/platforms").await.unwrap();
        assert!(uploaded.secure_url.ends_with("android.png"));
        assert_eq!(uploaded.public_id.as_deref(), Some("newzlettr/platforms/android"));
    }

    #[tokio::test]
    async fn rejected_upload_surfaces_cloudinary_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid Signature" }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("logo.svg");
        std::fs::write(&file, "<svg/>").unwrap();

        let client = CloudinaryClient::new(credentials()).unwrap().with_api_base(&server.uri());
        let err = client.upload(&file, "newzlettr").await.unwrap_err();
        assert_eq!(err.to_string(), "Cloudinary error: Invalid Signature");
    }
}
