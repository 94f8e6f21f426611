use thiserror::Error;

/// Failure modes of a single Tautulli command.
#[derive(Debug, Error)]
pub enum TautulliError {
    /// Base URL or API key is empty; no request was attempted.
    #[error("Tautulli URL or API key missing in config")]
    Configuration,

    /// DNS, TLS, connection or timeout failure. The request URL is stripped
    /// before wrapping so the API key never ends up in a message.
    #[error("fetch failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Invalid Tautulli URL: {0}")]
    InvalidUrl(String),

    #[error("Could not resolve {host}: {message}")]
    Resolve { host: String, message: String },

    #[error("Redirected with no usable Location header (status {status})")]
    Redirect { status: u16 },

    #[error("HTTP {status} {status_text}{}", body_suffix(.body))]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    /// The envelope's `result` was something other than `"success"`.
    #[error("{0}")]
    RemoteApi(String),

    #[error("Invalid JSON from Tautulli: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TautulliError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.without_url())
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {body}")
    }
}

/// Failures of the static image migration.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Missing env vars: {}. Check your .env.", .0.join(", "))]
    MissingEnv(Vec<&'static str>),

    #[error("Missing Cloudinary settings: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Cloudinary error: {0}")]
    Api(String),

    #[error("could not encode image map: {0}")]
    Map(#[from] serde_json::Error),
}
