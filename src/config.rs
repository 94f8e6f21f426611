use serde_json::Value;

/// Connection parameters for one request against the statistics server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Never ends with a slash.
    pub base_url: String,
    pub api_key: String,
    pub host_header: Option<String>,
    pub sni_host: Option<String>,
}

/// Source of environment variables, injectable so tests stay hermetic.
pub type EnvLookup = fn(&str) -> Option<String>;

pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

const ENV_URL: &[&str] = &["TAUTULLI_URL", "TAUTULLI_BASE_URL"];
const ENV_KEY: &[&str] = &["TAUTULLI_API_KEY", "TAUTULLI_APIKEY", "TAUTULLI_TOKEN"];
const ENV_HOST_HEADER: &[&str] = &["TAUTULLI_HOST_HEADER"];
const ENV_SNI: &[&str] = &["TAUTULLI_SNI_HOST"];

const NESTED_URL: &[&str] = &["url", "baseUrl"];
const NESTED_KEY: &[&str] = &["apiKey", "apikey", "token"];
const FLAT_URL: &[&str] = &["tautulliUrl", "tautulliBaseUrl"];
const FLAT_KEY: &[&str] = &["tautulliApiKey", "tautulliKey"];

/// Resolve the Tautulli connection from the environment and the stored
/// settings document. Environment beats the nested `tautulli` block, which
/// beats the flat `tautulli*` keys. Empty values count as absent.
pub fn resolve(env: impl Fn(&str) -> Option<String>, doc: &Value) -> RemoteConfig {
    let nested = doc.get("tautulli");
    let from_env = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| env(*k).filter(|v| !v.trim().is_empty()))
    };

    let base_url = from_env(ENV_URL)
        .or_else(|| first_string(nested, NESTED_URL))
        .or_else(|| first_string(Some(doc), FLAT_URL))
        .unwrap_or_default();
    let api_key = from_env(ENV_KEY)
        .or_else(|| first_string(nested, NESTED_KEY))
        .or_else(|| first_string(Some(doc), FLAT_KEY))
        .unwrap_or_default();

    RemoteConfig {
        base_url: base_url.trim().trim_end_matches('/').to_string(),
        api_key: api_key.trim().to_string(),
        host_header: from_env(ENV_HOST_HEADER).or_else(|| first_string(nested, &["hostHeader"])),
        sni_host: from_env(ENV_SNI).or_else(|| first_string(nested, &["sniHost"])),
    }
}

fn first_string(obj: Option<&Value>, keys: &[&str]) -> Option<String> {
    let obj = obj?;
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First four and last four characters of a key, for display only.
pub fn mask_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let chars: Vec<char> = key.chars().collect();
    let head: String = chars.iter().take(4).collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    Some(format!("{head}…{tail}"))
}
