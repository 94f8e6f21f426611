use serde_json::{Map, Value};

/// Placeholder shown instead of a stored secret.
pub const MASK: &str = "********";

/// Paths of every secret in the settings document.
const SECRET_PATHS: &[&[&str]] = &[
    &["plexToken"],
    &["tautulliApiKey"],
    &["tautulli", "apiKey"],
    &["tautulli", "apikey"],
    &["tautulli", "token"],
    &["smtpEmailPassword"],
    &["cloudinary", "apiSecret"],
];

/// Copy of `doc` with every non-empty secret replaced by [`MASK`].
pub fn masked(doc: &Value) -> Value {
    let mut out = doc.clone();
    for path in SECRET_PATHS {
        if let Some(value) = lookup_mut(&mut out, path) {
            let present = match value {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            };
            if present {
                *value = Value::String(MASK.to_string());
            }
        }
    }
    out
}

/// True when `value` is a placeholder rather than a real new secret.
pub fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value == MASK
}

/// Deep-merge `incoming` over `stored`. Secrets sent back as the mask or as
/// an empty string keep their stored value.
pub fn merge(stored: &Value, mut incoming: Value) -> Value {
    for path in SECRET_PATHS {
        let Some((last, parents)) = path.split_last() else {
            continue;
        };
        let placeholder = lookup_mut(&mut incoming, path)
            .and_then(|v| v.as_str().map(is_placeholder))
            .unwrap_or(false);
        if placeholder {
            if let Some(Value::Object(parent)) = lookup_mut(&mut incoming, parents) {
                parent.remove(*last);
            }
        }
    }

    let mut merged = match stored {
        Value::Object(_) => stored.clone(),
        _ => Value::Object(Map::new()),
    };
    deep_merge(&mut merged, incoming);
    merged
}

fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(&key) {
                        deep_merge(existing, value);
                    }
                } else {
                    target.insert(key, value);
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn lookup_mut<'a>(doc: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    path.iter().try_fold(doc, |node, key| node.get_mut(*key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_present_secrets_only() {
        let doc = json!({
            "plexUrl": "http://plex:32400",
            "plexToken": "tok",
            "tautulliApiKey": "",
            "tautulli": { "url": "http://t:8181", "apiKey": "k" },
            "cloudinary": { "cloudName": "demo", "apiSecret": null }
        });
        let out = masked(&doc);
        assert_eq!(out["plexToken"], MASK);
        assert_eq!(out["tautulliApiKey"], "");
        assert_eq!(out["tautulli"]["apiKey"], MASK);
        assert_eq!(out["tautulli"]["url"], "http://t:8181");
        assert_eq!(out["cloudinary"]["apiSecret"], Value::Null);
        assert_eq!(out["plexUrl"], "http://plex:32400");
    }

    #[test]
    fn merge_keeps_secrets_sent_back_as_placeholders() {
        let stored = json!({
            "plexToken": "real-token",
            "smtpEmailPassword": "hunter2",
            "cloudinary": { "cloudName": "demo", "apiSecret": "shh", "folder": "newzlettr" }
        });
        let incoming = json!({
            "plexToken": MASK,
            "smtpEmailPassword": "",
            "smtpServer": "smtp.example.com",
            "cloudinary": { "cloudName": "renamed", "apiSecret": MASK }
        });
        let merged = merge(&stored, incoming);
        assert_eq!(merged["plexToken"], "real-token");
        assert_eq!(merged["smtpEmailPassword"], "hunter2");
        assert_eq!(merged["smtpServer"], "smtp.example.com");
        assert_eq!(merged["cloudinary"]["cloudName"], "renamed");
        assert_eq!(merged["cloudinary"]["apiSecret"], "shh");
        assert_eq!(merged["cloudinary"]["folder"], "newzlettr");
    }

    #[test]
    fn merge_replaces_secrets_with_new_values() {
        let stored = json!({ "tautulli": { "apiKey": "old" } });
        let merged = merge(&stored, json!({ "tautulli": { "apiKey": "new" } }));
        assert_eq!(merged["tautulli"]["apiKey"], "new");
    }

    #[test]
    fn merge_over_empty_store_starts_fresh() {
        let merged = merge(&Value::Null, json!({ "plexUrl": "http://plex" }));
        assert_eq!(merged, json!({ "plexUrl": "http://plex" }));
    }
}
