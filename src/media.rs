use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::stats::coerce;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
/// Items stamped up to an hour in the future are kept (clock skew).
const FUTURE_SKEW_SECONDS: i64 = 60 * 60;
/// Preview cards for a single media type never show more than this.
const TYPED_PREVIEW_CAP: usize = 25;

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_RECENT_LIMIT: i64 = 12;

/// A recently-added record as Tautulli sent it. Unknown fields pass through
/// untouched; accessors cover the fields the newsletter relies on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MediaItem(pub Map<String, Value>);

impl MediaItem {
    /// `media_type` (or `type`), lower-cased.
    pub fn media_type(&self) -> String {
        self.text("media_type")
            .filter(|t| !t.is_empty())
            .or_else(|| self.text("type"))
            .unwrap_or_default()
            .to_lowercase()
    }

    pub fn title(&self) -> Option<&str> {
        self.text("title")
    }

    pub fn parent_title(&self) -> Option<&str> {
        self.text("parent_title")
    }

    pub fn grandparent_title(&self) -> Option<&str> {
        self.text("grandparent_title")
    }

    /// Epoch seconds from the first non-null of `added_at`, `addedAt`,
    /// `created_at`; zero when none is present, `None` when not numeric.
    pub fn added_at(&self) -> Option<f64> {
        let raw = ["added_at", "addedAt", "created_at"]
            .iter()
            .find_map(|k| self.0.get(*k).filter(|v| !v.is_null()));
        match raw {
            None => Some(0.0),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Some(other) => Some(coerce(other)),
        }
    }

    /// Season and show rows get a `grandparent_title` so TV content can
    /// always be grouped by show name.
    pub fn normalize_titles(&mut self) {
        if !self.grandparent_title().map_or(true, |t| t.trim().is_empty()) {
            return;
        }
        let ancestor = match self.media_type().as_str() {
            "season" => self.parent_title(),
            "show" => self.title(),
            _ => None,
        }
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
        if let Some(ancestor) = ancestor {
            self.0
                .insert("grandparent_title".to_string(), Value::String(ancestor));
        }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Type filter understood by the recent endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFilter {
    Movie,
    Episode,
    All,
}

impl MediaFilter {
    /// Anything other than `movie` / `episode` means no filter.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_lowercase()).as_deref() {
            Some("movie") => Self::Movie,
            Some("episode") => Self::Episode,
            _ => Self::All,
        }
    }

    fn keeps(self, item: &MediaItem) -> bool {
        match self {
            Self::Movie => item.media_type() == "movie",
            Self::Episode => item.media_type() == "episode",
            Self::All => true,
        }
    }
}

/// Clamped parameters for one recent-media listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentQuery {
    pub filter: MediaFilter,
    pub window_days: i64,
    pub limit: i64,
}

impl RecentQuery {
    pub fn new(filter: MediaFilter, window_days: i64, limit: i64) -> Self {
        Self {
            filter,
            window_days: window_days.clamp(1, 90),
            limit: limit.clamp(1, 500),
        }
    }

    /// Build from raw query-string values; bad or zero numbers use defaults.
    pub fn from_raw(kind: Option<&str>, days: Option<&str>, limit: Option<&str>) -> Self {
        Self::new(
            MediaFilter::parse(kind),
            parse_int_or(days, DEFAULT_WINDOW_DAYS),
            parse_int_or(limit, DEFAULT_RECENT_LIMIT),
        )
    }

    /// Number of rows actually returned.
    pub fn effective_limit(&self) -> usize {
        let limit = usize::try_from(self.limit).unwrap_or(1);
        match self.filter {
            MediaFilter::Movie | MediaFilter::Episode => limit.min(TYPED_PREVIEW_CAP),
            MediaFilter::All => limit,
        }
    }
}

/// Normalize, window, filter, sort newest-first, cap.
pub fn recent_media(items: Vec<MediaItem>, query: &RecentQuery, now: i64) -> Vec<MediaItem> {
    let cutoff = (now - query.window_days * SECONDS_PER_DAY) as f64;
    let ceiling = (now + FUTURE_SKEW_SECONDS) as f64;

    let mut kept: Vec<(f64, MediaItem)> = items
        .into_iter()
        .map(|mut item| {
            item.normalize_titles();
            item
        })
        .filter_map(|item| {
            let ts = item.added_at()?;
            (ts >= cutoff && ts <= ceiling).then_some((ts, item))
        })
        .filter(|(_, item)| query.filter.keeps(item))
        .collect();

    // sort_by is stable, so equal timestamps keep their input order
    kept.sort_by(|(a, _), (b, _)| b.total_cmp(a));
    kept.into_iter()
        .take(query.effective_limit())
        .map(|(_, item)| item)
        .collect()
}

/// Rows from a `get_recently_added` payload; non-objects are dropped.
pub fn recently_added_rows(data: &Value) -> Vec<MediaItem> {
    data.get("recently_added")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_object)
                .map(|row| MediaItem(row.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Leading-integer parse in the manner of a lenient query string reader:
/// `"12abc"` is 12, `"-3"` is -3, out-of-range digits saturate. Missing,
/// unparsable or zero input gives `default`.
pub fn parse_int_or(raw: Option<&str>, default: i64) -> i64 {
    let Some(raw) = raw.map(str::trim) else {
        return default;
    };
    let sign_len = usize::from(raw.starts_with(['-', '+']));
    let digits = raw[sign_len..]
        .chars()
        .take_while(char::is_ascii_digit)
        .count();
    if digits == 0 {
        return default;
    }
    let n = raw[..sign_len + digits].parse::<i64>().unwrap_or(if raw.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    });
    if n == 0 {
        default
    } else {
        n
    }
}

/// A newsletter recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Recipients from a `get_users` payload (bare array or `{users: [...]}`),
/// dropping rows without an email and repeats of the same address.
pub fn recipients(data: &Value) -> Vec<Recipient> {
    let rows = data
        .as_array()
        .or_else(|| data.get("users").and_then(Value::as_array));
    let Some(rows) = rows else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| {
            let email = row.get("email").and_then(Value::as_str)?.trim();
            if email.is_empty() || !seen.insert(email.to_lowercase()) {
                return None;
            }
            let name = ["friendly_name", "username", "user", "name"]
                .iter()
                .filter_map(|k| row.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|n| !n.is_empty())
                .unwrap_or_default();
            Some(Recipient {
                name: name.to_string(),
                email: email.to_string(),
            })
        })
        .collect()
}
