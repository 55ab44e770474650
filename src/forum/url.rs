use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Tracking parameters to strip from watched URLs.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "gclsrc", "dclid", "igshid"];

/// What a watched URL points at: a single discussion or a listing of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Thread,
    Section,
}

impl TargetKind {
    /// Classify a URL by its shape. Returns `None` for URLs that are neither
    /// a thread nor a section; such targets are rejected at creation time.
    #[must_use]
    pub fn detect(url: &str) -> Option<Self> {
        if url.is_empty() {
            return None;
        }
        let u = url.to_lowercase();
        if u.contains("/threads/") || u.contains("index.php?threads") || u.contains("/posts/") {
            return Some(Self::Thread);
        }
        if u.contains("/forums/") || u.contains("index.php?forums") {
            return Some(Self::Section);
        }
        None
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Section => "section",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "thread" => Some(Self::Thread),
            "section" => Some(Self::Section),
            _ => None,
        }
    }
}

/// Normalize a URL into its canonical watched form.
///
/// Completes a missing scheme, lowercases the host, strips tracking query
/// parameters and the fragment, and collapses duplicate trailing slashes.
/// Idempotent: normalizing an already-normalized URL is a no-op.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let cleaned: String = url.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect();
    if cleaned.is_empty() {
        return cleaned;
    }

    let with_scheme = if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
        cleaned
    } else {
        format!("https://{cleaned}")
    };

    let Ok(mut normalized) = Url::parse(&with_scheme) else {
        return with_scheme;
    };

    // Query segments are kept raw so XenForo's query-path form
    // (index.php?threads/slug.123/) survives untouched.
    if let Some(query) = normalized.query().map(ToString::to_string) {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|segment| {
                let key = segment.split('=').next().unwrap_or(segment);
                !is_tracking_param(key)
            })
            .collect();
        if kept.is_empty() {
            normalized.set_query(None);
        } else {
            normalized.set_query(Some(&kept.join("&")));
        }
    }

    normalized.set_fragment(None);

    let path = normalized.path().to_string();
    if path.ends_with("//") {
        let trimmed = format!("{}/", path.trim_end_matches('/'));
        normalized.set_path(&trimmed);
    }

    normalized.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str()) || lower.starts_with("utm_")
}

static POST_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/posts/(\d+)").expect("static regex"));
static DOT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(\d+)(?:/|$)").expect("static regex"));
static THREADS_DOT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"threads=.*?\.(\d+)").expect("static regex"));
static THREADS_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"threads=(\d+)").expect("static regex"));

/// Extract the numeric thread/post identity from a URL, if one is present.
///
/// Handles `/posts/123`, `slug.123/` suffixes and both `threads=slug.123`
/// and `threads=123` query forms.
#[must_use]
pub fn extract_thread_id(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    for re in [&*POST_ID_RE, &*DOT_ID_RE, &*THREADS_DOT_ID_RE, &*THREADS_ID_RE] {
        if let Some(caps) = re.captures(url) {
            return Some(caps[1].to_string());
        }
    }
    None
}
