//! Operator diagnostics for the authenticated session and the extraction
//! selectors. These surface what the bot actually sees so an expired cookie
//! or a markup change can be spotted without shell access.

use chrono::Utc;
use serde::Serialize;

use super::extract::{extract_topics, Topic};
use super::fetch::{FetchError, Fetcher};
use super::reply::{discover_reply_form, ReplyError};
use super::url::normalize_url;

/// How many characters of page HTML to include in reports.
const HTML_SAMPLE_CHARS: usize = 500;
const HTML_TAIL_CHARS: usize = 2000;

/// Result of probing the forum with the configured session cookies.
#[derive(Debug, Clone, Serialize)]
pub struct CookieReport {
    pub ok: bool,
    /// Whether the page carried logged-in markers. Meaningful only when `ok`.
    pub logged_in: bool,
    pub status: Option<u16>,
    /// Names of the credential cookies that are configured (non-empty).
    pub cookies_present: Vec<&'static str>,
    pub html_sample: String,
    pub error: Option<String>,
    pub checked_at: String,
}

/// What the bot sees when it looks for the reply form on a thread page.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyFormReport {
    pub logged_in: bool,
    pub form_found: bool,
    pub textarea_found: bool,
    pub textarea_name: Option<String>,
    pub action: Option<String>,
    pub html_tail: String,
}

/// Selector-by-selector view of a section page.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub selector_hits: Vec<(String, usize)>,
    pub topics: Vec<Topic>,
}

/// Section selectors probed individually, from most to least specific.
const SECTION_PROBE_SELECTORS: &[&str] = &[
    ".structItem.structItem--thread",
    ".structItem--thread",
    ".structItem.js-threadListItem",
    ".structItem",
];

/// Probe the forum base page with the configured cookies. Never fails: an
/// unreachable forum is itself a finding.
pub async fn check_cookies(fetcher: &Fetcher) -> CookieReport {
    let session = fetcher.session();
    let cookies_present = session.present_cookies();

    let checked_at = Utc::now().to_rfc3339();
    match fetcher.fetch_status(session.base_url()).await {
        Ok((status, body)) => CookieReport {
            ok: status == 200,
            logged_in: has_logged_in_markers(&body),
            status: Some(status),
            cookies_present,
            html_sample: char_prefix(&body, HTML_SAMPLE_CHARS),
            error: None,
            checked_at,
        },
        Err(e) => CookieReport {
            ok: false,
            logged_in: false,
            status: e.status,
            cookies_present,
            html_sample: String::new(),
            error: Some(e.to_string()),
            checked_at,
        },
    }
}

/// Report reply-form discovery for a thread page.
///
/// # Errors
///
/// Returns the fetch error when the page cannot be loaded at all.
pub async fn inspect_reply_form(
    fetcher: &Fetcher,
    url: &str,
) -> Result<ReplyFormReport, FetchError> {
    let url = normalize_url(url);
    let html = fetcher.fetch(&url).await?;

    let report = match discover_reply_form(&html, &url, fetcher.session().base_url()) {
        Ok(form) => ReplyFormReport {
            logged_in: has_logged_in_markers(&html),
            form_found: true,
            textarea_found: true,
            textarea_name: Some(form.textarea_name),
            action: Some(form.action),
            html_tail: char_suffix(&html, HTML_TAIL_CHARS),
        },
        Err(e) => ReplyFormReport {
            logged_in: has_logged_in_markers(&html),
            form_found: !matches!(e, ReplyError::FormNotFound),
            textarea_found: false,
            textarea_name: None,
            action: None,
            html_tail: char_suffix(&html, HTML_TAIL_CHARS),
        },
    };

    Ok(report)
}

/// Report selector hit counts and parsed topics for a section page.
///
/// # Errors
///
/// Returns the fetch error when the page cannot be loaded.
pub async fn inspect_section(fetcher: &Fetcher, url: &str) -> Result<SectionReport, FetchError> {
    let url = normalize_url(url);
    let html = fetcher.fetch(&url).await?;
    Ok(inspect_section_html(&html, &url))
}

fn inspect_section_html(html: &str, url: &str) -> SectionReport {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);
    let selector_hits = SECTION_PROBE_SELECTORS
        .iter()
        .map(|css| {
            let count = Selector::parse(css)
                .map(|selector| document.select(&selector).count())
                .unwrap_or(0);
            ((*css).to_string(), count)
        })
        .collect();

    SectionReport {
        selector_hits,
        topics: extract_topics(html, url),
    }
}

/// Logged-in heuristics: a logout control or the explicit logged-in flag.
fn has_logged_in_markers(html: &str) -> bool {
    html.to_lowercase().contains("logout") || html.contains(r#"data-logged-in="true""#)
}

fn char_prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn char_suffix(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(max_chars)).collect()
}
