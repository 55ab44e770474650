//! Reply submission: discover the live reply form, assemble its hidden
//! fields, submit the message and verify it actually landed.
//!
//! The forum returns HTTP success even for silently rejected posts, so every
//! attempt is verified by re-fetching the thread and looking for the message.
//! One documented fallback exists (multipart encoding, for deployments that
//! reject the form-encoded path); there is no other retry loop.

use std::time::Duration;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::fetch::{FetchError, Fetcher};
use super::url::normalize_url;

/// Pause before the verification re-fetch, giving the forum time to render
/// the accepted post.
const VERIFY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("url is outside the tracked forum: {0}")]
    ForeignUrl(String),
    #[error("message is empty")]
    EmptyMessage,
    #[error("cannot fetch thread page: {0}")]
    PageUnavailable(#[source] FetchError),
    /// The page genuinely lacks a reply affordance, e.g. a locked thread.
    #[error("reply form not found")]
    FormNotFound,
    #[error("message textarea not found")]
    TextareaNotFound,
    /// Both encodings were attempted and neither produced a visible post.
    #[error("reply rejected (form-encoded: {normal_err}; multipart: {multipart_err})")]
    Rejected {
        normal_err: String,
        multipart_err: String,
    },
}

/// Which encoding finally carried the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    FormEncoded,
    Multipart,
}

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Ordered reply-form discovery strategies.
static FORM_STRATEGIES: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    vec![
        ("add-reply-action", sel("form[action*='add-reply']")),
        ("quick-reply-class", sel("form.js-quickReply")),
        ("quick-reply-init", sel("form[data-xf-init*='quick-reply']")),
        ("post-action", sel("form[action*='post']")),
    ]
});

/// Ordered message textarea candidates.
static TEXTAREA_STRATEGIES: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel("textarea[name='message_html']"),
        sel("textarea[name='message']"),
        sel("textarea[data-original-name='message']"),
        sel("textarea"),
    ]
});

static NAMED_INPUT_SELECTOR: Lazy<Selector> = Lazy::new(|| sel("input[name]"));
static XF_TOKEN_SELECTOR: Lazy<Selector> = Lazy::new(|| sel("input[name='_xfToken']"));

/// A reply form lifted out of a thread page: resolved action URL, the form's
/// input fields (anti-forgery tokens, context identifiers) and the name of
/// the message textarea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyForm {
    pub action: String,
    pub fields: Vec<(String, String)>,
    pub textarea_name: String,
}

/// Locate the reply form in a thread page. Pure; all awaiting happens on the
/// owned result.
pub fn discover_reply_form(
    html: &str,
    page_url: &str,
    base_url: &str,
) -> Result<ReplyForm, ReplyError> {
    let document = Html::parse_document(html);

    let form = FORM_STRATEGIES
        .iter()
        .find_map(|(_, selector)| document.select(selector).next())
        .ok_or(ReplyError::FormNotFound)?;

    let action_raw = form
        .value()
        .attr("action")
        .filter(|a| !a.is_empty())
        .unwrap_or(page_url);
    let action = resolve_action(action_raw, base_url);

    let mut fields: Vec<(String, String)> = Vec::new();
    for input in form.select(&NAMED_INPUT_SELECTOR) {
        let Some(name) = input.value().attr("name") else {
            continue;
        };
        let value = input.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }

    // Some markup versions keep the anti-forgery token outside the form.
    let has_token = fields
        .iter()
        .any(|(name, value)| name == "_xfToken" && !value.is_empty());
    if !has_token {
        if let Some(token) = document
            .select(&XF_TOKEN_SELECTOR)
            .next()
            .and_then(|el| el.value().attr("value"))
        {
            upsert(&mut fields, "_xfToken", token);
        }
    }

    let textarea = TEXTAREA_STRATEGIES
        .iter()
        .find_map(|selector| form.select(selector).next())
        .ok_or(ReplyError::TextareaNotFound)?;
    let textarea_name = textarea
        .value()
        .attr("name")
        .filter(|n| !n.is_empty())
        .unwrap_or("message")
        .to_string();

    Ok(ReplyForm {
        action,
        fields,
        textarea_name,
    })
}

fn resolve_action(action: &str, base_url: &str) -> String {
    if action.starts_with("http://") || action.starts_with("https://") {
        return action.to_string();
    }
    Url::parse(base_url)
        .and_then(|base| base.join(action))
        .map_or_else(
            |_| format!("{}/{}", base_url.trim_end_matches('/'), action.trim_start_matches('/')),
            |joined| joined.to_string(),
        )
}

/// Assemble the submission payload: the form's own fields plus the message
/// body (HTML-wrapped, the forum expects rich-text submission) and the flags
/// requesting a machine-readable response.
#[must_use]
pub fn build_payload(
    form: &ReplyForm,
    page_url: &str,
    base_url: &str,
    message: &str,
) -> Vec<(String, String)> {
    let html_message = format!("<p>{message}</p>");
    let mut payload = form.fields.clone();

    upsert(&mut payload, "_xfWithData", "1");
    upsert(&mut payload, "_xfResponseType", "json");
    let request_uri = page_url
        .strip_prefix(base_url)
        .filter(|rest| !rest.is_empty())
        .unwrap_or("/");
    upsert(&mut payload, "_xfRequestUri", request_uri);

    upsert(&mut payload, &form.textarea_name, &html_message);
    upsert(&mut payload, "message", message);
    upsert(&mut payload, "message_html", &html_message);

    payload
}

fn upsert(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(existing) = fields.iter_mut().find(|(n, _)| n == name) {
        existing.1 = value.to_string();
    } else {
        fields.push((name.to_string(), value.to_string()));
    }
}

/// Post a reply into a thread.
///
/// # Errors
///
/// Terminal failures (no form, no textarea, unreachable page) are returned
/// as-is. When both the form-encoded and multipart submissions fail
/// verification, the error carries both failure reasons for diagnostics.
pub async fn post_reply(
    fetcher: &Fetcher,
    thread_url: &str,
    message: &str,
) -> Result<ReplyOutcome, ReplyError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ReplyError::EmptyMessage);
    }

    let url = normalize_url(thread_url);
    let session = fetcher.session();
    if !session.is_allowed(&url) {
        return Err(ReplyError::ForeignUrl(url));
    }

    // Fetched fresh every time: the embedded anti-forgery tokens rotate.
    let html = fetcher
        .fetch(&url)
        .await
        .map_err(ReplyError::PageUnavailable)?;
    let form = discover_reply_form(&html, &url, session.base_url())?;
    debug!(action = %form.action, textarea = %form.textarea_name, "reply form discovered");

    let payload = build_payload(&form, &url, session.base_url(), message);
    let html_message = format!("<p>{message}</p>");
    let token = message.split_whitespace().next().unwrap_or(message);

    let normal_err = match attempt_form_encoded(fetcher, &form, &url, &payload, token).await {
        Ok(()) => return Ok(ReplyOutcome::FormEncoded),
        Err(e) => e,
    };
    warn!("form-encoded reply failed: {normal_err}");

    let multipart_err =
        match attempt_multipart(fetcher, &form, &url, &payload, &html_message, token).await {
            Ok(()) => return Ok(ReplyOutcome::Multipart),
            Err(e) => e,
        };
    warn!("multipart reply failed: {multipart_err}");

    Err(ReplyError::Rejected {
        normal_err,
        multipart_err,
    })
}

async fn attempt_form_encoded(
    fetcher: &Fetcher,
    form: &ReplyForm,
    page_url: &str,
    payload: &[(String, String)],
    token: &str,
) -> Result<(), String> {
    let (status, body) = fetcher
        .post_form(&form.action, page_url, payload)
        .await
        .map_err(|e| e.to_string())?;
    confirm(fetcher, page_url, status, &body, token).await
}

async fn attempt_multipart(
    fetcher: &Fetcher,
    form: &ReplyForm,
    page_url: &str,
    payload: &[(String, String)],
    html_message: &str,
    token: &str,
) -> Result<(), String> {
    let (status, body) = fetcher
        .post_multipart(
            &form.action,
            page_url,
            payload,
            Some((&form.textarea_name, html_message)),
        )
        .await
        .map_err(|e| e.to_string())?;
    confirm(fetcher, page_url, status, &body, token).await
}

/// The verification step: HTTP success alone does not mean the post was
/// accepted, so re-fetch the thread and require the message's leading token
/// to be visible.
async fn confirm(
    fetcher: &Fetcher,
    page_url: &str,
    status: u16,
    body: &str,
    token: &str,
) -> Result<(), String> {
    if !matches!(status, 200 | 204 | 302) {
        return Err(format!("HTTP {status}"));
    }
    tokio::time::sleep(VERIFY_DELAY).await;
    match fetcher.fetch(page_url).await {
        Ok(page) if page.contains(token) => Ok(()),
        Ok(_) => {
            // We asked for a machine-readable response; surface the forum's
            // own error details when it sent any.
            let hint = json_error_hint(body)
                .map(|errors| format!(" (forum said: {errors})"))
                .unwrap_or_default();
            Err(format!(
                "HTTP {status} but reply not visible after re-fetch{hint}"
            ))
        }
        Err(e) => Err(format!("HTTP {status} but verification fetch failed: {e}")),
    }
}

fn json_error_hint(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let errors = value.get("errors")?;
    if errors.is_null() {
        return None;
    }
    Some(errors.to_string())
}
