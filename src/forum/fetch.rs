use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, USER_AGENT};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::session::{ForumSession, USER_AGENT as BROWSER_USER_AGENT};
use super::url::normalize_url;

/// A failed page fetch. `status` is present when the server answered at all.
#[derive(Debug, Error)]
#[error("fetch failed: {message}")]
pub struct FetchError {
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    fn transport(e: &reqwest::Error) -> Self {
        Self {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// HTTP access to the forum, carrying the authenticated session on every
/// request. Shared read-only across the poll loop, keepalive and reply paths.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    session: ForumSession,
}

impl Fetcher {
    /// Build a fetcher around an immutable session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed, e.g. when a
    /// cookie value contains characters invalid in a header.
    pub fn new(session: ForumSession, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(REFERER, HeaderValue::from_str(session.base_url())?);
        let cookie_header = session.cookie_header();
        if !cookie_header.is_empty() {
            headers.insert(COOKIE, HeaderValue::from_str(&cookie_header)?);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, session })
    }

    #[must_use]
    pub fn session(&self) -> &ForumSession {
        &self.session
    }

    /// Fetch a forum page. Success is strictly HTTP 200 with a non-empty
    /// body; anything else (status, timeout, transport) is a `FetchError`
    /// for the caller to convert into "skip this cycle".
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let url = normalize_url(url);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::transport(&e))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(FetchError {
                status: Some(status),
                message: format!("unexpected status {status} for {url}"),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transport(&e))?;
        if body.is_empty() {
            return Err(FetchError {
                status: Some(200),
                message: format!("empty body for {url}"),
            });
        }

        Ok(body)
    }

    /// Fetch a page and report only the status line, without requiring a
    /// usable body. Used by diagnostics.
    pub async fn fetch_status(&self, url: &str) -> Result<(u16, String), FetchError> {
        let url = normalize_url(url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::transport(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Submit a form-encoded POST to a reply action URL. Returns the status
    /// and response body; the body may carry the forum's JSON error details.
    pub async fn post_form(
        &self,
        action: &str,
        referer: &str,
        fields: &[(String, String)],
    ) -> Result<(u16, String), FetchError> {
        let response = self
            .client
            .post(action)
            .header(REFERER, referer)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(fields)
            .send()
            .await
            .map_err(|e| FetchError::transport(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Submit the same fields as a multipart POST. Some deployments reject
    /// the form-encoded path, so this is the documented fallback encoding.
    pub async fn post_multipart(
        &self,
        action: &str,
        referer: &str,
        fields: &[(String, String)],
        html_field: Option<(&str, &str)>,
    ) -> Result<(u16, String), FetchError> {
        let mut form = reqwest::multipart::Form::new();
        if let Some((name, value)) = html_field {
            let part = reqwest::multipart::Part::text(value.to_string())
                .mime_str("text/html")
                .map_err(|e| FetchError {
                    status: None,
                    message: e.to_string(),
                })?;
            form = form.part(name.to_string(), part);
        }
        for (name, value) in fields {
            if html_field.is_some_and(|(html_name, _)| html_name == name.as_str()) {
                continue;
            }
            form = form.text(name.clone(), value.clone());
        }

        let response = self
            .client
            .post(action)
            .header(REFERER, referer)
            .header("X-Requested-With", "XMLHttpRequest")
            .multipart(form)
            .send()
            .await
            .map_err(|e| FetchError::transport(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Ping the forum base URL on a fixed interval so the authenticated
    /// session does not go idle-expired. Failures are logged and ignored;
    /// this path has no user-visible effect.
    pub async fn keepalive_loop(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            match self.fetch(self.session.base_url()).await {
                Ok(_) => debug!("keepalive ping ok"),
                Err(e) => warn!("keepalive ping failed: {e}"),
            }
        }
        debug!("keepalive loop stopped");
    }
}
