use thiserror::Error;
use url::Url;

use crate::config::Config;

/// Browser-like User-Agent sent on every forum request; the forum rejects
/// clients that do not present one.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid forum base URL {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },
}

/// The authenticated fetch context: externally supplied session cookies plus
/// the fixed request identity (User-Agent, Referer).
///
/// Constructed once at startup and shared immutably; expired credentials are
/// a reported condition, never silently regenerated.
#[derive(Debug, Clone)]
pub struct ForumSession {
    base_url: String,
    host: String,
    user_cookie: String,
    session_cookie: String,
    tfa_trust_cookie: String,
    csrf_cookie: String,
}

impl ForumSession {
    /// Build a session from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured base URL cannot be parsed.
    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let base_url = config.forum_base_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|e| SessionError::InvalidBaseUrl {
            url: base_url.clone(),
            message: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SessionError::InvalidBaseUrl {
                url: base_url.clone(),
                message: "missing host".to_string(),
            })?
            .to_string();

        Ok(Self {
            base_url,
            host,
            user_cookie: config.cookie_user.clone(),
            session_cookie: config.cookie_session.clone(),
            tfa_trust_cookie: config.cookie_tfa_trust.clone(),
            csrf_cookie: config.cookie_csrf.clone(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a URL belongs to the tracked forum.
    #[must_use]
    pub fn is_allowed(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| u.host_str() == Some(self.host.as_str()))
    }

    /// Names of the credential cookies that are actually present.
    #[must_use]
    pub fn present_cookies(&self) -> Vec<&'static str> {
        self.cookie_pairs()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// The `Cookie` header value carrying all non-empty credentials.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        self.cookie_pairs()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn cookie_pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("xf_user", self.user_cookie.as_str()),
            ("xf_session", self.session_cookie.as_str()),
            ("xf_tfa_trust", self.tfa_trust_cookie.as_str()),
            ("xf_csrf", self.csrf_cookie.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> ForumSession {
        let config = Config {
            forum_base_url: "https://forum.example.com/".to_string(),
            cookie_user: "u1".to_string(),
            cookie_session: "s1".to_string(),
            cookie_tfa_trust: String::new(),
            cookie_csrf: "c1".to_string(),
            ..Config::for_testing()
        };
        ForumSession::from_config(&config).expect("session")
    }

    #[test]
    fn test_cookie_header_skips_empty() {
        let session = test_session();
        assert_eq!(session.cookie_header(), "xf_user=u1; xf_session=s1; xf_csrf=c1");
    }

    #[test]
    fn test_present_cookies() {
        let session = test_session();
        assert_eq!(session.present_cookies(), vec!["xf_user", "xf_session", "xf_csrf"]);
    }

    #[test]
    fn test_is_allowed_by_host() {
        let session = test_session();
        assert!(session.is_allowed("https://forum.example.com/threads/topic.1/"));
        assert!(!session.is_allowed("https://other.example.com/threads/topic.1/"));
        assert!(!session.is_allowed("not a url"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let session = test_session();
        assert_eq!(session.base_url(), "https://forum.example.com");
    }
}
