//! The poll scheduler and diff engine.
//!
//! One background task drives the cycle: read all subscriptions, fetch each
//! distinct URL once (bounded fan-out), extract, diff against each
//! subscriber's checkpoint, notify, advance. A failed URL is skipped for the
//! cycle without touching its checkpoints or the other URLs. Cycles never
//! overlap: the manual trigger and the timer share the loop, and a trigger
//! fired mid-cycle coalesces into exactly one follow-up run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checkpoint::{thread_is_new, SectionCheckpoint};
use super::extract::{extract_posts, extract_topics, Post, Topic};
use super::fetch::{FetchError, Fetcher};
use super::url::{normalize_url, TargetKind};
use crate::chat::ChatTransport;
use crate::config::Config;
use crate::db::{list_all_tracks, update_checkpoint, Database, Subscription};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("url is outside the tracked forum: {0}")]
    ForeignUrl(String),
    #[error("url is neither a thread nor a section: {0}")]
    UnsupportedUrl(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Control handle for a running tracker: fire an on-demand check or shut the
/// loop down. This is what the chat command layer registers as its trigger.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl TrackerHandle {
    /// Request a poll cycle now. If one is already running, exactly one
    /// follow-up cycle is queued; extra requests coalesce into it.
    pub fn trigger_check(&self) {
        self.trigger.notify_one();
    }

    /// Stop the poll loop after the in-flight cycle, if any, completes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The shutdown token, for companion tasks (e.g. the keepalive loop)
    /// that should stop with the tracker.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

pub struct Tracker {
    db: Database,
    fetcher: Arc<Fetcher>,
    chat: Arc<dyn ChatTransport>,
    poll_interval: Duration,
    fetch_concurrency: usize,
    excerpt_max_chars: usize,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl Tracker {
    #[must_use]
    pub fn new(
        config: &Config,
        db: Database,
        fetcher: Arc<Fetcher>,
        chat: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            db,
            fetcher,
            chat,
            poll_interval: config.poll_interval,
            fetch_concurrency: config.fetch_concurrency,
            excerpt_max_chars: config.excerpt_max_chars,
            trigger: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            trigger: Arc::clone(&self.trigger),
            cancel: self.cancel.clone(),
        }
    }

    /// Run the poll loop until shutdown.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "tracker started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
                () = self.trigger.notified() => debug!("manual check triggered"),
            }

            match self.check_all().await {
                Ok(notified) => {
                    if notified > 0 {
                        info!(notified, "poll cycle emitted notifications");
                    } else {
                        debug!("poll cycle found nothing new");
                    }
                }
                Err(e) => error!("poll cycle failed: {e:#}"),
            }
        }

        info!("tracker stopped");
    }

    /// Run one full poll cycle over every subscription. Returns the number of
    /// notifications emitted.
    ///
    /// # Errors
    ///
    /// Fails only when the subscription list cannot be read; individual URL
    /// failures are logged and skipped.
    pub async fn check_all(&self) -> anyhow::Result<usize> {
        let subs = list_all_tracks(self.db.pool()).await?;
        if subs.is_empty() {
            return Ok(0);
        }

        let mut by_url: HashMap<String, Vec<Subscription>> = HashMap::new();
        for sub in subs {
            by_url.entry(sub.url.clone()).or_default().push(sub);
        }

        // Fetch every distinct URL concurrently, bounded so cycle latency
        // stays sublinear in the number of targets.
        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));
        let mut tasks: JoinSet<(String, Vec<Subscription>, Result<String, FetchError>)> =
            JoinSet::new();
        for (url, group) in by_url {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = fetcher.fetch(&url).await;
                (url, group, result)
            });
        }

        let mut notified = 0;
        while let Some(joined) = tasks.join_next().await {
            let Ok((url, group, result)) = joined else {
                error!("fetch task panicked");
                continue;
            };
            match result {
                Ok(html) => notified += self.process_url(&url, &group, &html).await,
                // No checkpoint moves for a failed URL; it is retried next cycle.
                Err(e) => warn!(url = %url, "skipping url this cycle: {e}"),
            }
        }

        Ok(notified)
    }

    async fn process_url(&self, url: &str, subs: &[Subscription], html: &str) -> usize {
        match TargetKind::detect(url) {
            Some(TargetKind::Thread) => self.diff_thread(url, subs, html).await,
            Some(TargetKind::Section) => self.diff_section(url, subs, html).await,
            None => {
                warn!(url = %url, "subscription has an unrecognized url shape, skipping");
                0
            }
        }
    }

    async fn diff_thread(&self, url: &str, subs: &[Subscription], html: &str) -> usize {
        // Posts without identity are not diffable and must never count as new.
        let newest = extract_posts(html, url)
            .into_iter()
            .filter(|post| !post.id.is_empty())
            .last();
        let Some(newest) = newest else {
            debug!(url = %url, "no diffable posts extracted");
            return 0;
        };

        let mut notified = 0;
        for sub in subs {
            if !thread_is_new(&newest.id, sub.checkpoint()) {
                continue;
            }

            let message = format_post_notification(&newest, self.excerpt_max_chars);
            if let Err(e) = self.chat.send(sub.chat_id, &message).await {
                // At-most-once: the checkpoint still advances below, so a
                // transport hiccup cannot turn into duplicate spam later.
                warn!(chat_id = sub.chat_id, "notification delivery failed: {e:#}");
            }
            notified += 1;

            if let Err(e) = update_checkpoint(self.db.pool(), sub.chat_id, &sub.url, &newest.id).await
            {
                error!(chat_id = sub.chat_id, url = %url, "checkpoint advance failed: {e:#}");
            }
        }
        notified
    }

    async fn diff_section(&self, url: &str, subs: &[Subscription], html: &str) -> usize {
        let latest = extract_topics(html, url)
            .into_iter()
            .max_by(|a, b| composite_of(a).cmp_composite(&composite_of(b)));
        let Some(latest) = latest else {
            debug!(url = %url, "no topics extracted");
            return 0;
        };
        let latest_cp = composite_of(&latest);

        let mut notified = 0;
        for sub in subs {
            let stored = sub.checkpoint().and_then(SectionCheckpoint::decode);
            if !latest_cp.is_newer_than(stored.as_ref()) {
                continue;
            }

            let message = format_topic_notification(&latest);
            if let Err(e) = self.chat.send(sub.chat_id, &message).await {
                warn!(chat_id = sub.chat_id, "notification delivery failed: {e:#}");
            }
            notified += 1;

            if let Err(e) =
                update_checkpoint(self.db.pool(), sub.chat_id, &sub.url, &latest_cp.encode()).await
            {
                error!(chat_id = sub.chat_id, url = %url, "checkpoint advance failed: {e:#}");
            }
        }
        notified
    }

    /// Fetch and extract a thread page on demand. Diagnostic entry point for
    /// the command layer; does not touch any checkpoint.
    ///
    /// # Errors
    ///
    /// Returns a distinct error when the URL is outside the tracked forum,
    /// and the fetch error when the page cannot be loaded.
    pub async fn manual_fetch_posts(&self, url: &str) -> Result<Vec<Post>, TrackerError> {
        let url = normalize_url(url);
        if !self.fetcher.session().is_allowed(&url) {
            return Err(TrackerError::ForeignUrl(url));
        }
        let html = self.fetcher.fetch(&url).await?;
        Ok(extract_posts(&html, &url))
    }

    /// The target's current latest identity, encoded the way the diff engine
    /// stores it. Used to seed a new subscription's checkpoint so the first
    /// poll does not replay history. `None` when the page has no extractable
    /// items.
    ///
    /// # Errors
    ///
    /// Returns a distinct error for URLs outside the forum or of unknown
    /// shape, and the fetch error when the page cannot be loaded.
    pub async fn fetch_latest_identity(&self, url: &str) -> Result<Option<String>, TrackerError> {
        let url = normalize_url(url);
        if !self.fetcher.session().is_allowed(&url) {
            return Err(TrackerError::ForeignUrl(url));
        }
        let kind =
            TargetKind::detect(&url).ok_or_else(|| TrackerError::UnsupportedUrl(url.clone()))?;
        let html = self.fetcher.fetch(&url).await?;

        Ok(match kind {
            TargetKind::Thread => extract_posts(&html, &url)
                .into_iter()
                .filter(|post| !post.id.is_empty())
                .last()
                .map(|post| post.id),
            TargetKind::Section => extract_topics(&html, &url)
                .into_iter()
                .max_by(|a, b| composite_of(a).cmp_composite(&composite_of(b)))
                .map(|topic| composite_of(&topic).encode()),
        })
    }
}

fn composite_of(topic: &Topic) -> SectionCheckpoint {
    SectionCheckpoint::new(topic.id, topic.created_at.clone())
}

fn format_post_notification(post: &Post, excerpt_max_chars: usize) -> String {
    format!(
        "📝 New post\n👤 {}  •  {}\n\n{}\n\n🔗 {}",
        post.author,
        post.timestamp,
        excerpt(&post.body_text, excerpt_max_chars),
        post.permalink
    )
}

fn format_topic_notification(topic: &Topic) -> String {
    let mut message = format!(
        "🆕 New topic!\n\n📄 {}\n👤 Author: {}",
        topic.title, topic.author
    );
    if !topic.created_at.is_empty() {
        message.push_str("\n🕒 ");
        message.push_str(&topic.created_at);
    }
    message.push_str("\n🔗 ");
    message.push_str(&topic.url);
    message
}

/// Hard-cap a body excerpt, marking the cut. Counts characters, not bytes,
/// so multi-byte text never splits mid-character.
fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_within_cap_unchanged() {
        assert_eq!(excerpt("short body", 1500), "short body");
    }

    #[test]
    fn test_excerpt_truncated_with_marker() {
        let long = "x".repeat(20);
        assert_eq!(excerpt(&long, 10), format!("{}...", "x".repeat(10)));
    }

    #[test]
    fn test_excerpt_multibyte_safe() {
        let text = "привет мир, это длинное сообщение";
        let cut = excerpt(text, 10);
        assert!(cut.starts_with("привет мир"));
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_post_notification_contains_fields() {
        let post = Post {
            id: "1002".to_string(),
            author: "alice".to_string(),
            timestamp: "2024-03-01T10:00:00Z".to_string(),
            body_text: "hello there".to_string(),
            permalink: "https://forum.example.com/threads/t.1#post-1002".to_string(),
        };
        let message = format_post_notification(&post, 1500);
        assert!(message.contains("alice"));
        assert!(message.contains("2024-03-01T10:00:00Z"));
        assert!(message.contains("hello there"));
        assert!(message.contains("#post-1002"));
    }

    #[test]
    fn test_topic_notification_omits_empty_created_at() {
        let topic = Topic {
            id: 7,
            title: "A topic".to_string(),
            author: "bob".to_string(),
            url: "https://forum.example.com/threads/a-topic.7/".to_string(),
            pinned: false,
            created_at: String::new(),
        };
        let message = format_topic_notification(&topic);
        assert!(message.contains("A topic"));
        assert!(!message.contains("🕒"));
    }
}
