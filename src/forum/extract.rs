//! Pure HTML extraction for thread pages and section listings.
//!
//! The forum's markup has shipped several incompatible versions, so every
//! lookup here is an ordered list of named strategies tried in sequence until
//! one yields results. Extraction never fails: unparseable items are skipped
//! (posts may surface with an empty id, which excludes them from diffing) and
//! unmatched pages produce empty lists.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

/// A post extracted from a thread page. Ephemeral: diffed in memory, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    /// Empty when no identity could be derived; such posts are not diffable.
    pub id: String,
    pub author: String,
    /// ISO-8601 when the markup provides it, otherwise a human label. Opaque.
    pub timestamp: String,
    pub body_text: String,
    pub permalink: String,
}

/// A topic extracted from a section listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub pinned: bool,
    /// ISO-8601 or empty.
    pub created_at: String,
}

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Ordered container strategies for thread pages.
static POST_CONTAINERS: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    vec![
        ("message-body", sel("article.message-body.js-selectToQuote")),
        ("article-post-id", sel("article[data-post-id], article[id^='js-post-']")),
    ]
});

/// Ordered container strategies for section pages.
static TOPIC_CONTAINERS: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    vec![
        ("thread-item", sel(".structItem.structItem--thread, .structItem--thread")),
        ("struct-item", sel(".structItem")),
    ]
});

static BODY_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    vec![
        sel("div.bbWrapper"),
        sel("div.message-userContent.lbContainer.js-lbContainer"),
        sel("div.message-userContent"),
    ]
});

static USERNAME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| sel("a.username, h4.message-name, span.username"));
static TIME_DATETIME_SELECTOR: Lazy<Selector> = Lazy::new(|| sel("time[datetime]"));
static TIME_SELECTOR: Lazy<Selector> = Lazy::new(|| sel("time"));
static TITLE_ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    sel(".structItem-title a[data-preview-url], .structItem-title a[href], a[href*='/threads/']")
});
static START_DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| sel(".structItem-startDate time[datetime]"));

static TRAILING_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").expect("static regex"));
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("static regex"));
static HREF_DOT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(\d+)(?:/|$)").expect("static regex"));
static HREF_THREADS_DOT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"threads/.+\.(\d+)(?:/|$)").expect("static regex"));

/// Identity attributes read directly off a post container.
const DIRECT_ID_ATTRS: &[&str] = &["data-lb-id", "data-id", "data-post-id"];
/// Attributes that may carry the identity as a numeric suffix (`js-post-123`,
/// `post-123`).
const HINT_ATTRS: &[&str] = &["data-content", "id", "data-message-id"];

const TOPIC_ID_CLASS_PREFIX: &str = "js-threadListItem-";
const UNKNOWN_AUTHOR: &str = "unknown";

/// Extract posts from a thread page, in document order (oldest first; the
/// last element is the newest). Never fails: bad markup yields fewer or
/// non-diffable items, not errors.
#[must_use]
pub fn extract_posts(html: &str, page_url: &str) -> Vec<Post> {
    let document = Html::parse_document(html);

    let mut containers: Vec<ElementRef> = Vec::new();
    for (_, selector) in POST_CONTAINERS.iter() {
        containers = document.select(selector).collect();
        if !containers.is_empty() {
            break;
        }
    }

    let mut posts = Vec::with_capacity(containers.len());
    for container in containers {
        let id = post_identity(&container);
        let author = find_in_scope(&container, &USERNAME_SELECTOR)
            .map_or_else(|| UNKNOWN_AUTHOR.to_string(), |el| element_text(&el));
        let timestamp = find_timestamp(&container);
        let body_text = extract_body_text(&container);
        let permalink = format!("{}#post-{id}", page_url.trim_end_matches('/'));

        posts.push(Post {
            id,
            author,
            timestamp,
            body_text,
            permalink,
        });
    }

    posts
}

/// Extract topics from a section listing page, de-duplicated by numeric id.
/// Topics without a derivable numeric identity are dropped entirely.
#[must_use]
pub fn extract_topics(html: &str, section_url: &str) -> Vec<Topic> {
    let document = Html::parse_document(html);

    let mut containers: Vec<ElementRef> = Vec::new();
    for (_, selector) in TOPIC_CONTAINERS.iter() {
        containers = document.select(selector).collect();
        if !containers.is_empty() {
            break;
        }
    }

    let mut topics = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for container in containers {
        let Some(id) = topic_identity(&container) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }

        let Some(anchor) = container.select(&TITLE_ANCHOR_SELECTOR).next() else {
            continue;
        };
        let title = element_text(&anchor);
        let href = anchor.value().attr("href").unwrap_or_default();
        let url = resolve_href(href, section_url);

        let author = container
            .select(&USERNAME_SELECTOR)
            .next()
            .map_or_else(|| UNKNOWN_AUTHOR.to_string(), |el| element_text(&el));

        let pinned = container
            .value()
            .classes()
            .any(|c| c.contains("sticky") || c.contains("pinned"));

        let created_at = container
            .select(&START_DATE_SELECTOR)
            .next()
            .or_else(|| container.select(&TIME_DATETIME_SELECTOR).next())
            .and_then(|el| el.value().attr("datetime"))
            .unwrap_or_default()
            .to_string();

        topics.push(Topic {
            id,
            title,
            author,
            url,
            pinned,
            created_at,
        });
    }

    topics
}

/// Derive a post identity: direct container attributes first, then numeric
/// hints on an ancestor `article`, then hints on the container itself.
fn post_identity(container: &ElementRef) -> String {
    for attr in DIRECT_ID_ATTRS {
        if let Some(value) = container.value().attr(attr) {
            if !value.is_empty() {
                return trailing_digits(value).unwrap_or_else(|| value.to_string());
            }
        }
    }

    for ancestor in container.ancestors().filter_map(ElementRef::wrap) {
        if ancestor.value().name() == "article" {
            if let Some(id) = numeric_hint(&ancestor) {
                return id;
            }
        }
    }

    numeric_hint(container).unwrap_or_default()
}

fn numeric_hint(el: &ElementRef) -> Option<String> {
    for attr in HINT_ATTRS {
        if let Some(value) = el.value().attr(attr) {
            if let Some(digits) = trailing_digits(value) {
                return Some(digits);
            }
        }
    }
    None
}

fn trailing_digits(value: &str) -> Option<String> {
    TRAILING_DIGITS_RE
        .captures(value)
        .map(|caps| caps[1].to_string())
}

/// Topic identity: a `js-threadListItem-<id>` class token, else the numeric
/// dot-suffix of the title anchor's href.
fn topic_identity(container: &ElementRef) -> Option<u64> {
    for class in container.value().classes() {
        if let Some(raw) = class.strip_prefix(TOPIC_ID_CLASS_PREFIX) {
            if let Ok(id) = raw.parse::<u64>() {
                if id > 0 {
                    return Some(id);
                }
            }
        }
    }

    let anchor = container.select(&TITLE_ANCHOR_SELECTOR).next()?;
    let href = anchor.value().attr("href")?;
    let caps = HREF_DOT_ID_RE
        .captures(href)
        .or_else(|| HREF_THREADS_DOT_ID_RE.captures(href))?;
    caps[1].parse::<u64>().ok().filter(|id| *id > 0)
}

/// Resolve a topic href against the section URL (not the site root), since
/// pagination or mirrored base paths can differ.
fn resolve_href(href: &str, section_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    Url::parse(section_url)
        .and_then(|base| base.join(href))
        .map_or_else(|_| href.to_string(), |joined| joined.to_string())
}

/// Look for a match inside the container, then inside nearby message
/// ancestors. Post containers in some markup versions hold only the body,
/// with the author cell in a sibling subtree of the enclosing article.
fn find_in_scope<'a>(container: &ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    if let Some(found) = container.select(selector).next() {
        return Some(found);
    }
    for ancestor in container.ancestors().filter_map(ElementRef::wrap).take(4) {
        let value = ancestor.value();
        let is_message_scope =
            value.name() == "article" || value.classes().any(|c| c.starts_with("message"));
        if !is_message_scope {
            continue;
        }
        if let Some(found) = ancestor.select(selector).next() {
            return Some(found);
        }
    }
    None
}

fn find_timestamp(container: &ElementRef) -> String {
    if let Some(el) = find_in_scope(container, &TIME_DATETIME_SELECTOR) {
        if let Some(datetime) = el.value().attr("datetime") {
            return datetime.to_string();
        }
    }
    find_in_scope(container, &TIME_SELECTOR).map_or_else(String::new, |el| element_text(&el))
}

fn extract_body_text(container: &ElementRef) -> String {
    let body = BODY_SELECTORS
        .iter()
        .find_map(|selector| container.select(selector).next());
    let raw = body.map_or_else(
        || text_excluding_quotes(container),
        |el| text_excluding_quotes(&el),
    );
    BLANK_RUN_RE.replace_all(&raw, "\n").trim().to_string()
}

/// Collect an element's text in document order, skipping quoting blocks.
fn text_excluding_quotes(el: &ElementRef) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let quoted = node
            .ancestors()
            .take_while(|a| a.id() != el.id())
            .filter_map(ElementRef::wrap)
            .any(|a| is_quote_element(&a));
        if quoted {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }
    parts.join("\n")
}

fn is_quote_element(el: &ElementRef) -> bool {
    let value = el.value();
    match value.name() {
        "blockquote" => true,
        "aside" | "div" => value.classes().any(|c| c.contains("quote")),
        _ => false,
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD_PAGE: &str = r#"
        <html><body>
        <article class="message">
          <h4 class="message-name"><a class="username">alice</a></h4>
          <time datetime="2024-03-01T10:00:00Z">Mar 1, 2024</time>
          <article class="message-body js-selectToQuote" data-lb-id="post-101">
            <div class="bbWrapper">First post body.

Second paragraph.</div>
          </article>
        </article>
        <article class="message">
          <h4 class="message-name"><a class="username">bob</a></h4>
          <time datetime="2024-03-02T11:30:00Z">Mar 2, 2024</time>
          <article class="message-body js-selectToQuote" data-lb-id="post-102">
            <div class="bbWrapper">
              <blockquote class="bbCodeBlock--quote">alice said: something old</blockquote>
              Reply text only.
            </div>
          </article>
        </article>
        </body></html>
    "#;

    #[test]
    fn test_extract_posts_primary_strategy() {
        let posts = extract_posts(THREAD_PAGE, "https://forum.example.com/threads/t.1/");
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "101");
        assert_eq!(posts[0].author, "alice");
        assert_eq!(posts[0].timestamp, "2024-03-01T10:00:00Z");
        assert_eq!(posts[0].body_text, "First post body.\nSecond paragraph.");
        assert_eq!(
            posts[0].permalink,
            "https://forum.example.com/threads/t.1#post-101"
        );
    }

    #[test]
    fn test_posts_in_document_order_last_is_newest() {
        let posts = extract_posts(THREAD_PAGE, "https://forum.example.com/threads/t.1/");
        assert_eq!(posts.last().map(|p| p.id.as_str()), Some("102"));
    }

    #[test]
    fn test_quote_blocks_stripped_from_body() {
        let posts = extract_posts(THREAD_PAGE, "https://forum.example.com/threads/t.1/");
        assert_eq!(posts[1].body_text, "Reply text only.");
    }

    #[test]
    fn test_fallback_container_strategy() {
        let html = r#"
            <article data-post-id="201">
              <span class="username">carol</span>
              <div class="bbWrapper">Older markup version.</div>
            </article>
        "#;
        let posts = extract_posts(html, "https://forum.example.com/threads/t.2/");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "201");
        assert_eq!(posts[0].author, "carol");
    }

    #[test]
    fn test_identity_from_ancestor_article() {
        let html = r#"
            <article id="js-post-301" class="message">
              <article class="message-body js-selectToQuote">
                <div class="bbWrapper">No direct id on the body.</div>
              </article>
            </article>
        "#;
        let posts = extract_posts(html, "https://forum.example.com/threads/t.3/");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "301");
    }

    #[test]
    fn test_post_without_identity_has_empty_id() {
        let html = r#"
            <article class="message-body js-selectToQuote">
              <div class="bbWrapper">Anonymous container.</div>
            </article>
        "#;
        let posts = extract_posts(html, "https://forum.example.com/threads/t.4/");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "");
        assert_eq!(posts[0].author, "unknown");
    }

    #[test]
    fn test_one_of_three_without_identity_yields_two_diffable() {
        let html = r#"
            <article class="message-body js-selectToQuote" data-lb-id="post-1"><div class="bbWrapper">a</div></article>
            <article class="message-body js-selectToQuote"><div class="bbWrapper">b</div></article>
            <article class="message-body js-selectToQuote" data-lb-id="post-3"><div class="bbWrapper">c</div></article>
        "#;
        let posts = extract_posts(html, "https://forum.example.com/threads/t.9/");
        assert_eq!(posts.len(), 3);
        let diffable: Vec<_> = posts.iter().filter(|p| !p.id.is_empty()).collect();
        assert_eq!(diffable.len(), 2);
        assert_eq!(diffable[0].id, "1");
        assert_eq!(diffable[1].id, "3");
    }

    #[test]
    fn test_no_containers_yields_empty_list() {
        let posts = extract_posts("<html><body><p>nothing here</p>", "https://x.example/t.1/");
        assert!(posts.is_empty());

        let topics = extract_topics("<html><body>", "https://x.example/forums/f.1/");
        assert!(topics.is_empty());
    }

    #[test]
    fn test_body_falls_back_to_container_text() {
        let html = r#"
            <article class="message-body js-selectToQuote" data-lb-id="post-7">
              plain container text
            </article>
        "#;
        let posts = extract_posts(html, "https://forum.example.com/threads/t.5/");
        assert_eq!(posts[0].body_text, "plain container text");
    }

    const SECTION_PAGE: &str = r#"
        <html><body>
        <div class="structItem structItem--thread structItem--sticky js-threadListItem-54">
          <div class="structItem-title"><a href="/threads/pinned-rules.54/">Pinned rules</a></div>
          <a class="username">mod</a>
          <li class="structItem-startDate"><time datetime="2024-02-01T00:00:00Z">Feb 1</time></li>
        </div>
        <div class="structItem structItem--thread js-threadListItem-55">
          <div class="structItem-title"><a href="/threads/regular-topic.55/">Regular topic</a></div>
          <a class="username">dave</a>
          <li class="structItem-startDate"><time datetime="2024-01-01T00:00:00Z">Jan 1</time></li>
        </div>
        </body></html>
    "#;

    #[test]
    fn test_extract_topics() {
        let topics = extract_topics(SECTION_PAGE, "https://forum.example.com/forums/general.7/");
        assert_eq!(topics.len(), 2);

        assert_eq!(topics[0].id, 54);
        assert_eq!(topics[0].title, "Pinned rules");
        assert_eq!(topics[0].author, "mod");
        assert!(topics[0].pinned);
        assert_eq!(topics[0].created_at, "2024-02-01T00:00:00Z");
        assert_eq!(topics[0].url, "https://forum.example.com/threads/pinned-rules.54/");

        assert_eq!(topics[1].id, 55);
        assert!(!topics[1].pinned);
    }

    #[test]
    fn test_topic_id_from_href_when_class_missing() {
        let html = r#"
            <div class="structItem">
              <div class="structItem-title"><a href="/threads/no-class-id.77/">No class id</a></div>
            </div>
        "#;
        let topics = extract_topics(html, "https://forum.example.com/forums/general.7/");
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].id, 77);
    }

    #[test]
    fn test_topic_without_numeric_id_is_dropped() {
        let html = r#"
            <div class="structItem">
              <div class="structItem-title"><a href="/threads/no-id-here/">No id</a></div>
            </div>
        "#;
        let topics = extract_topics(html, "https://forum.example.com/forums/general.7/");
        assert!(topics.is_empty());
    }

    #[test]
    fn test_topics_deduplicated_by_id() {
        let html = r#"
            <div class="structItem js-threadListItem-90">
              <div class="structItem-title"><a href="/threads/dup.90/">First variant</a></div>
            </div>
            <div class="structItem js-threadListItem-90">
              <div class="structItem-title"><a href="/threads/dup.90/">Second variant</a></div>
            </div>
        "#;
        let topics = extract_topics(html, "https://forum.example.com/forums/general.7/");
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "First variant");
    }

    #[test]
    fn test_relative_href_resolved_against_section_url() {
        let html = r#"
            <div class="structItem js-threadListItem-12">
              <div class="structItem-title"><a href="/threads/rel.12/">Relative</a></div>
            </div>
        "#;
        // Host comes from the section URL, not a configured site root.
        let topics = extract_topics(html, "https://mirror.example.com/forum/forums/general.7/");
        assert_eq!(topics[0].url, "https://mirror.example.com/threads/rel.12/");
    }
}
