use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::cache::TieredCache;
use crate::config::Settings;
use crate::safety::strip_tags;
use crate::types::{Article, FeedInfo, PosterError, Result};

/// Cache key for the merged feed result.
pub const LATEST_NEWS_KEY: &str = "latest_news";
/// The feed result is cached for 30 minutes, overriding the cache default.
pub const FEED_CACHE_TTL_SECS: u64 = 1800;
/// The merged result never exceeds this many articles.
pub const MAX_ARTICLES: usize = 10;

const DESCRIPTION_LIMIT: usize = 500;
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Retrieves and normalizes articles from the configured RSS/Atom feeds.
///
/// Feeds are fetched independently; one bad feed is logged and skipped, never
/// fatal to the batch.
pub struct FeedFetcher {
    client: Client,
    settings: Arc<Settings>,
    cache: Arc<TieredCache>,
}

impl FeedFetcher {
    pub fn new(settings: Arc<Settings>, cache: Arc<TieredCache>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("newsdraft/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            settings,
            cache,
        }
    }

    /// Newest-first articles across all configured feeds, at most
    /// [`MAX_ARTICLES`]. A cached result is returned unchanged; a fresh
    /// result (even an empty one) is cached before returning.
    pub async fn fetch_latest(&self) -> Result<Vec<Article>> {
        if let Some(cached) = self.cache.get_json::<Vec<Article>>(LATEST_NEWS_KEY).await {
            debug!("returning {} cached articles", cached.len());
            return Ok(cached);
        }

        let feeds = self.settings.feed_urls_or_default();
        let mut articles = Vec::new();
        for feed_url in &feeds {
            match self.fetch_from_feed(feed_url).await {
                Ok(mut batch) => {
                    info!("fetched {} articles from {}", batch.len(), feed_url);
                    articles.append(&mut batch);
                }
                Err(e) => warn!("skipping feed {}: {}", feed_url, e),
            }
        }

        let articles = rank_articles(articles);
        self.cache
            .set_json(LATEST_NEWS_KEY, &articles, FEED_CACHE_TTL_SECS)
            .await;
        Ok(articles)
    }

    async fn fetch_from_feed(&self, feed_url: &str) -> Result<Vec<Article>> {
        validate_feed_url(feed_url)?;
        let body = self.fetch_body(feed_url).await?;
        if body.trim().is_empty() {
            return Err(PosterError::Parse(format!("empty response from {feed_url}")));
        }
        parse_feed_content(&body, feed_url)
    }

    /// Fetches a URL body, retrying transient transport failures a couple of
    /// times before giving up on the feed.
    async fn fetch_body(&self, url: &str) -> Result<String> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        loop {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        return Err(PosterError::General(format!("HTTP {status} from {url}")));
                    }
                    return Ok(response.text().await?);
                }
                Err(e) if e.is_timeout() || e.is_connect() => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!("transient failure fetching {url}, retrying in {delay:?}: {e}");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Feed preview for URL validation, independent of the cache and the main
    /// fetch path.
    pub async fn fetch_feed_info(&self, url: &str) -> Result<FeedInfo> {
        validate_feed_url(url)?;
        let body = self.fetch_body(url).await?;
        let feed = feed_rs::parser::parse(body.as_bytes())
            .map_err(|e| PosterError::Parse(format!("invalid XML format: {e}")))?;
        Ok(FeedInfo {
            title: feed.title.map(|t| t.content).unwrap_or_default(),
            description: feed.description.map(|d| d.content).unwrap_or_default(),
            item_count: feed.entries.len(),
        })
    }

    /// True iff `url` is well-formed and currently serves a parseable feed.
    pub async fn verify_feed(&self, url: &str) -> bool {
        self.fetch_feed_info(url).await.is_ok()
    }
}

/// Rejects malformed URLs and loopback/link-local hosts before any network
/// call is made.
pub fn validate_feed_url(feed_url: &str) -> Result<()> {
    let parsed = Url::parse(feed_url)?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PosterError::BlockedHost(format!(
                "unsupported scheme {other} in {feed_url}"
            )))
        }
    }
    let blocked = match parsed.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => addr.is_loopback() || addr.is_link_local(),
        Some(Host::Ipv6(addr)) => addr.is_loopback() || (addr.segments()[0] & 0xffc0) == 0xfe80,
        None => true,
    };
    if blocked {
        return Err(PosterError::BlockedHost(feed_url.to_string()));
    }
    Ok(())
}

/// Parses a feed document (RSS 2.0 or Atom) into articles. Entries missing a
/// non-empty title or a resolvable link are dropped silently.
pub fn parse_feed_content(content: &str, feed_url: &str) -> Result<Vec<Article>> {
    let feed = feed_rs::parser::parse(content.as_bytes())
        .map_err(|e| PosterError::Parse(format!("failed to parse {feed_url}: {e}")))?;
    let fetched_at = Utc::now();
    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| article_from_entry(entry, feed_url, fetched_at))
        .collect();
    Ok(articles)
}

/// Stable newest-first ordering, truncated to [`MAX_ARTICLES`]. Ties keep
/// their input order.
pub fn rank_articles(mut articles: Vec<Article>) -> Vec<Article> {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles.truncate(MAX_ARTICLES);
    articles
}

fn article_from_entry(entry: Entry, feed_url: &str, fetched_at: DateTime<Utc>) -> Option<Article> {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())?;
    let link = select_link(&entry.links)?;
    let source_domain = Url::parse(&link).ok()?.host_str()?.to_string();

    let raw_description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();
    let description = clean_description(&raw_description);

    let published_at = entry.published.or(entry.updated).unwrap_or(fetched_at);

    Some(Article {
        title,
        link,
        description,
        published_at,
        source_feed: feed_url.to_string(),
        source_domain,
    })
}

/// Atom entries may carry several links; prefer the HTML alternate, then fall
/// back to the entry's primary link. RSS items carry exactly one.
fn select_link(links: &[Link]) -> Option<String> {
    let html_alternate = links
        .iter()
        .find(|l| l.media_type.as_deref() == Some("text/html"));
    let link = html_alternate.or_else(|| links.first())?;
    if link.href.trim().is_empty() {
        return None;
    }
    Some(link.href.clone())
}

fn clean_description(raw: &str) -> String {
    let text = strip_tags(raw);
    if text.chars().count() > DESCRIPTION_LIMIT {
        let truncated: String = text.chars().take(DESCRIPTION_LIMIT).collect();
        format!("{truncated}...")
    } else {
        text
    }
}
