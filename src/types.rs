use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical ingested news item.
///
/// Built once per feed entry and immutable afterwards. Lives only for the
/// duration of a pipeline run, except as part of the cached feed-result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    /// Plain text, HTML stripped, truncated to 500 characters.
    pub description: String,
    /// Falls back to fetch time when the source date is missing or unparseable.
    pub published_at: DateTime<Utc>,
    /// The feed this item came from.
    pub source_feed: String,
    /// Host component of `link`.
    pub source_domain: String,
}

/// AI-rewritten article ready for publication. Produced by the generator from
/// exactly one [`Article`] and handed to the content store exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    /// Rich text, reduced to the safe-markup subset.
    pub body: String,
    pub source_url: String,
    pub source_domain: String,
}

/// One successfully stored draft, as reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: u64,
    pub title: String,
    pub edit_link: String,
}

/// Success summary of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub run_id: Uuid,
    pub message: String,
    pub posts: Vec<PublishedPost>,
}

/// Result of the feed-preview operation, used for feed URL validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedInfo {
    pub title: String,
    pub description: String,
    pub item_count: usize,
}

/// Outcome of a provider diagnostics call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Blocked host: {0}")]
    BlockedHost(String),

    #[error("API key not configured")]
    MissingCredential,

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Suspicious content detected in provider response")]
    UnsafeContent,

    #[error("Rate limit exceeded. Please wait before generating more posts.")]
    RateLimited { window_secs: u64 },

    #[error("No articles found")]
    NoArticles,

    #[error("Failed to generate posts")]
    EmptyBatch,

    #[error("Content store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PosterError>;
