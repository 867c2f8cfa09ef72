use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

use crate::types::PosterError;

/// Feeds used when the configured list is empty.
pub const DEFAULT_FEEDS: [&str; 3] = [
    "https://feeds.bbci.co.uk/news/rss.xml",
    "https://rss.cnn.com/rss/edition.rss",
    "https://feeds.reuters.com/reuters/topNews",
];

/// LLM backend selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    OpenRouter,
    Custom,
}

impl FromStr for Provider {
    type Err = PosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "openrouter" => Ok(Provider::OpenRouter),
            "custom" => Ok(Provider::Custom),
            other => Err(PosterError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
            Provider::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Word-count band for generated posts. Unknown values fall back to `Medium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WordCount {
    Short,
    #[default]
    Medium,
    Long,
}

impl WordCount {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "short" => WordCount::Short,
            "long" => WordCount::Long,
            _ => WordCount::Medium,
        }
    }

    /// Word range handed to the prompt builder.
    pub fn range(&self) -> &'static str {
        match self {
            WordCount::Short => "300-400",
            WordCount::Medium => "500-600",
            WordCount::Long => "800-1000",
        }
    }
}

/// Tone descriptor for generated posts. Unknown values fall back to `Neutral`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tone {
    #[default]
    Neutral,
    Professional,
    Friendly,
}

impl Tone {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "professional" => Tone::Professional,
            "friendly" => Tone::Friendly,
            _ => Tone::Neutral,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tone::Neutral => "neutral and informative",
            Tone::Professional => "professional and authoritative",
            Tone::Friendly => "friendly and conversational",
        }
    }
}

fn de_word_count<'de, D: Deserializer<'de>>(d: D) -> Result<WordCount, D::Error> {
    Ok(WordCount::parse(&String::deserialize(d)?))
}

fn de_tone<'de, D: Deserializer<'de>>(d: D) -> Result<Tone, D::Error> {
    Ok(Tone::parse(&String::deserialize(d)?))
}

/// Immutable configuration snapshot.
///
/// Components receive an `Arc<Settings>` at construction and never re-read
/// global state mid-operation. The API key arrives already decrypted; storage
/// and encryption of credentials belong to the hosting layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub categories: Vec<String>,
    #[serde(deserialize_with = "de_word_count")]
    pub word_count: WordCount,
    #[serde(deserialize_with = "de_tone")]
    pub tone: Tone,
    pub feed_urls: Vec<String>,
    pub cloudflare_zone_id: Option<String>,
    pub cloudflare_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            api_key: None,
            categories: Vec::new(),
            word_count: WordCount::Medium,
            tone: Tone::Neutral,
            feed_urls: Vec::new(),
            cloudflare_zone_id: None,
            cloudflare_api_key: None,
        }
    }
}

impl Settings {
    /// Configured feed list, or the hardcoded defaults when empty.
    pub fn feed_urls_or_default(&self) -> Vec<String> {
        if self.feed_urls.is_empty() {
            DEFAULT_FEEDS.iter().map(|f| f.to_string()).collect()
        } else {
            self.feed_urls.clone()
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}
