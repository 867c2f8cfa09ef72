use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Provider, Settings};
use crate::safety::{sanitize_rich_text, sanitize_title, ResponseValidator};
use crate::types::{Article, ConnectionTest, Draft, PosterError, Result};

const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: u32 = 2000;

/// Uniform request/response contract over the interchangeable LLM providers.
/// Each backend issues one bounded network request and maps the provider's
/// response shape to a raw text payload.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

fn backend_client() -> Client {
    Client::builder()
        .timeout(GENERATION_TIMEOUT)
        .build()
        .expect("failed to create HTTP client")
}

/// Pulls a string out of a provider response by JSON pointer, mapping a
/// missing path to a parse error.
fn extract_text(payload: &Value, pointer: &str, backend: &str) -> Result<String> {
    payload
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PosterError::Parse(format!("unexpected {backend} response shape")))
}

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            client: backend_client(),
            api_key,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn backend_name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": "gpt-3.5-turbo",
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": MAX_TOKENS,
            "temperature": 0.7,
        });
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PosterError::General(format!(
                "OpenAI API returned HTTP {}",
                response.status()
            )));
        }
        let payload: Value = response.json().await?;
        extract_text(&payload, "/choices/0/message/content", self.backend_name())
    }
}

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            client: backend_client(),
            api_key,
        }
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn backend_name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": "claude-3-sonnet-20240229",
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PosterError::General(format!(
                "Anthropic API returned HTTP {}",
                response.status()
            )));
        }
        let payload: Value = response.json().await?;
        extract_text(&payload, "/content/0/text", self.backend_name())
    }
}

/// OpenAI-shaped requests routed through openrouter.ai.
pub struct OpenRouterBackend {
    client: Client,
    api_key: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            client: backend_client(),
            api_key,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenRouterBackend {
    fn backend_name(&self) -> &'static str {
        "openrouter"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": "openai/gpt-3.5-turbo",
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": MAX_TOKENS,
            "temperature": 0.7,
        });
        let response = self
            .client
            .post("https://openrouter.ai/api/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PosterError::General(format!(
                "OpenRouter API returned HTTP {}",
                response.status()
            )));
        }
        let payload: Value = response.json().await?;
        extract_text(&payload, "/choices/0/message/content", self.backend_name())
    }
}

#[derive(Deserialize)]
struct GeneratedPayload {
    title: String,
    content: String,
}

/// Turns an [`Article`] into a unique [`Draft`] through the configured
/// backend, degrading to deterministic fallback content when generation is
/// impossible. Never fails the batch: the only absent outcomes are a missing
/// credential and a response the validator refuses to trust.
pub struct ContentGenerator {
    settings: Arc<Settings>,
    validator: ResponseValidator,
    backend: Option<Box<dyn GenerationBackend>>,
}

impl ContentGenerator {
    pub fn new(settings: Arc<Settings>) -> Self {
        let api_key = settings.api_key.clone().unwrap_or_default();
        let backend: Option<Box<dyn GenerationBackend>> = match settings.provider {
            Provider::OpenAi => Some(Box::new(OpenAiBackend::new(api_key))),
            Provider::Anthropic => Some(Box::new(AnthropicBackend::new(api_key))),
            Provider::OpenRouter => Some(Box::new(OpenRouterBackend::new(api_key))),
            // The custom provider is a deterministic stub with no network
            // call; it demonstrates the generator's no-failure floor.
            Provider::Custom => None,
        };
        Self {
            settings,
            validator: ResponseValidator::new(),
            backend,
        }
    }

    /// Same generator with an injected backend, bypassing provider selection.
    pub fn with_backend(settings: Arc<Settings>, backend: Box<dyn GenerationBackend>) -> Self {
        Self {
            settings,
            validator: ResponseValidator::new(),
            backend: Some(backend),
        }
    }

    /// Produces a draft for `article`, or `None` when generation is
    /// impossible (no credential) or untrustworthy (unsafe response).
    pub async fn generate(&self, article: &Article) -> Option<Draft> {
        if !self.settings.has_credential() {
            error!("{}", PosterError::MissingCredential);
            return None;
        }

        let Some(backend) = &self.backend else {
            debug!("custom provider selected, emitting fallback draft");
            return Some(fallback_draft(article));
        };

        let prompt = self.build_prompt(article);
        match backend.complete(&prompt).await {
            Ok(raw) => self.parse_response(&raw, article),
            Err(e) => {
                warn!(
                    "{} generation failed for {}, using fallback content: {}",
                    backend.backend_name(),
                    article.link,
                    e
                );
                Some(fallback_draft(article))
            }
        }
    }

    fn build_prompt(&self, article: &Article) -> String {
        let word_range = self.settings.word_count.range();
        let tone = self.settings.tone.description();
        format!(
            "You are a professional content writer. Your task is to rewrite the following news article into a unique, engaging blog post.\n\n\
             ORIGINAL ARTICLE:\n\
             Title: {title}\n\
             Summary: {description}\n\
             Source: {domain}\n\n\
             REQUIREMENTS:\n\
             - Write a {word_range} word blog post\n\
             - Use a {tone} tone\n\
             - Create an engaging, SEO-friendly title\n\
             - Include a compelling introduction\n\
             - Provide detailed analysis and context\n\
             - Add a thoughtful conclusion\n\
             - Do NOT copy text directly from the original\n\
             - Make the content unique and valuable\n\
             - Use proper paragraph structure\n\n\
             Please provide your response in the following JSON format:\n\
             {{\n  \"title\": \"Your generated title here\",\n  \"content\": \"Your full blog post content here\"\n}}",
            title = article.title,
            description = article.description,
            domain = article.source_domain,
        )
    }

    /// Raw completion text to draft: safety check, strict JSON, line-oriented
    /// heuristics, fallback content, in that order.
    fn parse_response(&self, raw: &str, article: &Article) -> Option<Draft> {
        if !self.validator.is_safe(raw) {
            error!("{} (source: {})", PosterError::UnsafeContent, article.link);
            return None;
        }

        if let Ok(payload) = serde_json::from_str::<GeneratedPayload>(raw) {
            return Some(self.draft_from(payload.title, payload.content, article));
        }

        let (title, content) = extract_title_and_content(raw);
        if title.is_empty() || content.is_empty() {
            debug!("could not recover title/content, using fallback draft");
            return Some(fallback_draft(article));
        }
        Some(self.draft_from(title, content, article))
    }

    fn draft_from(&self, title: String, body: String, article: &Article) -> Draft {
        Draft {
            title: sanitize_title(&title),
            body: sanitize_rich_text(body.trim()),
            source_url: article.link.clone(),
            source_domain: article.source_domain.clone(),
        }
    }

    /// One real generation call against a synthetic article, reporting
    /// success or failure without side effects.
    pub async fn test_connection(&self) -> ConnectionTest {
        if !self.settings.has_credential() {
            return ConnectionTest {
                success: false,
                message: "API key not configured".to_string(),
            };
        }

        let probe = Article {
            title: "Test Article".to_string(),
            link: "https://example.com".to_string(),
            description: "This is a test article for API connection.".to_string(),
            published_at: Utc::now(),
            source_feed: "https://example.com/feed".to_string(),
            source_domain: "example.com".to_string(),
        };

        match self.generate(&probe).await {
            Some(_) => {
                info!("provider connection test succeeded");
                ConnectionTest {
                    success: true,
                    message: "API connection successful".to_string(),
                }
            }
            None => ConnectionTest {
                success: false,
                message: "API connection failed".to_string(),
            },
        }
    }
}

/// Deterministic draft used when generation is impossible or unusable,
/// composed from the article's own title, description, and link.
pub fn fallback_draft(article: &Article) -> Draft {
    let body = format!(
        "<p>In recent news, {title} has been making headlines.</p>\n\n\
         <p>{description}</p>\n\n\
         <p>This developing story continues to unfold, and we will provide updates as more information becomes available.</p>\n\n\
         <p>For more details, you can read the original article at <a href=\"{link}\">{domain}</a>.</p>",
        title = article.title,
        description = article.description,
        link = article.link,
        domain = article.source_domain,
    );
    Draft {
        title: format!("Breaking: {}", article.title),
        body,
        source_url: article.link.clone(),
        source_domain: article.source_domain.clone(),
    }
}

/// Line-oriented recovery for completions that are not valid JSON. A
/// `title:`/`headline:` label wins; otherwise the first short non-empty line
/// is taken as the title. Heuristic, not guaranteed: a short opening
/// paragraph can be mistaken for a title.
fn extract_title_and_content(raw: &str) -> (String, String) {
    let label = Regex::new(r"(?i)^(?:title|headline):\s*(.+)$").expect("static regex");
    let mut title = String::new();
    let mut content_lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = label.captures(line) {
            title = caps[1].trim().to_string();
        } else if title.is_empty() && line.chars().count() < 100 {
            title = line.to_string();
        } else {
            content_lines.push(line);
        }
    }

    (title, content_lines.join("\n\n"))
}
