use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fetcher::FeedFetcher;
use crate::generator::ContentGenerator;
use crate::rate_limit::RateLimiter;
use crate::store::ContentStore;
use crate::types::{GenerationSummary, PosterError, PublishedPost, Result};

/// Rate-limit action recorded per pipeline invocation.
pub const GENERATE_ACTION: &str = "generate_posts";
/// Invocations allowed per caller per window.
pub const GENERATE_LIMIT: u32 = 3;
pub const GENERATE_WINDOW_SECS: u64 = 3600;
/// Free-tier batch ceiling: articles processed per invocation.
pub const MAX_POSTS_PER_BATCH: usize = 5;

/// Orchestrates fetch -> generate -> publish for one invocation.
///
/// Runs synchronously and sequentially; per-article failures are skipped, and
/// only batch-level conditions (rate limit, nothing fetched, nothing
/// published) surface to the caller.
pub struct PublicationPipeline {
    fetcher: FeedFetcher,
    generator: ContentGenerator,
    store: Arc<dyn ContentStore>,
    rate_limiter: RateLimiter,
}

impl PublicationPipeline {
    pub fn new(
        fetcher: FeedFetcher,
        generator: ContentGenerator,
        store: Arc<dyn ContentStore>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            fetcher,
            generator,
            store,
            rate_limiter,
        }
    }

    pub async fn run(&self, identifier: &str) -> Result<GenerationSummary> {
        let run_id = Uuid::new_v4();

        if self
            .rate_limiter
            .is_limited(GENERATE_ACTION, GENERATE_LIMIT, identifier)
            .await
        {
            warn!("run {run_id} rejected: {identifier} is at the rate ceiling");
            return Err(PosterError::RateLimited {
                window_secs: GENERATE_WINDOW_SECS,
            });
        }
        // The attempt is recorded before any work, so a failed run still
        // consumes quota.
        self.rate_limiter
            .record_attempt(GENERATE_ACTION, GENERATE_WINDOW_SECS, identifier)
            .await;

        let articles = self.fetcher.fetch_latest().await?;
        if articles.is_empty() {
            return Err(PosterError::NoArticles);
        }

        let batch = &articles[..articles.len().min(MAX_POSTS_PER_BATCH)];
        info!("run {run_id}: processing {} of {} articles", batch.len(), articles.len());

        let mut posts = Vec::new();
        for article in batch {
            let Some(draft) = self.generator.generate(article).await else {
                warn!("run {run_id}: no draft for {}, skipping", article.link);
                continue;
            };
            match self.store.create_post(&draft).await {
                Ok(id) => posts.push(PublishedPost {
                    id,
                    title: draft.title,
                    edit_link: self.store.edit_reference(id),
                }),
                Err(e) => warn!("run {run_id}: failed to store draft for {}: {}", article.link, e),
            }
        }

        if posts.is_empty() {
            return Err(PosterError::EmptyBatch);
        }

        info!("run {run_id}: published {} posts", posts.len());
        Ok(GenerationSummary {
            run_id,
            message: format!("{} posts generated successfully!", posts.len()),
            posts,
        })
    }
}
