use async_trait::async_trait;
use newsdraft::fetcher::{parse_feed_content, LATEST_NEWS_KEY};
use newsdraft::pipeline::{GENERATE_ACTION, GENERATE_LIMIT, GENERATE_WINDOW_SECS};
use newsdraft::types::{Article, PosterError, Result};
use newsdraft::{
    ContentGenerator, ContentStore, FeedFetcher, GenerationBackend, MemoryStore,
    PublicationPipeline, RateLimiter, Settings, TieredCache,
};
use std::sync::Arc;

const FEED_URL: &str = "https://news.example.com/feed";

const SINGLE_ITEM_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <item>
      <title>Original headline</title>
      <link>https://news.example.com/original</link>
      <description>Something happened somewhere today.</description>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

struct StubBackend {
    reply: &'static str,
}

#[async_trait]
impl GenerationBackend for StubBackend {
    fn backend_name(&self) -> &'static str {
        "stub"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.reply.to_string())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

fn settings_with_key() -> Arc<Settings> {
    Arc::new(Settings {
        api_key: Some("sk-test".to_string()),
        feed_urls: vec![FEED_URL.to_string()],
        ..Settings::default()
    })
}

/// Seeds the shared cache with a parsed feed result so no network is touched.
async fn seed_articles(cache: &TieredCache, articles: &[Article]) {
    cache.set_json(LATEST_NEWS_KEY, &articles, 1800).await;
}

struct TestHarness {
    cache: Arc<TieredCache>,
    store: Arc<MemoryStore>,
    pipeline: PublicationPipeline,
}

fn build_pipeline(
    settings: Arc<Settings>,
    backend: Option<Box<dyn GenerationBackend>>,
) -> TestHarness {
    let cache = Arc::new(TieredCache::in_memory());
    let store = Arc::new(MemoryStore::new());
    let fetcher = FeedFetcher::new(settings.clone(), cache.clone());
    let generator = match backend {
        Some(backend) => ContentGenerator::with_backend(settings, backend),
        None => ContentGenerator::new(settings),
    };
    let pipeline = PublicationPipeline::new(
        fetcher,
        generator,
        store.clone() as Arc<dyn ContentStore>,
        RateLimiter::new(cache.clone()),
    );
    TestHarness {
        cache,
        store,
        pipeline,
    }
}

#[tokio::test]
async fn end_to_end_publishes_the_generated_title() {
    init_tracing();

    let harness = build_pipeline(
        settings_with_key(),
        Some(Box::new(StubBackend {
            reply: r#"{"title": "T", "content": "C"}"#,
        })),
    );

    let articles = parse_feed_content(SINGLE_ITEM_RSS, FEED_URL).unwrap();
    assert_eq!(articles.len(), 1);
    seed_articles(&harness.cache, &articles).await;

    let summary = harness.pipeline.run("user_1").await.unwrap();
    assert_eq!(summary.posts.len(), 1);
    assert_eq!(summary.posts[0].title, "T");
    assert_eq!(summary.posts[0].id, 1);
    assert_eq!(summary.message, "1 posts generated successfully!");

    let stored = harness.store.posts().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "T");
    assert_eq!(stored[0].body, "C");
    assert_eq!(stored[0].source_url, "https://news.example.com/original");
}

#[tokio::test]
async fn empty_feed_result_reports_no_articles() {
    init_tracing();

    let harness = build_pipeline(
        settings_with_key(),
        Some(Box::new(StubBackend {
            reply: r#"{"title": "T", "content": "C"}"#,
        })),
    );
    seed_articles(&harness.cache, &[]).await;

    let err = harness.pipeline.run("user_1").await.unwrap_err();
    assert!(matches!(err, PosterError::NoArticles));
    assert!(harness.store.posts().await.is_empty());
}

#[tokio::test]
async fn a_caller_at_the_ceiling_is_rejected_before_fetching() {
    init_tracing();

    let harness = build_pipeline(
        settings_with_key(),
        Some(Box::new(StubBackend {
            reply: r#"{"title": "T", "content": "C"}"#,
        })),
    );
    // Do not seed the cache: if the pipeline reached the fetcher it would
    // try the configured feed. The rate check must answer first.
    let limiter = RateLimiter::new(harness.cache.clone());
    for _ in 0..GENERATE_LIMIT {
        limiter
            .record_attempt(GENERATE_ACTION, GENERATE_WINDOW_SECS, "user_1")
            .await;
    }

    let err = harness.pipeline.run("user_1").await.unwrap_err();
    assert!(matches!(err, PosterError::RateLimited { .. }));
    // A rejected run consumes no quota.
    assert_eq!(
        limiter.current_attempts(GENERATE_ACTION, "user_1").await,
        GENERATE_LIMIT
    );
}

#[tokio::test]
async fn each_run_consumes_quota_even_when_it_fails() {
    init_tracing();

    let harness = build_pipeline(
        settings_with_key(),
        Some(Box::new(StubBackend {
            reply: r#"{"title": "T", "content": "C"}"#,
        })),
    );
    seed_articles(&harness.cache, &[]).await;

    let limiter = RateLimiter::new(harness.cache.clone());
    assert!(harness.pipeline.run("user_1").await.is_err());
    assert_eq!(limiter.current_attempts(GENERATE_ACTION, "user_1").await, 1);
}

#[tokio::test]
async fn batch_is_capped_at_five_articles() {
    init_tracing();

    let harness = build_pipeline(
        settings_with_key(),
        Some(Box::new(StubBackend {
            reply: r#"{"title": "T", "content": "C"}"#,
        })),
    );

    let mut feed = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>"#);
    for i in 0..8 {
        feed.push_str(&format!(
            "<item><title>Story {i}</title><link>https://news.example.com/{i}</link>\
             <pubDate>Tue, 02 Jan 2024 10:0{i}:00 GMT</pubDate></item>"
        ));
    }
    feed.push_str("</channel></rss>");

    let articles = parse_feed_content(&feed, FEED_URL).unwrap();
    assert_eq!(articles.len(), 8);
    seed_articles(&harness.cache, &articles).await;

    let summary = harness.pipeline.run("user_1").await.unwrap();
    assert_eq!(summary.posts.len(), 5);
    assert_eq!(harness.store.posts().await.len(), 5);
}

#[tokio::test]
async fn store_failures_produce_an_empty_batch_error() {
    init_tracing();

    let settings = settings_with_key();
    let cache = Arc::new(TieredCache::in_memory());
    let store = Arc::new(MemoryStore::failing());
    let fetcher = FeedFetcher::new(settings.clone(), cache.clone());
    let generator = ContentGenerator::with_backend(
        settings,
        Box::new(StubBackend {
            reply: r#"{"title": "T", "content": "C"}"#,
        }),
    );
    let pipeline = PublicationPipeline::new(
        fetcher,
        generator,
        store.clone() as Arc<dyn ContentStore>,
        RateLimiter::new(cache.clone()),
    );

    let articles = parse_feed_content(SINGLE_ITEM_RSS, FEED_URL).unwrap();
    cache.set_json(LATEST_NEWS_KEY, &articles, 1800).await;

    let err = pipeline.run("user_1").await.unwrap_err();
    assert!(matches!(err, PosterError::EmptyBatch));
}

#[tokio::test]
async fn generation_without_a_credential_produces_an_empty_batch_error() {
    init_tracing();

    let settings = Arc::new(Settings {
        feed_urls: vec![FEED_URL.to_string()],
        ..Settings::default()
    });
    let harness = build_pipeline(settings, None);

    let articles = parse_feed_content(SINGLE_ITEM_RSS, FEED_URL).unwrap();
    seed_articles(&harness.cache, &articles).await;

    let err = harness.pipeline.run("user_1").await.unwrap_err();
    assert!(matches!(err, PosterError::EmptyBatch));
}

#[tokio::test]
async fn cached_feed_result_is_returned_unchanged() {
    init_tracing();

    let settings = settings_with_key();
    let cache = Arc::new(TieredCache::in_memory());
    let fetcher = FeedFetcher::new(settings, cache.clone());

    let articles = parse_feed_content(SINGLE_ITEM_RSS, FEED_URL).unwrap();
    cache.set_json(LATEST_NEWS_KEY, &articles, 1800).await;

    let fetched = fetcher.fetch_latest().await.unwrap();
    assert_eq!(fetched, articles);
}
