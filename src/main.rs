use clap::{Parser, Subcommand};
use newsdraft::{
    rate_limit, CloudflarePurger, ContentGenerator, ContentStore, DirectoryStore, FeedFetcher,
    PublicationPipeline, RateLimiter, Settings, TieredCache,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "newsdraft", about = "Rewrite the latest news into blog drafts")]
struct Cli {
    /// Settings file (TOML). Missing file means defaults.
    #[arg(long, default_value = "newsdraft.toml")]
    config: PathBuf,

    /// Directory for the durable cache tier.
    #[arg(long, default_value = ".newsdraft-cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline and store drafts locally.
    Run {
        /// Directory the generated posts are written into.
        #[arg(long, default_value = "posts")]
        out_dir: PathBuf,
    },
    /// Fetch and print the latest articles.
    Fetch,
    /// Preview a feed URL.
    FeedInfo { url: String },
    /// Check connectivity to the configured LLM provider.
    TestConnection,
    /// Clear both cache tiers and any configured edge caches.
    PurgeCache,
}

fn load_settings(path: &PathBuf) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("ignoring invalid settings file {}: {}", path.display(), e);
                Settings::default()
            }
        },
        Err(_) => {
            info!("no settings file at {}, using defaults", path.display());
            Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Arc::new(load_settings(&cli.config));

    let mut cache = TieredCache::with_file_tier(&cli.cache_dir)?;
    if let Some(purger) = CloudflarePurger::from_settings(&settings) {
        cache = cache.add_purger(Box::new(purger));
    }
    let cache = Arc::new(cache);

    match cli.command {
        Command::Run { out_dir } => {
            let fetcher = FeedFetcher::new(settings.clone(), cache.clone());
            let generator = ContentGenerator::new(settings.clone());
            let store: Arc<dyn ContentStore> = Arc::new(DirectoryStore::new(out_dir)?);
            let pipeline = PublicationPipeline::new(
                fetcher,
                generator,
                store,
                RateLimiter::new(cache.clone()),
            );

            let identifier = rate_limit::client_identifier(None, &HashMap::new());
            let response = match pipeline.run(&identifier).await {
                Ok(summary) => serde_json::json!({
                    "success": true,
                    "message": summary.message,
                    "posts": summary.posts,
                }),
                Err(e) => serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Fetch => {
            let fetcher = FeedFetcher::new(settings.clone(), cache.clone());
            let articles = fetcher.fetch_latest().await?;
            if articles.is_empty() {
                println!("no articles found");
            }
            for article in articles {
                println!(
                    "{}  {}  ({})",
                    article.published_at.format("%Y-%m-%d %H:%M"),
                    article.title,
                    article.source_domain
                );
            }
        }
        Command::FeedInfo { url } => {
            let fetcher = FeedFetcher::new(settings.clone(), cache.clone());
            let feed_info = fetcher.fetch_feed_info(&url).await?;
            println!("{}", serde_json::to_string_pretty(&feed_info)?);
        }
        Command::TestConnection => {
            let generator = ContentGenerator::new(settings.clone());
            let result = generator.test_connection().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::PurgeCache => {
            cache.purge_all().await;
            println!("cache purged");
        }
    }

    Ok(())
}
