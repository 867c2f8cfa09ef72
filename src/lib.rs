pub mod cache;
pub mod config;
pub mod fetcher;
pub mod generator;
pub mod pipeline;
pub mod rate_limit;
pub mod safety;
pub mod store;
pub mod types;

pub use cache::{CacheTier, CloudflarePurger, EdgePurger, FileTier, MemoryTier, TieredCache};
pub use config::{Provider, Settings, Tone, WordCount};
pub use fetcher::FeedFetcher;
pub use generator::{ContentGenerator, GenerationBackend};
pub use pipeline::PublicationPipeline;
pub use rate_limit::RateLimiter;
pub use safety::ResponseValidator;
pub use store::{ContentStore, DirectoryStore, MemoryStore};
pub use types::*;
