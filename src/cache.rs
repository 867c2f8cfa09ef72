use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{PosterError, Result};

/// Default TTL for cache entries. The feed-result entry overrides this.
pub const DEFAULT_TTL_SECS: u64 = 3600;

const KEY_PREFIX: &str = "nd_";

/// A cached JSON value together with its expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Value, ttl_secs: u64) -> Self {
        Self {
            value,
            expires_at: Utc::now() + Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// One backing store in the tier list. Tier failures are absorbed and logged;
/// a broken tier behaves like an empty one.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn tier_name(&self) -> &'static str;

    /// Returns the unexpired entry for `key`, if any.
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: &str, entry: CacheEntry);

    async fn delete(&self, key: &str);

    /// Removes every entry held by this tier.
    async fn clear(&self);
}

/// Fast in-process tier. Entries do not survive the process.
#[derive(Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn tier_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.entries.write().await.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Durable tier of record: one JSON file per namespaced key under `root`.
/// Corrupt or expired files read as a miss and are removed.
pub struct FileTier {
    root: PathBuf,
}

impl FileTier {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl CacheTier for FileTier {
    fn tier_name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired() => Some(entry),
            Ok(_) => {
                let _ = std::fs::remove_file(&path);
                None
            }
            Err(e) => {
                warn!("discarding corrupt cache file {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        let path = self.entry_path(key);
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&path, raw) {
                    warn!("failed to write cache file {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("failed to serialize cache entry for {key}: {e}"),
        }
    }

    async fn delete(&self, key: &str) {
        let _ = std::fs::remove_file(self.entry_path(key));
    }

    async fn clear(&self) {
        let Ok(dir) = std::fs::read_dir(&self.root) else {
            return;
        };
        for file in dir.flatten() {
            let path = file.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Third-party edge cache that can be asked to drop everything. Purging is
/// best-effort: failures are logged by the caller, never raised.
#[async_trait]
pub trait EdgePurger: Send + Sync {
    fn purger_name(&self) -> &'static str;

    async fn purge(&self) -> Result<()>;
}

/// Cloudflare zone purge via the v4 API.
pub struct CloudflarePurger {
    client: Client,
    zone_id: String,
    api_key: String,
}

impl CloudflarePurger {
    /// Returns `None` unless both credentials are present and the zone id has
    /// the expected 32-hex-digit shape.
    pub fn from_settings(settings: &crate::config::Settings) -> Option<Self> {
        let zone_id = settings.cloudflare_zone_id.clone()?;
        let api_key = settings.cloudflare_api_key.clone()?;
        let zone_format = Regex::new("^[a-f0-9]{32}$").expect("static regex");
        if !zone_format.is_match(&zone_id.to_ascii_lowercase()) {
            warn!("ignoring malformed Cloudflare zone id");
            return None;
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        Some(Self { client, zone_id, api_key })
    }
}

#[async_trait]
impl EdgePurger for CloudflarePurger {
    fn purger_name(&self) -> &'static str {
        "cloudflare"
    }

    async fn purge(&self) -> Result<()> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/zones/{}/purge_cache",
            self.zone_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "purge_everything": true }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PosterError::General(format!(
                "Cloudflare purge failed with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Composite cache over an ordered tier list.
///
/// `get` answers from the first tier holding an unexpired entry; `set` and
/// `delete` hit every tier, so the durable tier always ends up consistent.
/// Call sites never see the individual tiers.
pub struct TieredCache {
    tiers: Vec<Box<dyn CacheTier>>,
    purgers: Vec<Box<dyn EdgePurger>>,
}

impl TieredCache {
    pub fn new(tiers: Vec<Box<dyn CacheTier>>) -> Self {
        Self {
            tiers,
            purgers: Vec::new(),
        }
    }

    /// In-memory-only cache, used by tests and short-lived invocations.
    pub fn in_memory() -> Self {
        Self::new(vec![Box::new(MemoryTier::new())])
    }

    /// Memory tier backed by a durable file tier under `root`.
    pub fn with_file_tier(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(MemoryTier::new()),
            Box::new(FileTier::new(root.as_ref())?),
        ]))
    }

    pub fn add_purger(mut self, purger: Box<dyn EdgePurger>) -> Self {
        self.purgers.push(purger);
        self
    }

    /// Namespaces a caller-supplied key so it cannot collide with unrelated
    /// cached data.
    pub fn namespaced_key(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
        format!("{KEY_PREFIX}{hex}")
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let namespaced = Self::namespaced_key(key);
        for tier in &self.tiers {
            if let Some(entry) = tier.get(&namespaced).await {
                debug!("cache hit for {key} in {} tier", tier.tier_name());
                return Some(entry.value);
            }
        }
        None
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("cached value for {key} has unexpected shape: {e}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl_secs: u64) {
        let namespaced = Self::namespaced_key(key);
        let entry = CacheEntry::new(value, ttl_secs);
        for tier in &self.tiers {
            tier.set(&namespaced, entry.clone()).await;
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, json, ttl_secs).await,
            Err(e) => warn!("failed to serialize cache value for {key}: {e}"),
        }
    }

    pub async fn delete(&self, key: &str) {
        let namespaced = Self::namespaced_key(key);
        for tier in &self.tiers {
            tier.delete(&namespaced).await;
        }
    }

    /// Clears every tier and asks each configured edge cache to invalidate.
    /// Edge failures are logged, not raised.
    pub async fn purge_all(&self) {
        for tier in &self.tiers {
            tier.clear().await;
        }
        for purger in &self.purgers {
            if let Err(e) = purger.purge().await {
                warn!("{} purge failed: {}", purger.purger_name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = TieredCache::in_memory();
        cache.set("answer", json!(42), 60).await;
        assert_eq!(cache.get("answer").await, Some(json!(42)));
    }

    #[tokio::test]
    async fn get_after_delete_is_absent() {
        let cache = TieredCache::in_memory();
        cache.set("gone", json!("soon"), 60).await;
        cache.delete("gone").await;
        assert_eq!(cache.get("gone").await, None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let cache = TieredCache::in_memory();
        cache.set("stale", json!(1), 0).await;
        assert_eq!(cache.get("stale").await, None);
    }

    #[tokio::test]
    async fn durable_tier_answers_after_fast_tier_miss() {
        let dir = tempfile::tempdir().unwrap();
        let file_tier = FileTier::new(dir.path()).unwrap();
        let key = TieredCache::namespaced_key("durable");
        file_tier.set(&key, CacheEntry::new(json!("kept"), 60)).await;

        // Fresh memory tier has never seen the key; the value must come from
        // the file tier.
        let cache = TieredCache::new(vec![
            Box::new(MemoryTier::new()),
            Box::new(FileTier::new(dir.path()).unwrap()),
        ]);
        assert_eq!(cache.get("durable").await, Some(json!("kept")));
    }

    #[tokio::test]
    async fn set_writes_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::with_file_tier(dir.path()).unwrap();
        cache.set("shared", json!("both"), 60).await;

        let file_tier = FileTier::new(dir.path()).unwrap();
        let entry = file_tier.get(&TieredCache::namespaced_key("shared")).await;
        assert_eq!(entry.unwrap().value, json!("both"));
    }

    #[tokio::test]
    async fn purge_all_clears_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::with_file_tier(dir.path()).unwrap();
        cache.set("a", json!(1), 60).await;
        cache.set("b", json!(2), 60).await;
        cache.purge_all().await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let key = TieredCache::namespaced_key("bad");
        std::fs::write(dir.path().join(format!("{key}.json")), "not json").unwrap();
        let tier = FileTier::new(dir.path()).unwrap();
        assert!(tier.get(&key).await.is_none());
    }

    #[test]
    fn namespaced_keys_do_not_collide_with_raw_keys() {
        let a = TieredCache::namespaced_key("latest_news");
        let b = TieredCache::namespaced_key("latest_news ");
        assert_ne!(a, b);
        assert!(a.starts_with("nd_"));
    }

    #[tokio::test]
    async fn typed_round_trip_preserves_structure() {
        let cache = TieredCache::in_memory();
        let articles = vec!["one".to_string(), "two".to_string()];
        cache.set_json("list", &articles, 60).await;
        let back: Vec<String> = cache.get_json("list").await.unwrap();
        assert_eq!(back, articles);
    }
}
