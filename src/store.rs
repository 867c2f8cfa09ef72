use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use crate::types::{Draft, PosterError, Result};

/// External content store the pipeline publishes into. One atomic create per
/// draft; no update or merge semantics.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores a draft and returns its identifier.
    async fn create_post(&self, draft: &Draft) -> Result<u64>;

    /// Where a human can edit the stored post.
    fn edit_reference(&self, post_id: u64) -> String;
}

/// In-memory store double for tests and diagnostics. Records every accepted
/// draft and can be told to reject all writes.
#[derive(Default)]
pub struct MemoryStore {
    posts: RwLock<Vec<Draft>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            posts: RwLock::new(Vec::new()),
            fail_writes: true,
        }
    }

    pub async fn posts(&self) -> Vec<Draft> {
        self.posts.read().await.clone()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create_post(&self, draft: &Draft) -> Result<u64> {
        if self.fail_writes {
            return Err(PosterError::Store("write rejected".to_string()));
        }
        let mut posts = self.posts.write().await;
        posts.push(draft.clone());
        Ok(posts.len() as u64)
    }

    fn edit_reference(&self, post_id: u64) -> String {
        format!("memory://posts/{post_id}/edit")
    }
}

/// Filesystem-backed store used by the CLI: each draft lands as one JSON
/// document under `root`.
pub struct DirectoryStore {
    root: PathBuf,
    next_id: AtomicU64,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Resume numbering after existing posts.
        let highest = std::fs::read_dir(&root)?
            .flatten()
            .filter_map(|f| {
                f.path()
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u64>().ok())
            })
            .max()
            .unwrap_or(0);
        Ok(Self {
            root,
            next_id: AtomicU64::new(highest + 1),
        })
    }
}

#[async_trait]
impl ContentStore for DirectoryStore {
    async fn create_post(&self, draft: &Draft) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(format!("{id}.json"));
        let payload = serde_json::to_string_pretty(draft)?;
        std::fs::write(&path, payload)?;
        info!("stored draft {} at {}", id, path.display());
        Ok(id)
    }

    fn edit_reference(&self, post_id: u64) -> String {
        self.root.join(format!("{post_id}.json")).display().to_string()
    }
}
