use serde_json::json;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::cache::TieredCache;

/// Forwarded-address headers, in trust order.
const FORWARD_HEADERS: [&str; 4] = [
    "cf-connecting-ip",
    "x-forwarded-for",
    "x-real-ip",
    "remote-addr",
];

/// Sliding-window attempt counter per `(action, identifier)`, built on the
/// shared cache.
///
/// Every `record_attempt` re-stores the count with a fresh TTL, so the window
/// slides rather than being fixed. Counting is best-effort: concurrent
/// invocations may race on the read-increment-write, which is tolerated.
pub struct RateLimiter {
    cache: Arc<TieredCache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }

    fn window_key(action: &str, identifier: &str) -> String {
        format!("rate_limit_{action}_{identifier}")
    }

    /// True iff the stored count for `(action, identifier)` has reached
    /// `limit`. An absent count reads as zero.
    pub async fn is_limited(&self, action: &str, limit: u32, identifier: &str) -> bool {
        let attempts = self.current_attempts(action, identifier).await;
        attempts >= limit
    }

    /// Increments the counter and refreshes its TTL to `window_secs`.
    /// Returns the new count.
    pub async fn record_attempt(&self, action: &str, window_secs: u64, identifier: &str) -> u32 {
        let key = Self::window_key(action, identifier);
        let attempts = self.current_attempts(action, identifier).await + 1;
        self.cache.set(&key, json!(attempts), window_secs).await;
        debug!("attempt {attempts} recorded for {action} by {identifier}");
        attempts
    }

    /// Drops the counter for `(action, identifier)`.
    pub async fn reset(&self, action: &str, identifier: &str) {
        self.cache
            .delete(&Self::window_key(action, identifier))
            .await;
    }

    pub async fn current_attempts(&self, action: &str, identifier: &str) -> u32 {
        self.cache
            .get(&Self::window_key(action, identifier))
            .await
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }
}

/// Resolves the per-caller token used as the default rate-limit identifier:
/// the authenticated user id when present, otherwise the first public address
/// found in the forwarded headers, otherwise loopback.
pub fn client_identifier(user_id: Option<u64>, headers: &HashMap<String, String>) -> String {
    if let Some(id) = user_id {
        return format!("user_{id}");
    }

    for header in FORWARD_HEADERS {
        let Some(raw) = headers.get(header) else {
            continue;
        };
        // x-forwarded-for may carry a chain; the first hop is the client.
        let candidate = raw.split(',').next().unwrap_or("").trim();
        if let Ok(addr) = candidate.parse::<IpAddr>() {
            if is_public(addr) {
                return format!("ip_{addr}");
            }
        }
    }

    "ip_127.0.0.1".to_string()
}

/// Excludes private, loopback, link-local, and otherwise reserved ranges.
fn is_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_unique_local
                || is_link_local)
        }
    }
}
