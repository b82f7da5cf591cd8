// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tool Response Caching Layer
//!
//! TTL-bounded memoization for read-mostly Jenkins resources (job info,
//! build info, identity). Handlers are wrapped by [`CachingHandler`], which
//! stores the unshaped [`Payload`] so `summary` and `full` requests for the
//! same resource share one entry.
//!
//! ## Cache Key Generation
//!
//! ```text
//! key = tool || ":" || hex(SHA256({"args": args - format, "tool": tool}))[..16]
//! ```
//!
//! ## Eviction
//!
//! - Expired entries are dropped lazily on `get`
//! - At capacity, `set` evicts the entry with the earliest expiry first

use crate::formatters::Payload;
use crate::mcp::registry::{RequestContext, ToolError, ToolHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Arguments that only change presentation, never the upstream resource.
const VOLATILE_ARGS: &[&str] = &["format"];

/// Configuration for the response cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    pub max_entries: usize,
    /// Time-to-live for cache entries
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage
    pub hit_rate: f64,
    pub ttl_seconds: u64,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// TTL cache with a hard entry ceiling.
///
/// One mutex guards the map and the counters, so statistics always agree
/// with what the map actually holds.
pub struct ResponseCache<V = Payload> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            config,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let fresh = match inner.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };

        match fresh {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                debug!(key = %oldest, "Evicted cache entry");
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.config.ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.inner.lock().entries.remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            (inner.hits as f64 / total as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            ttl_seconds: self.config.ttl.as_secs(),
        }
    }
}

/// Stable cache key for a tool invocation.
///
/// `serde_json::Map` keeps keys sorted, so the serialization is canonical.
pub fn cache_key(tool_name: &str, args: &Map<String, Value>) -> String {
    let filtered: Map<String, Value> = args
        .iter()
        .filter(|(k, _)| !VOLATILE_ARGS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let canonical = json!({ "args": filtered, "tool": tool_name }).to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let hash = hex::encode(digest);

    format!("{}:{}", tool_name, &hash[..16])
}

/// Memoizes a handler's successful payloads.
pub struct CachingHandler {
    tool_name: String,
    inner: Arc<dyn ToolHandler>,
    cache: Arc<ResponseCache>,
}

impl CachingHandler {
    pub fn new(
        tool_name: impl Into<String>,
        inner: Arc<dyn ToolHandler>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            inner,
            cache,
        }
    }
}

#[async_trait]
impl ToolHandler for CachingHandler {
    async fn handle(
        &self,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Payload, ToolError> {
        let key = cache_key(&self.tool_name, args);

        if let Some(payload) = self.cache.get(&key) {
            debug!(tool = %self.tool_name, correlation_id = %ctx.correlation_id, "Cache hit");
            return Ok(payload);
        }

        let payload = self.inner.handle(args, ctx).await?;
        if !payload.is_error() {
            self.cache.set(key, payload.clone());
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize, ttl: Duration) -> ResponseCache<String> {
        ResponseCache::new(CacheConfig { max_entries, ttl })
    }

    #[test]
    fn test_get_before_ttl_returns_value() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("a", "alpha".to_string());

        assert_eq!(cache.get("a").as_deref(), Some("alpha"));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 50.0);
    }

    #[test]
    fn test_expired_entry_is_purged() {
        let cache = cache(10, Duration::from_millis(20));
        cache.set("a", "alpha".to_string());
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_bound_evicts_nearest_expiry() {
        let cache = cache(3, Duration::from_secs(60));
        cache.set("first", "1".to_string());
        std::thread::sleep(Duration::from_millis(2));
        cache.set("second", "2".to_string());
        std::thread::sleep(Duration::from_millis(2));
        cache.set("third", "3".to_string());
        std::thread::sleep(Duration::from_millis(2));
        cache.set("fourth", "4".to_string());

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("first"), None);
        assert!(cache.get("second").is_some());
        assert!(cache.get("fourth").is_some());

        for i in 0..20 {
            cache.set(format!("k{}", i), i.to_string());
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_overwrite_at_capacity_keeps_others() {
        let cache = cache(2, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("a", "3".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("3"));
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());

        cache.delete("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_key_ignores_format_and_order() {
        let mut summary = Map::new();
        summary.insert("name".into(), json!("infra/build"));
        summary.insert("number".into(), json!("57"));
        summary.insert("format".into(), json!("summary"));

        let mut full = Map::new();
        full.insert("format".into(), json!("full"));
        full.insert("number".into(), json!("57"));
        full.insert("name".into(), json!("infra/build"));

        let key = cache_key("get_build", &summary);
        assert_eq!(key, cache_key("get_build", &full));
        assert!(key.starts_with("get_build:"));
        assert_eq!(key.len(), "get_build:".len() + 16);

        assert_ne!(key, cache_key("get_job", &summary));
    }
}
