//! C5 — Cache Port, backed by four independent `moka` TTL caches, one per
//! [`CacheKind`]. The port is advisory by construction: every method is
//! infallible and a miss is indistinguishable from an absent entry, so
//! nothing upstream can observe or depend on what's actually cached.

use super::CachePort;
use crate::config::CacheTtls;
use crate::models::CacheKind;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;

pub struct MokaCache {
    embedding: Cache<String, Value>,
    expansion: Cache<String, Value>,
    search_results: Cache<String, Value>,
    file_metadata: Cache<String, Value>,
}

impl MokaCache {
    pub fn new(ttls: &CacheTtls) -> Self {
        let build = |ttl: std::time::Duration| {
            Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build()
        };
        Self {
            embedding: build(ttls.embedding),
            expansion: build(ttls.expansion),
            search_results: build(ttls.search_results),
            file_metadata: build(ttls.file_metadata),
        }
    }

    fn table(&self, kind: CacheKind) -> &Cache<String, Value> {
        match kind {
            CacheKind::Embedding => &self.embedding,
            CacheKind::Expansion => &self.expansion,
            CacheKind::SearchResults => &self.search_results,
            CacheKind::FileMetadata => &self.file_metadata,
        }
    }
}

#[async_trait]
impl CachePort for MokaCache {
    async fn get(&self, kind: CacheKind, key: &str) -> Option<Value> {
        self.table(kind).get(key).await
    }

    async fn set(&self, kind: CacheKind, key: &str, value: Value) {
        self.table(kind).insert(key.to_string(), value).await;
    }
}
