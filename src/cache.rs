// Response cache for mutating calls

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::models::{HttpMethod, ResponseEnvelope};

/// (method, fully-qualified URL)
pub type CacheKey = (HttpMethod, String);

/// Process-wide instance shared by every session
static GLOBAL_CACHE: Lazy<Arc<ResponseCache>> = Lazy::new(|| Arc::new(ResponseCache::new()));

/// Thread-safe store of the last response received for each mutating call
///
/// Lets a caller redisplay the result of a POST/PUT/PATCH without sending it
/// again. There is no eviction and no TTL: entries live until the cache is
/// dropped, and a newer response for the same key replaces the older one.
#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, ResponseEnvelope>,
}

impl ResponseCache {
    /// Create an empty cache, independent of the process-wide one
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// The process-wide cache
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Store a response, replacing any previous one for the same key.
    /// Non-mutating methods are ignored.
    pub fn put(&self, method: HttpMethod, url: &str, envelope: ResponseEnvelope) {
        if !method.is_mutating() {
            tracing::debug!(method = %method, url = %url, "Not caching non-mutating response");
            return;
        }

        tracing::debug!(method = %method, url = %url, "Setting response cache");
        self.entries.insert((method, url.to_string()), envelope);
    }

    /// Previously stored response for this method and URL
    pub fn get(&self, method: HttpMethod, url: &str) -> Option<ResponseEnvelope> {
        self.entries
            .get(&(method, url.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
