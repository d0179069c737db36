//! Process-local, TTL-expiring cache for query embeddings. A real shared
//! cache backs rate limits and the answer memo elsewhere in the system; the
//! query-embedding memo is deliberately process-local since it only needs to
//! survive a few minutes to avoid re-embedding repeated questions.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

struct Entry {
    embedding: Vec<f32>,
    expires_at: Instant,
}

pub struct QueryEmbeddingCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl QueryEmbeddingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a cached embedding for `key` if present and unexpired.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.embedding.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, embedding: Vec<f32>) {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        entries.insert(
            key,
            Entry {
                embedding,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_the_same_embedding() {
        let cache = QueryEmbeddingCache::new(Duration::from_secs(300));
        cache.put("question".into(), vec![0.1, 0.2]);
        assert_eq!(cache.get("question"), Some(vec![0.1, 0.2]));
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = QueryEmbeddingCache::new(Duration::from_millis(1));
        cache.put("question".into(), vec![0.1, 0.2]);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("question"), None);
    }

    #[test]
    fn missing_key_returns_none() {
        let cache = QueryEmbeddingCache::new(Duration::from_secs(300));
        assert_eq!(cache.get("missing"), None);
    }
}
