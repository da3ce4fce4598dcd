use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::RwLock, time::Instant};

use crate::clickhouse::{DataSource, Query, QueryResult};
use crate::error::QueryError;

struct CacheEntry {
    inserted_at: Instant,
    result: Arc<QueryResult>,
}

/// Query results memoized by rendered query text for a fixed TTL.
/// The handle is not part of the key; failures are never stored.
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached_execute<D: DataSource>(
        &self,
        source: &D,
        query: &Query,
    ) -> Result<Arc<QueryResult>, QueryError> {
        let key = query.cache_key();
        if let Some(hit) = self.lookup(&key).await {
            tracing::debug!(key_len = key.len(), bytes = hit.body().len(), "query cache hit");
            return Ok(hit);
        }

        tracing::debug!(key_len = key.len(), "query cache miss");
        let result = Arc::new(source.execute(query).await?);

        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                result: result.clone(),
            },
        );
        Ok(result)
    }

    async fn lookup(&self, key: &str) -> Option<Arc<QueryResult>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.result.clone())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a different body on each call so stale reuse is visible.
    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DataSource for CountingSource {
        async fn execute(&self, _query: &Query) -> Result<QueryResult, QueryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(QueryError::Server {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(QueryResult::new(format!("{{\"call\":{n}}}\n")))
        }
    }

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn identical_query_within_ttl_hits_cache() {
        let cache = ResultCache::new(TTL);
        let source = CountingSource::new(false);
        let q = Query::new("SELECT DISTINCT nom_subsistema FROM balanco_energia_subsistemas");

        let first = cache.cached_execute(&source, &q).await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.cached_execute(&source, &q).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(first.body(), second.body());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let cache = ResultCache::new(TTL);
        let source = CountingSource::new(false);
        let q = Query::new("SELECT 1");

        let first = cache.cached_execute(&source, &q).await.unwrap();
        tokio::time::advance(TTL).await;
        let second = cache.cached_execute(&source, &q).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_ne!(first.body(), second.body());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_parameters_are_distinct_entries() {
        let cache = ResultCache::new(TTL);
        let source = CountingSource::new(false);
        let a = Query::new("SELECT x").bind_str_array("s", &["N".to_string()]);
        let b = Query::new("SELECT x").bind_str_array("s", &["S".to_string()]);

        cache.cached_execute(&source, &a).await.unwrap();
        cache.cached_execute(&source, &b).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let cache = ResultCache::new(TTL);
        let source = CountingSource::new(true);
        let q = Query::new("SELECT 1");

        assert!(cache.cached_execute(&source, &q).await.is_err());
        assert!(cache.cached_execute(&source, &q).await.is_err());

        assert_eq!(source.calls(), 2);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_prunes_expired_entries() {
        let cache = ResultCache::new(TTL);
        let source = CountingSource::new(false);

        cache.cached_execute(&source, &Query::new("SELECT 1")).await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        cache.cached_execute(&source, &Query::new("SELECT 2")).await.unwrap();

        assert_eq!(cache.len().await, 1);
    }
}
