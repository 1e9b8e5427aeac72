use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cache::{CacheCounters, CacheStats, KeyedLocks};
use crate::error::FetchError;
use crate::models::PlateRecord;
use crate::store::KvStore;

/// TTL used when the configured one is unusable.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(300);

/// Short-lived cache of per-account permit query results.
pub struct StatusCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    locks: KeyedLocks,
    counters: CacheCounters,
}

impl StatusCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            locks: KeyedLocks::default(),
            counters: CacheCounters::default(),
        }
    }

    fn key(account: &str) -> String {
        format!("permit:{account}")
    }

    pub async fn get(&self, account: &str) -> Option<Vec<PlateRecord>> {
        let records = self.read(account).await;
        if records.is_some() {
            self.counters.hit();
            debug!(account = %account, "permit cache hit");
        } else {
            self.counters.miss();
            debug!(account = %account, "permit cache miss");
        }
        records
    }

    pub async fn set(&self, account: &str, records: &[PlateRecord], ttl: Duration) {
        let key = Self::key(account);
        let expires_at = Some(expiry(ttl));
        let bytes = match serde_json::to_vec(records) {
            Ok(b) => b,
            Err(e) => {
                self.counters.error();
                warn!(account = %account, error = %e, "failed to serialize permit records");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &bytes, expires_at).await {
            self.counters.error();
            warn!(account = %account, error = %e, "permit cache write failed, continuing uncached");
        }
    }

    pub async fn invalidate(&self, account: &str) {
        if let Err(e) = self.store.delete(&Self::key(account)).await {
            self.counters.error();
            warn!(account = %account, error = %e, "permit cache invalidate failed");
        }
    }

    /// Cached records for `account`, or the result of one `fetch` call.
    ///
    /// Only successful fetches are written back.
    pub async fn get_or_fetch<F, Fut>(&self, account: &str, fetch: F) -> Result<Vec<PlateRecord>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<PlateRecord>, FetchError>>,
    {
        if let Some(records) = self.get(account).await {
            return Ok(records);
        }

        let _guard = self.locks.lock(&Self::key(account)).await;

        if let Some(records) = self.read(account).await {
            return Ok(records);
        }

        let records = fetch().await?;
        self.set(account, &records, self.ttl).await;
        Ok(records)
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    async fn read(&self, account: &str) -> Option<Vec<PlateRecord>> {
        let key = Self::key(account);
        match self.store.get(&key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .inspect_err(|e| warn!(account = %account, error = %e, "discarding undecodable permit entry"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                self.counters.error();
                warn!(account = %account, error = %e, "permit cache read failed, treating as miss");
                None
            }
        }
    }
}

/// `now + ttl`, or `now + DEFAULT_STATUS_TTL` when `ttl` does not fit a timestamp.
/// Permit entries always expire.
fn expiry(ttl: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or_else(|| {
            warn!(ttl = ?ttl, "permit cache ttl out of range, using default");
            now + chrono::Duration::seconds(DEFAULT_STATUS_TTL.as_secs() as i64)
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::CacheError;
    use crate::store::MemoryKvStore;

    fn record(plate: &str) -> PlateRecord {
        PlateRecord {
            plate: plate.to_string(),
            permit_type: "进京证(六环外)".to_string(),
            raw_status: "审核通过(生效中)".to_string(),
            valid_start: None,
            valid_end: None,
            days_remaining: Some(5),
            source_account: "alice".to_string(),
            apply_time: None,
            remaining_uses: None,
        }
    }

    fn cache(ttl: Duration) -> StatusCache {
        StatusCache::new(Arc::new(MemoryKvStore::new()), ttl)
    }

    #[tokio::test]
    async fn repeated_queries_in_one_cycle_fetch_once() {
        let cache = Arc::new(cache(Duration::from_secs(300)));
        let fetches = Arc::new(AtomicUsize::new(0));

        let tasks = (0..5).map(|_| {
            let cache = cache.clone();
            let fetches = fetches.clone();
            async move {
                cache
                    .get_or_fetch("alice", || async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(vec![record("京A12345")])
                    })
                    .await
            }
        });
        let results = futures_util::future::join_all(tasks).await;

        assert!(results.iter().all(|r| r.as_ref().unwrap()[0].plate == "京A12345"));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_empty() {
        let cache = cache(Duration::from_secs(300));
        let result = cache
            .get_or_fetch("alice", || async {
                Err(FetchError::Network {
                    url: "https://example.invalid".to_string(),
                    message: "connection refused".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(FetchError::Network { .. })));
        assert!(cache.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = cache(Duration::from_millis(30));
        cache.set("alice", &[record("京A12345")], Duration::from_millis(30)).await;
        assert!(cache.get("alice").await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_entry() {
        let cache = cache(Duration::from_secs(300));
        cache.set("alice", &[record("京A12345")], Duration::from_secs(300)).await;
        cache.invalidate("alice").await;
        assert!(cache.get("alice").await.is_none());
    }

    /// Records the expiry of every write.
    #[derive(Default)]
    struct ExpiryLog {
        inner: MemoryKvStore,
        expiries: Mutex<Vec<Option<DateTime<Utc>>>>,
    }

    #[async_trait]
    impl KvStore for ExpiryLog {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8], expires_at: Option<DateTime<Utc>>) -> Result<(), CacheError> {
            self.expiries.lock().unwrap().push(expires_at);
            self.inner.set(key, value, expires_at).await
        }
        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.inner.delete(key).await
        }
        async fn purge_expired(&self) -> Result<u64, CacheError> {
            self.inner.purge_expired().await
        }
    }

    #[tokio::test]
    async fn oversized_ttl_still_expires() {
        let store = Arc::new(ExpiryLog::default());
        let cache = StatusCache::new(store.clone(), Duration::MAX);
        let before = Utc::now();

        cache
            .get_or_fetch("alice", || async { Ok(vec![record("京A12345")]) })
            .await
            .unwrap();

        let expiries = store.expiries.lock().unwrap().clone();
        assert_eq!(expiries.len(), 1);
        let expires_at = expiries[0].expect("permit entry must carry an expiry");
        assert!(expires_at > before);
        assert!(expires_at <= Utc::now() + chrono::Duration::seconds(301));
    }
}
