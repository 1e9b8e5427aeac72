use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{CacheCounters, CacheStats, KeyedLocks};
use crate::store::KvStore;

/// Day-scoped cache for slowly changing reference data.
///
/// The calendar date is part of the key, so each day starts with an empty
/// cache. Entries also carry a store-level expiry at the next local midnight.
pub struct RuleCache {
    store: Arc<dyn KvStore>,
    tz: Tz,
    locks: KeyedLocks,
    counters: CacheCounters,
}

impl RuleCache {
    pub fn new(store: Arc<dyn KvStore>, tz: Tz) -> Self {
        Self {
            store,
            tz,
            locks: KeyedLocks::default(),
            counters: CacheCounters::default(),
        }
    }

    pub fn key(identity: &str, date: NaiveDate) -> String {
        format!("rules:{identity}:{}", date.format("%Y-%m-%d"))
    }

    /// Today's date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// First instant of the day after `date`, local time.
    pub fn expires_at(&self, date: NaiveDate) -> DateTime<Utc> {
        let next_midnight = (date + Duration::days(1)).and_hms_opt(0, 0, 0);
        next_midnight
            .and_then(|midnight| self.tz.from_local_datetime(&midnight).earliest())
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + Duration::days(1))
    }

    pub async fn get<T: DeserializeOwned>(&self, identity: &str, date: NaiveDate) -> Option<T> {
        let key = Self::key(identity, date);
        let value = self.read(&key).await;
        if value.is_some() {
            self.counters.hit();
            debug!(key = %key, "rule cache hit");
        } else {
            self.counters.miss();
            debug!(key = %key, "rule cache miss");
        }
        value
    }

    pub async fn set<T: Serialize>(&self, identity: &str, date: NaiveDate, value: &T) {
        let key = Self::key(identity, date);
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                self.counters.error();
                warn!(key = %key, error = %e, "failed to serialize rule cache value");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &bytes, Some(self.expires_at(date))).await {
            self.counters.error();
            warn!(key = %key, error = %e, "rule cache write failed, continuing uncached");
        }
    }

    pub async fn invalidate(&self, identity: &str, date: NaiveDate) {
        let key = Self::key(identity, date);
        if let Err(e) = self.store.delete(&key).await {
            self.counters.error();
            warn!(key = %key, error = %e, "rule cache invalidate failed");
        }
    }

    /// Return the cached value for the day or run `fetch` once to populate it.
    ///
    /// Concurrent callers for the same key wait on the first fetch; a failed
    /// fetch is returned to its caller and nothing is cached.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, identity: &str, date: NaiveDate, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(identity, date).await {
            return Ok(value);
        }

        let key = Self::key(identity, date);
        let _guard = self.locks.lock(&key).await;

        if let Some(value) = self.read(&key).await {
            debug!(key = %key, "rule cache populated while waiting");
            return Ok(value);
        }

        let value = fetch().await?;
        self.set(identity, date, &value).await;
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding undecodable rule cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.counters.error();
                warn!(key = %key, error = %e, "rule cache read failed, treating as miss");
                None
            }
        }
    }
}
