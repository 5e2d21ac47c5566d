use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use market_core::Source;
use serde::Serialize;
use std::hash::Hash;

use crate::schedule::RefreshSchedule;

/// A cached value with the provenance it was fetched under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry<V> {
    pub value: V,
    /// When the refresh that produced `value` started
    pub fetched_at: DateTime<Utc>,
    pub source: Source,
}

impl<V> CacheEntry<V> {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }
}

/// Keyed store whose freshness follows a [`RefreshSchedule`].
///
/// Values are never expired implicitly; stale entries stay readable through
/// [`TtlCache::get_allow_stale`] until [`TtlCache::sweep`] drops them.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    schedule: RefreshSchedule,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(schedule: RefreshSchedule) -> Self {
        Self {
            entries: DashMap::new(),
            schedule,
        }
    }

    pub fn schedule(&self) -> &RefreshSchedule {
        &self.schedule
    }

    pub fn is_fresh(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        self.schedule.is_fresh(entry.fetched_at, now)
    }

    /// Entry for `key` only while it is fresh at `now`.
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        self.entries
            .get(key)
            .filter(|e| self.schedule.is_fresh(e.fetched_at, now))
            .map(|e| e.value().clone())
    }

    pub fn get_allow_stale(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Store `value` unless a newer fetch already landed for `key`.
    ///
    /// Returns false when the write was rejected as older than the stored entry.
    pub fn put(&self, key: K, value: V, source: Source, fetched_at: DateTime<Utc>) -> bool {
        let entry = CacheEntry {
            value,
            fetched_at,
            source,
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().fetched_at > fetched_at {
                    return false;
                }
                occupied.insert(entry);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Drop entries fetched longer than `retention` ago. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.fetched_at < retention);
        before.saturating_sub(self.entries.len())
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Most recent `fetched_at` across all entries
    pub fn newest_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.fetched_at).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_get_hides_stale_but_allow_stale_returns_it() {
        let cache: TtlCache<String, f64> = TtlCache::new(RefreshSchedule::ttl_secs(300));
        cache.put("AAPL".into(), 190.0, Source::Polygon, t0());

        assert!(cache.get(&"AAPL".into(), t0() + Duration::seconds(299)).is_some());
        assert!(cache.get(&"AAPL".into(), t0() + Duration::seconds(300)).is_none());

        let stale = cache.get_allow_stale(&"AAPL".into()).unwrap();
        assert_eq!(stale.value, 190.0);
        assert_eq!(stale.fetched_at, t0());
        assert_eq!(stale.source, Source::Polygon);
    }

    #[test]
    fn test_older_write_rejected() {
        let cache: TtlCache<String, f64> = TtlCache::new(RefreshSchedule::ttl_secs(300));
        assert!(cache.put("MSFT".into(), 420.0, Source::Finnhub, t0() + Duration::seconds(10)));
        assert!(!cache.put("MSFT".into(), 410.0, Source::Polygon, t0()));

        let entry = cache.get_allow_stale(&"MSFT".into()).unwrap();
        assert_eq!(entry.value, 420.0);
        assert_eq!(entry.source, Source::Finnhub);

        // Same timestamp: later write wins
        assert!(cache.put("MSFT".into(), 421.0, Source::Polygon, t0() + Duration::seconds(10)));
        assert_eq!(cache.get_allow_stale(&"MSFT".into()).unwrap().value, 421.0);
    }

    #[test]
    fn test_sweep_removes_only_old_entries() {
        let cache: TtlCache<String, f64> = TtlCache::new(RefreshSchedule::ttl_secs(300));
        cache.put("OLD".into(), 1.0, Source::Polygon, t0() - Duration::hours(2));
        cache.put("NEW".into(), 2.0, Source::Polygon, t0() - Duration::minutes(10));

        let removed = cache.sweep(t0(), Duration::hours(1));
        assert_eq!(removed, 1);
        assert_eq!(cache.keys(), vec!["NEW".to_string()]);
        assert_eq!(cache.newest_fetched_at(), Some(t0() - Duration::minutes(10)));
    }
}
