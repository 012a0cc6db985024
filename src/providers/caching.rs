use crate::core::cache::Cache;
use crate::core::price::{FetchKey, FetchRange, Granularity, PriceSource};
use crate::core::series::PriceTable;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

/// Memoizes fetch results for a fixed time-to-live.
///
/// Only non-empty tables are cached; an error or an empty table is passed
/// through so the next call asks the inner source again.
pub struct CachingPriceSource<T: PriceSource> {
    inner: T,
    cache: Arc<dyn Cache<FetchKey, PriceTable>>,
    ttl: Duration,
}

impl<T: PriceSource> CachingPriceSource<T> {
    pub fn new(inner: T, cache: Arc<dyn Cache<FetchKey, PriceTable>>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl<T: PriceSource> PriceSource for CachingPriceSource<T> {
    async fn fetch(
        &self,
        symbols: &[String],
        range: FetchRange,
        granularity: Granularity,
    ) -> Result<PriceTable> {
        let key = FetchKey::new(symbols, range, granularity);
        if let Some(table) = self.cache.get(&key).await {
            debug!(?symbols, %range, %granularity, "Serving prices from cache");
            return Ok(table);
        }

        let table = self.inner.fetch(symbols, range, granularity).await?;
        if !table.is_empty() {
            self.cache.put(key, table.clone(), Some(self.ttl)).await;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{Clock, ManualClock};
    use crate::core::series::Observation;
    use crate::store::memory::MemoryCache;
    use anyhow::anyhow;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        empty: bool,
        fail: bool,
    }

    #[async_trait]
    impl PriceSource for CountingSource {
        async fn fetch(
            &self,
            symbols: &[String],
            _range: FetchRange,
            _granularity: Granularity,
        ) -> Result<PriceTable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("rate limited"));
            }
            if self.empty {
                return Ok(PriceTable::new(symbols));
            }
            let ts = NaiveDate::from_ymd_opt(2025, 3, 3)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            Ok(PriceTable::from_observations(
                symbols,
                symbols.iter().map(|s| Observation::new(ts, s, Some(10.0))),
            ))
        }
    }

    fn source(empty: bool, fail: bool) -> (CountingSource, Arc<AtomicUsize>, Arc<ManualClock>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap(),
        ));
        (
            CountingSource {
                calls: Arc::clone(&calls),
                empty,
                fail,
            },
            calls,
            clock,
        )
    }

    fn caching(
        inner: CountingSource,
        clock: &Arc<ManualClock>,
    ) -> CachingPriceSource<CountingSource> {
        let cache: Arc<dyn Cache<FetchKey, PriceTable>> =
            Arc::new(MemoryCache::with_clock(Arc::clone(clock) as Arc<dyn Clock>));
        CachingPriceSource::new(inner, cache, Duration::minutes(5))
    }

    fn spy() -> Vec<String> {
        vec!["SPY".to_string()]
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache_until_expiry() {
        let (inner, calls, clock) = source(false, false);
        let provider = caching(inner, &clock);
        let range = FetchRange::Period { days: 5 };

        provider.fetch(&spy(), range, Granularity::Hourly).await.unwrap();
        provider.fetch(&spy(), range, Granularity::Hourly).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Any difference in the key is a different request.
        provider.fetch(&spy(), range, Granularity::Daily).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clock.advance(Duration::minutes(5));
        provider.fetch(&spy(), range, Granularity::Hourly).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_results_are_not_cached() {
        let (inner, calls, clock) = source(true, false);
        let provider = caching(inner, &clock);
        let range = FetchRange::Period { days: 5 };

        let table = provider.fetch(&spy(), range, Granularity::Daily).await.unwrap();
        assert!(table.is_empty());
        provider.fetch(&spy(), range, Granularity::Daily).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (inner, calls, clock) = source(false, true);
        let provider = caching(inner, &clock);
        let range = FetchRange::Period { days: 5 };

        assert!(provider.fetch(&spy(), range, Granularity::Daily).await.is_err());
        assert!(provider.fetch(&spy(), range, Granularity::Daily).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
