use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::market_data::{MarketData, MarketDataError, PricePoint, Quote};

#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub quotes: Duration,
    pub fx: Duration,
    pub history: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            quotes: Duration::from_secs(60),
            fx: Duration::from_secs(120),
            history: Duration::from_secs(300),
        }
    }
}

type Entries<T> = Arc<Mutex<HashMap<String, (Instant, T)>>>;

/// Keeps successful provider answers for a short while. Errors always go
/// through to the next call.
#[derive(Debug, Clone)]
pub struct CachedMarketData<M> {
    inner: M,
    ttl: CacheTtl,
    quotes: Entries<Quote>,
    history: Entries<Vec<PricePoint>>,
}

impl<M> CachedMarketData<M> {
    pub fn new(inner: M, ttl: CacheTtl) -> Self {
        Self {
            inner,
            ttl,
            quotes: Default::default(),
            history: Default::default(),
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn quote_ttl(&self, ticker: &str) -> Duration {
        if ticker.ends_with("=X") {
            self.ttl.fx
        } else {
            self.ttl.quotes
        }
    }
}

fn cached<T: Clone>(entries: &Entries<T>, key: &str, ttl: Duration) -> Option<T> {
    let entries = entries.lock().unwrap_or_else(|e| e.into_inner());
    entries
        .get(key)
        .filter(|(at, _)| at.elapsed() < ttl)
        .map(|(_, value)| value.clone())
}

fn store<T>(entries: &Entries<T>, key: &str, value: T) {
    let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.insert(key.to_string(), (Instant::now(), value));
}

impl<M: MarketData + Send + Sync> MarketData for CachedMarketData<M> {
    async fn get_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        if let Some(quote) = cached(&self.quotes, ticker, self.quote_ttl(ticker)) {
            trace!("quote cache hit for {}", ticker);
            return Ok(quote);
        }
        let quote = self.inner.get_price(ticker).await?;
        store(&self.quotes, ticker, quote.clone());
        Ok(quote)
    }

    async fn get_history(&self, ticker: &str) -> Result<Vec<PricePoint>, MarketDataError> {
        if let Some(points) = cached(&self.history, ticker, self.ttl.history) {
            trace!("history cache hit for {}", ticker);
            return Ok(points);
        }
        let points = self.inner.get_history(ticker).await?;
        store(&self.history, ticker, points.clone());
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::market_data::fixed::{FixedFailure, FixedMarketData};

    fn ttl(secs: u64) -> CacheTtl {
        CacheTtl {
            quotes: Duration::from_secs(secs),
            fx: Duration::from_secs(secs),
            history: Duration::from_secs(secs),
        }
    }

    #[tokio::test]
    async fn test_serves_repeats_from_cache() {
        let inner = FixedMarketData::new()
            .with_quote("NDQ.AX", dec!(22.5), Some("AUD"))
            .with_history("NDQ.AX", &[dec!(22), dec!(22.5)]);
        let market = CachedMarketData::new(inner, ttl(60));

        for _ in 0..3 {
            let quote = market.get_price("NDQ.AX").await.unwrap();
            assert_eq!(quote.last_price, dec!(22.5));
            assert_eq!(market.get_history("NDQ.AX").await.unwrap().len(), 2);
        }
        assert_eq!(market.inner().request_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let inner = FixedMarketData::new().with_quote("NDQ.AX", dec!(22.5), Some("AUD"));
        let market = CachedMarketData::new(inner, ttl(0));
        market.get_price("NDQ.AX").await.unwrap();
        market.get_price("NDQ.AX").await.unwrap();
        assert_eq!(market.inner().request_count(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let inner = FixedMarketData::new().with_failure("ZIP.AX", FixedFailure::RateLimited);
        let market = CachedMarketData::new(inner, ttl(60));
        assert!(market.get_price("ZIP.AX").await.is_err());
        assert!(market.get_price("ZIP.AX").await.is_err());
        assert_eq!(market.inner().request_count(), 2);
    }
}
