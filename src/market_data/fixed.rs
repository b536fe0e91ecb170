use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::holding::normalize_ticker;
use crate::market_data::{MarketData, MarketDataError, PricePoint, Quote};

/// Entry of a quotes file: `{"NDQ.AX": {"price": 22.5, "currency": "AUD"}}`.
#[derive(Deserialize, Debug, Clone)]
pub struct FixedQuote {
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub price: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    pub previous_close: Option<Decimal>,
    #[serde(default)]
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, Copy)]
pub enum FixedFailure {
    NotFound,
    RateLimited,
}

/// Quotes from a file or built in memory. Unknown tickers are not found.
#[derive(Debug, Clone, Default)]
pub struct FixedMarketData {
    quotes: HashMap<String, FixedQuote>,
    failures: HashMap<String, FixedFailure>,
    requests: Arc<AtomicUsize>,
}

impl FixedMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read quotes file {}", path.display()))?;
        let quotes: HashMap<String, FixedQuote> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid quotes file {}", path.display()))?;
        Ok(Self {
            quotes: quotes
                .into_iter()
                .map(|(ticker, quote)| (normalize_ticker(&ticker), quote))
                .collect(),
            ..Default::default()
        })
    }

    pub fn with_quote(mut self, ticker: &str, price: Decimal, currency: Option<&str>) -> Self {
        self.quotes.insert(
            normalize_ticker(ticker),
            FixedQuote {
                price,
                currency: currency.map(str::to_string),
                previous_close: None,
                history: vec![],
            },
        );
        self
    }

    pub fn with_previous_close(mut self, ticker: &str, previous_close: Decimal) -> Self {
        if let Some(quote) = self.quotes.get_mut(&normalize_ticker(ticker)) {
            quote.previous_close = Some(previous_close);
        }
        self
    }

    pub fn with_history(mut self, ticker: &str, closes: &[Decimal]) -> Self {
        if let Some(quote) = self.quotes.get_mut(&normalize_ticker(ticker)) {
            quote.history = closes
                .iter()
                .enumerate()
                .map(|(i, close)| PricePoint {
                    time: i as i64 * 3600,
                    close: *close,
                })
                .collect();
        }
        self
    }

    pub fn with_failure(mut self, ticker: &str, failure: FixedFailure) -> Self {
        self.failures.insert(normalize_ticker(ticker), failure);
        self
    }

    /// Number of provider calls served so far, failures included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lookup(&self, ticker: &str) -> Result<&FixedQuote, MarketDataError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let ticker = normalize_ticker(ticker);
        match self.failures.get(&ticker) {
            Some(FixedFailure::RateLimited) => return Err(MarketDataError::RateLimited),
            Some(FixedFailure::NotFound) => return Err(MarketDataError::NotFound(ticker)),
            None => {}
        }
        self.quotes
            .get(&ticker)
            .ok_or(MarketDataError::NotFound(ticker))
    }
}

impl MarketData for FixedMarketData {
    async fn get_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        let quote = self.lookup(ticker)?;
        Ok(Quote {
            ticker: ticker.to_string(),
            last_price: quote.price,
            currency: quote.currency.clone(),
            previous_close: quote.previous_close,
            open: None,
            timestamp: Utc::now(),
        })
    }

    async fn get_history(&self, ticker: &str) -> Result<Vec<PricePoint>, MarketDataError> {
        let quote = self.lookup(ticker)?;
        if quote.history.is_empty() {
            return Err(MarketDataError::NotFound(ticker.to_string()));
        }
        Ok(quote.history.clone())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotes.json");
        tokio::fs::write(
            &path,
            r#"{
                "ndq.ax": {"price": 22.5, "currency": "AUD", "previous_close": 22.0},
                "AUDUSD=X": {"price": 0.66}
            }"#,
        )
        .await
        .unwrap();

        let market = FixedMarketData::from_file(&path).await.unwrap();
        let quote = market.get_price("NDQ.AX").await.unwrap();
        assert_eq!(quote.last_price, dec!(22.5));
        assert_eq!(quote.previous_close, Some(dec!(22)));
        assert_eq!(
            market.get_price("AUDUSD=X").await.unwrap().last_price,
            dec!(0.66)
        );
        assert!(matches!(
            market.get_price("VGS.AX").await,
            Err(MarketDataError::NotFound(_))
        ));
        assert!(matches!(
            market.get_history("NDQ.AX").await,
            Err(MarketDataError::NotFound(_))
        ));
        assert_eq!(market.request_count(), 4);
    }

    #[tokio::test]
    async fn test_failures() {
        let market = FixedMarketData::new()
            .with_quote("ZIP.AX", dec!(3), Some("AUD"))
            .with_failure("ZIP.AX", FixedFailure::RateLimited);
        assert!(matches!(
            market.get_price("ZIP.AX").await,
            Err(MarketDataError::RateLimited)
        ));
    }
}
