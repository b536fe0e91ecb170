use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::holding::currency_from_ticker;
use crate::market_data::{MarketData, MarketDataError, PricePoint, Quote};

const HISTORY_HOURS: i64 = 24;

/// Offline prices: a random walk per ticker, seeded from the ticker name.
#[derive(Debug, Clone, Default)]
pub struct SimulationMarketData {
    prices: Arc<Mutex<HashMap<String, Decimal>>>,
}

impl SimulationMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    fn seed_price(ticker: &str) -> Decimal {
        if let Some(pair) = ticker.strip_suffix("=X") {
            return match pair {
                "AUDUSD" => dec!(0.66),
                "USDAUD" => dec!(1.52),
                _ => dec!(1),
            };
        }
        let sum: u32 = ticker.bytes().map(u32::from).sum();
        Decimal::from(sum % 190 + 10)
    }

    fn step(&self, ticker: &str) -> (Decimal, Decimal) {
        let mut prices = self.prices.lock().unwrap_or_else(|e| e.into_inner());
        let previous = *prices
            .entry(ticker.to_string())
            .or_insert_with(|| Self::seed_price(ticker));
        let drift = rand::rng().random_range(-0.01..=0.01);
        let next = (previous * (dec!(1) + Decimal::from_f64(drift).unwrap_or_default())).round_dp(4);
        prices.insert(ticker.to_string(), next);
        (previous, next)
    }
}

impl MarketData for SimulationMarketData {
    async fn get_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        let (previous, price) = self.step(ticker);
        let currency = if ticker.ends_with("=X") {
            None
        } else {
            Some(currency_from_ticker(ticker))
        };
        Ok(Quote {
            ticker: ticker.to_string(),
            last_price: price,
            currency,
            previous_close: Some(previous),
            open: Some(previous),
            timestamp: Utc::now(),
        })
    }

    async fn get_history(&self, ticker: &str) -> Result<Vec<PricePoint>, MarketDataError> {
        let (_, last) = self.step(ticker);
        let now = Utc::now().timestamp();
        let mut rng = rand::rng();
        let mut price = last;
        let mut points = Vec::with_capacity(HISTORY_HOURS as usize);
        for hour in 0..HISTORY_HOURS {
            points.push(PricePoint {
                time: now - hour * 3600,
                close: price,
            });
            let drift = rng.random_range(-0.005..=0.005);
            price = (price * (dec!(1) + Decimal::from_f64(drift).unwrap_or_default())).round_dp(4);
        }
        points.reverse();
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_random_walk_stays_close() {
        let market = SimulationMarketData::new();
        let first = market.get_price("NDQ.AX").await.unwrap();
        let second = market.get_price("NDQ.AX").await.unwrap();
        assert_eq!(first.currency, Some("AUD".to_string()));
        assert_eq!(second.previous_close, Some(first.last_price));
        let ratio = second.last_price / first.last_price;
        assert!(ratio >= dec!(0.98) && ratio <= dec!(1.02));
    }

    #[tokio::test]
    async fn test_history_ends_at_current_price() {
        let market = SimulationMarketData::new();
        let points = market.get_history("BTC-USD").await.unwrap();
        assert_eq!(points.len(), HISTORY_HOURS as usize);
        assert!(points.windows(2).all(|w| w[0].time < w[1].time));
        let quote = market.get_price("BTC-USD").await.unwrap();
        assert_eq!(quote.previous_close, Some(points.last().unwrap().close));
    }
}
