use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::market_data::{MarketData, MarketDataError};

#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("Exchange rate {pair} unavailable: {reason}")]
    Unavailable { pair: String, reason: String },
}

/// Provider symbol of a currency pair, e.g. `AUDUSD=X`.
pub fn pair_symbol(from: &str, to: &str) -> String {
    format!("{}{}=X", from.to_uppercase(), to.to_uppercase())
}

/// Converts values between currencies with rates read from the market data
/// provider's currency pair quotes.
pub struct FxConverter<'a, M> {
    market: &'a M,
}

impl<'a, M: MarketData + Sync> FxConverter<'a, M> {
    pub fn new(market: &'a M) -> Self {
        Self { market }
    }

    /// Multiplier turning an amount in `from` into `to`. Falls back to the
    /// inverse pair when the direct one is unknown.
    pub async fn get_rate(&self, from: &str, to: &str) -> Result<Decimal, FxError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(dec!(1));
        }

        let direct = pair_symbol(from, to);
        let unavailable = |reason: String| FxError::Unavailable {
            pair: direct.clone(),
            reason,
        };

        match self.market.get_price(&direct).await {
            Ok(quote) if quote.last_price > dec!(0) => Ok(quote.last_price),
            Ok(quote) => Err(unavailable(format!("invalid rate {}", quote.last_price))),
            Err(MarketDataError::NotFound(_)) => {
                let inverse = pair_symbol(to, from);
                debug!("{} not found, trying {}", direct, inverse);
                match self.market.get_price(&inverse).await {
                    Ok(quote) if quote.last_price > dec!(0) => {
                        Ok((dec!(1) / quote.last_price).round_dp(10))
                    }
                    Ok(quote) => Err(unavailable(format!(
                        "invalid rate {} for {}",
                        quote.last_price, inverse
                    ))),
                    Err(err) => Err(unavailable(err.to_string())),
                }
            }
            Err(err) => Err(unavailable(err.to_string())),
        }
    }

    /// Rate for the pair, or 1 with a warning message when none is available.
    pub async fn rate_or_par(&self, from: &str, to: &str) -> (Decimal, Option<String>) {
        match self.get_rate(from, to).await {
            Ok(rate) => (rate, None),
            Err(err) => {
                warn!("{}, using 1:1", err);
                (
                    dec!(1),
                    Some(format!("{}; {} values shown unconverted", err, from)),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::fixed::{FixedFailure, FixedMarketData};

    #[test]
    fn test_pair_symbol() {
        assert_eq!(pair_symbol("aud", "USD"), "AUDUSD=X");
    }

    #[tokio::test]
    async fn test_same_currency_needs_no_fetch() {
        let market = FixedMarketData::new();
        let fx = FxConverter::new(&market);
        assert_eq!(fx.get_rate("AUD", "aud").await.unwrap(), dec!(1));
        assert_eq!(market.request_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_and_inverse_pairs() {
        let market = FixedMarketData::new().with_quote("AUDUSD=X", dec!(0.64), None);
        let fx = FxConverter::new(&market);
        assert_eq!(fx.get_rate("AUD", "USD").await.unwrap(), dec!(0.64));
        assert_eq!(fx.get_rate("USD", "AUD").await.unwrap(), dec!(1.5625));
    }

    #[tokio::test]
    async fn test_falls_back_to_par() {
        let market = FixedMarketData::new()
            .with_quote("USDAUD=X", dec!(1.5), None)
            .with_failure("USDAUD=X", FixedFailure::RateLimited);
        let fx = FxConverter::new(&market);

        let res = fx.get_rate("USD", "AUD").await;
        assert!(matches!(res, Err(FxError::Unavailable { pair, .. }) if pair == "USDAUD=X"));

        let (rate, warning) = fx.rate_or_par("USD", "AUD").await;
        assert_eq!(rate, dec!(1));
        assert!(warning.unwrap().contains("USDAUD=X"));

        let (rate, warning) = fx.rate_or_par("EUR", "AUD").await;
        assert_eq!(rate, dec!(1));
        assert!(warning.is_some());
    }
}
