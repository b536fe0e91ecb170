use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::fx::FxConverter;
use crate::holding::Holding;
use crate::market_data::MarketData;
use crate::valuation::{self, MarketSnapshot, PortfolioView};

/// Provider calls in flight during a render pass.
const CONCURRENT_REQUESTS: usize = 4;

/// Runs render passes: quotes, then FX rates, then valuation.
#[derive(Debug, Clone)]
pub struct Dashboard<M> {
    market: M,
    display_currency: String,
}

impl<M: MarketData + Send + Sync> Dashboard<M> {
    pub fn new(market: M, display_currency: &str) -> Self {
        Self {
            market,
            display_currency: display_currency.trim().to_uppercase(),
        }
    }

    pub fn display_currency(&self) -> &str {
        &self.display_currency
    }

    /// Fetches what a render of `holdings` needs. Failures end up in the
    /// snapshot or the returned warnings, never as an error.
    pub async fn fetch(&self, holdings: &[Holding]) -> (MarketSnapshot, Vec<String>) {
        let market = &self.market;
        let tickers: Vec<String> = holdings.iter().map(|h| h.ticker.clone()).collect();

        let quotes: Vec<_> = stream::iter(tickers.clone())
            .map(|ticker| async move {
                let quote = market.get_price(&ticker).await;
                if let Err(err) = &quote {
                    warn!("Quote for {} failed: {}", ticker, err);
                }
                (ticker, quote.map_err(|e| e.to_string()))
            })
            .buffered(CONCURRENT_REQUESTS)
            .collect()
            .await;

        let history: Vec<_> = stream::iter(tickers)
            .map(|ticker| async move {
                let points = market.get_history(&ticker).await;
                if let Err(err) = &points {
                    debug!("History for {} unavailable: {}", ticker, err);
                }
                (ticker, points.ok())
            })
            .buffered(CONCURRENT_REQUESTS)
            .collect()
            .await;

        let mut snapshot = MarketSnapshot {
            quotes: quotes.into_iter().collect(),
            history: history
                .into_iter()
                .filter_map(|(ticker, points)| points.map(|points| (ticker, points)))
                .collect(),
            ..Default::default()
        };

        let currencies = holdings
            .iter()
            .map(|holding| {
                let quote = snapshot.quote(&holding.ticker).ok();
                valuation::resolve_currency(holding, quote)
            })
            .filter(|currency| !currency.eq_ignore_ascii_case(&self.display_currency))
            .unique()
            .sorted()
            .collect::<Vec<String>>();

        let fx = FxConverter::new(market);
        let mut warnings = vec![];
        for currency in currencies {
            let (rate, warning) = fx.rate_or_par(&currency, &self.display_currency).await;
            warnings.extend(warning);
            snapshot.rates.insert(currency, rate);
        }

        (snapshot, warnings)
    }

    /// One full render pass over a holdings snapshot.
    pub async fn render(&self, holdings: &[Holding]) -> PortfolioView {
        let (snapshot, warnings) = self.fetch(holdings).await;
        let view = valuation::build_view(
            holdings,
            &snapshot,
            &self.display_currency,
            warnings,
            Utc::now(),
        );
        info!(
            "Rendered {} holdings, value {} {}",
            view.rows.len(),
            view.totals.market_value.round_dp(2),
            self.display_currency
        );
        view
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::market_data::fixed::{FixedFailure, FixedMarketData};

    fn holdings() -> Vec<Holding> {
        vec![
            Holding::new("NDQ.AX", dec!(10), dec!(20)),
            Holding::new("BTC-USD", dec!(0.5), dec!(90000)),
            Holding::new("ZIP.AX", dec!(100), dec!(2)),
        ]
    }

    #[tokio::test]
    async fn test_render() {
        let market = FixedMarketData::new()
            .with_quote("NDQ.AX", dec!(22.5), Some("AUD"))
            .with_quote("BTC-USD", dec!(100000), Some("USD"))
            .with_quote("AUDUSD=X", dec!(0.625), None)
            .with_previous_close("NDQ.AX", dec!(20))
            .with_history("NDQ.AX", &[dec!(22), dec!(22.5)])
            .with_failure("ZIP.AX", FixedFailure::NotFound);
        let dashboard = Dashboard::new(market, "aud");

        let view = dashboard.render(&holdings()).await;
        assert_eq!(view.display_currency, "AUD");
        assert!(view.warnings.is_empty());

        let tickers: Vec<&str> = view.rows.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["BTC-USD", "NDQ.AX", "ZIP.AX"]);

        let btc = &view.rows[0];
        assert_eq!(btc.fx_rate, dec!(1.6));
        assert_eq!(btc.market_value, Some(dec!(80000)));
        assert_eq!(btc.gain_loss, Some(dec!(35000)));

        assert_eq!(view.rows[1].market_value, Some(dec!(225)));
        assert_eq!(view.rows[1].intraday_pct, Some(dec!(12.5)));
        assert_eq!(view.rows[2].market_value, None);
        assert_eq!(view.series.len(), 1);
        assert_eq!(view.totals.market_value, dec!(80225));
    }

    #[tokio::test]
    async fn test_render_without_fx_rate() {
        let market = FixedMarketData::new()
            .with_quote("NDQ.AX", dec!(22.5), Some("AUD"))
            .with_quote("BTC-USD", dec!(100000), Some("USD"))
            .with_quote("ZIP.AX", dec!(3), Some("AUD"));
        let dashboard = Dashboard::new(market, "AUD");

        let view = dashboard.render(&holdings()).await;
        assert_eq!(view.warnings.len(), 1);
        let btc = view.rows.iter().find(|r| r.ticker == "BTC-USD").unwrap();
        assert_eq!(btc.fx_rate, dec!(1));
        assert_eq!(btc.market_value, Some(dec!(50000)));
        let zip = view.rows.iter().find(|r| r.ticker == "ZIP.AX").unwrap();
        assert_eq!(zip.market_value, Some(dec!(300)));
    }

    #[tokio::test]
    async fn test_render_empty() {
        let dashboard = Dashboard::new(FixedMarketData::new(), "AUD");
        let view = dashboard.render(&[]).await;
        assert!(view.rows.is_empty());
        assert_eq!(view.totals, Default::default());
    }
}
