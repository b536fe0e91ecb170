use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::holding::{pinned_currency, Holding};
use crate::market_data::{PricePoint, Quote};
use crate::utils::pct_change;

/// Derived valuation of one holding, in the display currency.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ValuationRow {
    pub ticker: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    /// Last price in the quote currency.
    pub price: Option<Decimal>,
    pub currency: String,
    pub fx_rate: Decimal,
    pub display_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub cost_basis: Decimal,
    pub gain_loss: Option<Decimal>,
    pub intraday_pct: Option<Decimal>,
    pub hour_pct: Option<Decimal>,
    pub notes: String,
    /// Why the price is blank, shown inline.
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Totals {
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub gain_loss: Decimal,
    pub intraday_move: Decimal,
    pub hour_move: Decimal,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PriceSeries {
    pub ticker: String,
    pub points: Vec<PricePoint>,
}

/// Result of one render pass.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PortfolioView {
    pub display_currency: String,
    pub rows: Vec<ValuationRow>,
    pub totals: Totals,
    pub warnings: Vec<String>,
    pub series: Vec<PriceSeries>,
    pub updated_at: DateTime<Utc>,
}

impl PortfolioView {
    /// Equality of everything but the render time.
    pub fn same_values(&self, other: &PortfolioView) -> bool {
        self.display_currency == other.display_currency
            && self.rows == other.rows
            && self.totals == other.totals
            && self.warnings == other.warnings
            && self.series == other.series
    }

    pub fn series(&self, ticker: &str) -> Option<&PriceSeries> {
        self.series.iter().find(|s| s.ticker == ticker)
    }
}

/// Everything fetched for one render pass, keyed by ticker, with FX rates
/// keyed by quote currency.
#[derive(Clone, Debug, Default)]
pub struct MarketSnapshot {
    pub quotes: HashMap<String, Result<Quote, String>>,
    pub rates: HashMap<String, Decimal>,
    pub history: HashMap<String, Vec<PricePoint>>,
}

impl MarketSnapshot {
    pub fn quote(&self, ticker: &str) -> Result<&Quote, String> {
        match self.quotes.get(ticker) {
            Some(Ok(quote)) => Ok(quote),
            Some(Err(err)) => Err(err.clone()),
            None => Err(format!("No quote for {}", ticker)),
        }
    }
}

/// Currency a holding is priced in: AUD for ASX tickers, otherwise explicit,
/// then provider reported, then implied by the ticker.
pub fn resolve_currency(holding: &Holding, quote: Option<&Quote>) -> String {
    pinned_currency(&holding.ticker)
        .map(str::to_string)
        .or_else(|| holding.currency.clone())
        .or_else(|| quote.and_then(|q| q.currency.clone()))
        .unwrap_or_else(|| holding.currency())
}

pub fn value_holding(holding: &Holding, quote: Option<&Quote>, fx_rate: Decimal) -> ValuationRow {
    let cost_basis = holding.cost_basis();
    let price = quote.map(|q| q.last_price);
    let display_price = price.map(|p| p * fx_rate);
    let market_value = display_price.map(|p| holding.quantity * p);
    ValuationRow {
        ticker: holding.ticker.clone(),
        quantity: holding.quantity,
        average_cost: holding.average_cost,
        price,
        currency: resolve_currency(holding, quote),
        fx_rate,
        display_price,
        market_value,
        cost_basis,
        gain_loss: market_value.map(|mv| mv - cost_basis),
        intraday_pct: quote.and_then(intraday_change),
        hour_pct: None,
        notes: holding.notes.clone(),
        error: None,
    }
}

pub fn intraday_change(quote: &Quote) -> Option<Decimal> {
    quote
        .previous_close
        .and_then(|previous| pct_change(quote.last_price, previous))
}

/// Change between the last two hourly closes.
pub fn hour_change(points: &[PricePoint]) -> Option<Decimal> {
    match points {
        [.., previous, last] => pct_change(last.close, previous.close),
        _ => None,
    }
}

pub fn summarize(rows: &[ValuationRow]) -> Totals {
    rows.iter().fold(Totals::default(), |mut totals, row| {
        totals.cost_basis += row.cost_basis;
        if let Some(market_value) = row.market_value {
            totals.market_value += market_value;
            totals.intraday_move += market_value * row.intraday_pct.unwrap_or_default() / dec!(100);
            totals.hour_move += market_value * row.hour_pct.unwrap_or_default() / dec!(100);
        }
        if let Some(gain_loss) = row.gain_loss {
            totals.gain_loss += gain_loss;
        }
        totals
    })
}

/// Largest market value first, blank values last, ties in snapshot order.
pub fn sort_rows(rows: &mut [ValuationRow]) {
    rows.sort_by(|a, b| match (a.market_value, b.market_value) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Builds the view of a holdings snapshot from the fetched market data.
pub fn build_view(
    holdings: &[Holding],
    market: &MarketSnapshot,
    display_currency: &str,
    warnings: Vec<String>,
    updated_at: DateTime<Utc>,
) -> PortfolioView {
    let mut rows: Vec<ValuationRow> = holdings
        .iter()
        .map(|holding| {
            let quote = market.quote(&holding.ticker);
            let currency = resolve_currency(holding, quote.as_ref().ok().copied());
            let fx_rate = if currency.eq_ignore_ascii_case(display_currency) {
                dec!(1)
            } else {
                market.rates.get(&currency).copied().unwrap_or(dec!(1))
            };
            let mut row = value_holding(holding, quote.as_ref().ok().copied(), fx_rate);
            row.error = quote.err();
            row.hour_pct = market
                .history
                .get(&holding.ticker)
                .and_then(|points| hour_change(points));
            row
        })
        .collect();
    sort_rows(&mut rows);

    let series = rows
        .iter()
        .filter_map(|row| {
            market.history.get(&row.ticker).map(|points| PriceSeries {
                ticker: row.ticker.clone(),
                points: points.clone(),
            })
        })
        .collect();

    PortfolioView {
        display_currency: display_currency.to_string(),
        totals: summarize(&rows),
        rows,
        warnings,
        series,
        updated_at,
    }
}
