use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::market_data::{MarketDataError, PricePoint, Quote};
use crate::utils::decimal_from_f64;

#[derive(Deserialize, Debug, Clone)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Chart {
    pub result: Option<Vec<ChartResult>>,
    pub error: Option<ChartError>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChartError {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChartResult {
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    #[serde(default)]
    pub indicators: Indicators,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct ChartMeta {
    #[serde(default)]
    pub symbol: String,
    pub currency: Option<String>,
    pub regular_market_price: Option<f64>,
    pub regular_market_time: Option<i64>,
    pub chart_previous_close: Option<f64>,
    pub previous_close: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<IndicatorQuote>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct IndicatorQuote {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

impl ChartResponse {
    pub fn into_result(self, symbol: &str) -> Result<ChartResult, MarketDataError> {
        if let Some(error) = self.chart.error {
            return Err(error.into_error(symbol));
        }
        self.chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| MarketDataError::NotFound(symbol.to_string()))
    }
}

impl ChartError {
    pub fn into_error(self, symbol: &str) -> MarketDataError {
        match self.code.as_str() {
            "Not Found" => MarketDataError::NotFound(symbol.to_string()),
            "Too Many Requests" => MarketDataError::RateLimited,
            _ => MarketDataError::Parse(format!("{}: {}", self.code, self.description)),
        }
    }
}

impl ChartMeta {
    /// Reported currency in major units, with the divisor turning reported
    /// prices into that unit. London listings are quoted in pence.
    fn major_currency(&self) -> (Option<String>, Decimal) {
        match self.currency.as_deref() {
            Some("GBp" | "GBX" | "GBx") => (Some("GBP".to_string()), dec!(100)),
            Some(currency) => (Some(currency.to_uppercase()), dec!(1)),
            None => (None, dec!(1)),
        }
    }
}

impl ChartResult {
    fn quote_series(&self) -> Option<&IndicatorQuote> {
        self.indicators.quote.first()
    }

    pub fn into_quote(self, ticker: &str) -> Result<Quote, MarketDataError> {
        let (currency, unit) = self.meta.major_currency();
        let last_close = self
            .quote_series()
            .and_then(|q| q.close.iter().rev().flatten().next().copied());
        let last_price = self
            .meta
            .regular_market_price
            .or(last_close)
            .and_then(decimal_from_f64)
            .map(|price| price / unit)
            .ok_or_else(|| MarketDataError::NotFound(ticker.to_string()))?;

        let open = self
            .quote_series()
            .and_then(|q| q.open.iter().rev().flatten().next().copied())
            .and_then(decimal_from_f64)
            .map(|price| price / unit);
        let previous_close = self
            .meta
            .chart_previous_close
            .or(self.meta.previous_close)
            .and_then(decimal_from_f64)
            .map(|price| price / unit);

        let timestamp = self
            .meta
            .regular_market_time
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .unwrap_or_else(Utc::now);

        Ok(Quote {
            ticker: ticker.to_string(),
            last_price,
            currency,
            previous_close,
            open,
            timestamp,
        })
    }

    pub fn into_price_points(self) -> Vec<PricePoint> {
        let (_, unit) = self.meta.major_currency();
        let closes = self
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();
        self.timestamp
            .into_iter()
            .zip(closes)
            .filter_map(|(time, close)| {
                close
                    .and_then(decimal_from_f64)
                    .map(|close| PricePoint {
                        time,
                        close: close / unit,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn chart_json() -> serde_json::Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "currency": "AUD",
                        "symbol": "NDQ.AX",
                        "exchangeName": "ASX",
                        "regularMarketPrice": 22.5,
                        "regularMarketTime": 1760680800,
                        "chartPreviousClose": 22.0,
                        "previousClose": 21.9
                    },
                    "timestamp": [1760666400, 1760670000, 1760673600],
                    "indicators": {
                        "quote": [{
                            "open": [22.1, 22.2, null],
                            "close": [22.2, null, 22.45],
                            "high": [22.3, 22.4, 22.5],
                            "volume": [100, 200, 300]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_chart_to_quote() {
        let res: ChartResponse = serde_json::from_value(chart_json()).unwrap();
        let quote = res.into_result("NDQ.AX").unwrap().into_quote("NDQ.AX");
        assert!(quote.is_ok());
        let quote = quote.unwrap();
        assert_eq!(quote.last_price, dec!(22.5));
        assert_eq!(quote.currency, Some("AUD".to_string()));
        assert_eq!(quote.previous_close, Some(dec!(22)));
        assert_eq!(quote.open, Some(dec!(22.2)));
        assert_eq!(quote.timestamp.timestamp(), 1760680800);
    }

    #[test]
    fn test_chart_to_price_points() {
        let res: ChartResponse = serde_json::from_value(chart_json()).unwrap();
        let points = res.into_result("NDQ.AX").unwrap().into_price_points();
        assert_eq!(
            points,
            vec![
                PricePoint {
                    time: 1760666400,
                    close: dec!(22.2)
                },
                PricePoint {
                    time: 1760673600,
                    close: dec!(22.45)
                },
            ]
        );
    }

    #[test]
    fn test_price_falls_back_to_last_close() {
        let mut json = chart_json();
        json["chart"]["result"][0]["meta"]["regularMarketPrice"] = json!(null);
        let res: ChartResponse = serde_json::from_value(json).unwrap();
        let quote = res.into_result("NDQ.AX").unwrap().into_quote("NDQ.AX").unwrap();
        assert_eq!(quote.last_price, dec!(22.45));
    }

    #[test]
    fn test_pence_quotes_in_pounds() {
        let mut json = chart_json();
        let meta = &mut json["chart"]["result"][0]["meta"];
        meta["currency"] = json!("GBp");
        meta["symbol"] = json!("VOD.L");
        meta["regularMarketPrice"] = json!(7250.0);
        meta["chartPreviousClose"] = json!(7200.0);
        json["chart"]["result"][0]["indicators"]["quote"][0]["close"] = json!([7100.0, null, 7245.5]);

        let res: ChartResponse = serde_json::from_value(json.clone()).unwrap();
        let quote = res.into_result("VOD.L").unwrap().into_quote("VOD.L").unwrap();
        assert_eq!(quote.currency, Some("GBP".to_string()));
        assert_eq!(quote.last_price, dec!(72.5));
        assert_eq!(quote.previous_close, Some(dec!(72)));

        let res: ChartResponse = serde_json::from_value(json).unwrap();
        let points = res.into_result("VOD.L").unwrap().into_price_points();
        assert_eq!(points[0].close, dec!(71));
        assert_eq!(points[1].close, dec!(72.455));
    }

    #[test]
    fn test_chart_errors() {
        let json = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let res: ChartResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            res.into_result("NOPE.AX"),
            Err(MarketDataError::NotFound(ticker)) if ticker == "NOPE.AX"
        ));

        let json = json!({"chart": {"result": [], "error": null}});
        let res: ChartResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            res.into_result("NOPE.AX"),
            Err(MarketDataError::NotFound(_))
        ));

        let json = json!({"chart": {"result": null, "error": {"code": "Too Many Requests"}}});
        let res: ChartResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            res.into_result("NDQ.AX"),
            Err(MarketDataError::RateLimited)
        ));
    }
}
