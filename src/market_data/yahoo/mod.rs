use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, error};

use crate::market_data::{MarketData, MarketDataError, PricePoint, Quote};

mod chart;

use chart::{ChartResponse, ChartResult};

pub const ENDPOINT: &str = "https://query1.finance.yahoo.com";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Yahoo {
    client: Client,
    endpoint: String,
}

impl Yahoo {
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, symbol: &str, interval: &str) -> Result<Url, MarketDataError> {
        let params = [("interval", interval), ("range", "1d")];
        Url::parse_with_params(
            &format!(
                "{}/v8/finance/chart/{}",
                self.endpoint,
                urlencoding::encode(symbol)
            ),
            &params,
        )
        .map_err(|e| MarketDataError::Parse(format!("Invalid chart url for {}: {}", symbol, e)))
    }

    async fn get_chart(&self, symbol: &str, interval: &str) -> Result<ChartResult, MarketDataError> {
        let url = self.chart_url(symbol, interval)?;
        debug!("{}", url);

        let r = self.client.get(url).send().await?;
        let status = r.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited);
        }

        let body = r.text().await?;
        match serde_json::from_str::<ChartResponse>(&body) {
            Ok(chart) => chart.into_result(symbol),
            Err(_) if status == StatusCode::NOT_FOUND => {
                Err(MarketDataError::NotFound(symbol.to_string()))
            }
            Err(err) => {
                error!("Unexpected chart response for {} ({}): {}", symbol, status, body);
                Err(MarketDataError::Parse(err.to_string()))
            }
        }
    }
}

impl MarketData for Yahoo {
    async fn get_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        self.get_chart(ticker, "1d").await?.into_quote(ticker)
    }

    async fn get_history(&self, ticker: &str) -> Result<Vec<PricePoint>, MarketDataError> {
        Ok(self.get_chart(ticker, "1h").await?.into_price_points())
    }
}
