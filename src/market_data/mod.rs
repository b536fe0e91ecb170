use std::future::Future;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod fixed;
pub mod simulation;
pub mod yahoo;

use fixed::FixedMarketData;
use simulation::SimulationMarketData;
use yahoo::Yahoo;

/// Last known price of a ticker, fetched fresh for a render pass.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Quote {
    pub ticker: String,
    pub last_price: Decimal,
    /// Currency reported by the provider, if any.
    pub currency: Option<String>,
    pub previous_close: Option<Decimal>,
    pub open: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// One hourly close, `time` in unix seconds.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PricePoint {
    pub time: i64,
    pub close: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("No market data for {0}")]
    NotFound(String),
    #[error("Rate limited by market data provider")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Could not parse market data: {0}")]
    Parse(String),
}

pub trait MarketData {
    fn get_price(
        &self,
        ticker: &str,
    ) -> impl Future<Output = Result<Quote, MarketDataError>> + Send;

    /// Hourly closes over the last day, oldest first.
    fn get_history(
        &self,
        ticker: &str,
    ) -> impl Future<Output = Result<Vec<PricePoint>, MarketDataError>> + Send;
}

/// The provider selected at startup.
#[derive(Clone, Debug)]
pub enum Provider {
    Yahoo(Yahoo),
    Simulation(SimulationMarketData),
    Fixed(FixedMarketData),
}

impl MarketData for Provider {
    async fn get_price(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        match self {
            Provider::Yahoo(yahoo) => yahoo.get_price(ticker).await,
            Provider::Simulation(simulation) => simulation.get_price(ticker).await,
            Provider::Fixed(fixed) => fixed.get_price(ticker).await,
        }
    }

    async fn get_history(&self, ticker: &str) -> Result<Vec<PricePoint>, MarketDataError> {
        match self {
            Provider::Yahoo(yahoo) => yahoo.get_history(ticker).await,
            Provider::Simulation(simulation) => simulation.get_history(ticker).await,
            Provider::Fixed(fixed) => fixed.get_history(ticker).await,
        }
    }
}
