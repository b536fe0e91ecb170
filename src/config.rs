use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use crate::dashboard::Dashboard;
use crate::market_data::cache::{CacheTtl, CachedMarketData};
use crate::market_data::fixed::FixedMarketData;
use crate::market_data::simulation::SimulationMarketData;
use crate::market_data::yahoo::{self, Yahoo};
use crate::market_data::Provider;

pub type LiveDashboard = Dashboard<CachedMarketData<Provider>>;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
    Yahoo,
    Simulation,
    Fixed,
}

/// Where holdings live and how they are priced.
#[derive(Args, Debug, Clone)]
pub struct MarketArgs {
    #[arg(long, env = "HOLDINGS_PATH", default_value = "holdings.json")]
    pub holdings_path: PathBuf,
    #[arg(long, env = "DISPLAY_CURRENCY", default_value = "AUD")]
    pub display_currency: String,
    #[arg(long, env = "MARKET_DATA_PROVIDER", default_value_t = ProviderKind::Yahoo)]
    pub provider: ProviderKind,
    /// Quotes file for the `fixed` provider.
    #[arg(long, env = "QUOTES_PATH")]
    pub quotes_path: Option<PathBuf>,
    #[arg(long, env = "YAHOO_ENDPOINT", default_value = yahoo::ENDPOINT)]
    pub yahoo_endpoint: String,
    #[arg(long, env = "QUOTE_TTL_SECS", default_value_t = 60)]
    pub quote_ttl_secs: u64,
    #[arg(long, env = "FX_TTL_SECS", default_value_t = 120)]
    pub fx_ttl_secs: u64,
    #[arg(long, env = "HISTORY_TTL_SECS", default_value_t = 300)]
    pub history_ttl_secs: u64,
}

impl MarketArgs {
    pub fn cache_ttl(&self) -> CacheTtl {
        CacheTtl {
            quotes: Duration::from_secs(self.quote_ttl_secs),
            fx: Duration::from_secs(self.fx_ttl_secs),
            history: Duration::from_secs(self.history_ttl_secs),
        }
    }

    pub async fn provider(&self) -> Result<Provider> {
        Ok(match self.provider {
            ProviderKind::Yahoo => Provider::Yahoo(Yahoo::new(&self.yahoo_endpoint)?),
            ProviderKind::Simulation => Provider::Simulation(SimulationMarketData::new()),
            ProviderKind::Fixed => {
                let path = self
                    .quotes_path
                    .as_ref()
                    .context("The fixed provider needs --quotes-path")?;
                Provider::Fixed(FixedMarketData::from_file(path).await?)
            }
        })
    }

    pub async fn dashboard(&self) -> Result<LiveDashboard> {
        let market = CachedMarketData::new(self.provider().await?, self.cache_ttl());
        Ok(Dashboard::new(market, &self.display_currency))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    #[arg(long, env = "SERVER_ADDRESS", default_value = "127.0.0.1:5555")]
    pub server_address: String,
    /// Seconds between automatic refreshes.
    #[arg(
        long,
        env = "REFRESH_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(30..=600)
    )]
    pub refresh_secs: u64,
}

impl ServerArgs {
    pub fn refresh_every(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}
