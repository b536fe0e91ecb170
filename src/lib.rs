use holding::Holding;
use serde::{Deserialize, Serialize};
use state::Notice;
use valuation::PortfolioView;

pub mod config;
pub mod dashboard;
pub mod fx;
pub mod holding;
pub mod market_data;
pub mod portfolio;
pub mod server;
pub mod state;
pub mod tui;
pub mod utils;
pub mod valuation;

/// Events pushed from the server to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum AppEvent {
    Holdings(Vec<Holding>),
    Portfolio(PortfolioView),
    Notice(Notice),
}

/// User input sent from clients to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum AppCommandEvent {
    Add(Holding),
    Update(Holding),
    Remove(String),
    /// Replace all holdings with an uploaded holdings document.
    Import(String),
    Save,
    Reload,
    Refresh,
}
