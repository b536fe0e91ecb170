use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast::Sender, RwLock};
use tracing::{info, warn};

use crate::{
    dashboard::Dashboard,
    holding::normalize_ticker,
    market_data::MarketData,
    portfolio::{HoldingsError, HoldingsStore},
    valuation::PortfolioView,
    AppCommandEvent, AppEvent,
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Outcome of a command, shown inline by clients.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Session state: the holdings being edited and the last rendered view.
#[derive(Debug, Clone)]
pub struct State {
    pub holdings: HoldingsStore,
    pub holdings_path: PathBuf,
    pub view: Option<PortfolioView>,
}

impl State {
    pub fn new(holdings: HoldingsStore, holdings_path: PathBuf) -> Self {
        Self {
            holdings,
            holdings_path,
            view: None,
        }
    }

    pub async fn apply(&mut self, command: AppCommandEvent) -> Result<String, HoldingsError> {
        match command {
            AppCommandEvent::Add(holding) => {
                let ticker = normalize_ticker(&holding.ticker);
                self.holdings.add(holding)?;
                Ok(format!("Added {}", ticker))
            }
            AppCommandEvent::Update(holding) => {
                let ticker = normalize_ticker(&holding.ticker);
                self.holdings.update(holding)?;
                Ok(format!("Updated {}", ticker))
            }
            AppCommandEvent::Remove(ticker) => {
                let removed = self.holdings.remove(&ticker)?;
                Ok(format!("Removed {}", removed.ticker))
            }
            AppCommandEvent::Import(document) => {
                self.holdings = HoldingsStore::load(document.as_bytes())?;
                Ok(format!("Imported {} holdings", self.holdings.len()))
            }
            AppCommandEvent::Save => {
                self.holdings.save_file(&self.holdings_path).await?;
                Ok(format!("Saved to {}", self.holdings_path.display()))
            }
            AppCommandEvent::Reload => {
                self.holdings = HoldingsStore::read_file(&self.holdings_path).await?;
                Ok(format!(
                    "Reloaded {} holdings from {}",
                    self.holdings.len(),
                    self.holdings_path.display()
                ))
            }
            AppCommandEvent::Refresh => Ok("Refreshing".to_string()),
        }
    }

    /// Stores a new view, returning whether it differs from the previous one.
    pub fn set_view(&mut self, view: PortfolioView) -> bool {
        let changed = self
            .view
            .as_ref()
            .is_none_or(|previous| !previous.same_values(&view));
        self.view = Some(view);
        changed
    }
}

/// Applies a command and broadcasts its outcome. A failed command leaves the
/// holdings untouched.
pub async fn dispatch(
    state: &RwLock<State>,
    command: AppCommandEvent,
    tx: &Sender<AppEvent>,
) -> Result<String, HoldingsError> {
    let (result, holdings) = {
        let mut state = state.write().await;
        let result = state.apply(command).await;
        (result, state.holdings.snapshot())
    };

    match &result {
        Ok(message) => {
            info!("{}", message);
            let _ = tx.send(AppEvent::Notice(Notice::info(message.clone())));
            let _ = tx.send(AppEvent::Holdings(holdings));
        }
        Err(err) => {
            warn!("Command failed: {}", err);
            let _ = tx.send(AppEvent::Notice(Notice::error(err.to_string())));
        }
    }
    result
}

/// Renders the current holdings and broadcasts the view if its values
/// changed since the last render.
pub async fn refresh<M: MarketData + Send + Sync>(
    state: &RwLock<State>,
    dashboard: &Dashboard<M>,
    tx: &Sender<AppEvent>,
) -> PortfolioView {
    let holdings = state.read().await.holdings.snapshot();
    let view = dashboard.render(&holdings).await;

    let changed = state.write().await.set_view(view.clone());
    if changed {
        let _ = tx.send(AppEvent::Portfolio(view.clone()));
    }
    view
}
