use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::select;
use tokio::sync::RwLock;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tungstenite::Message;

use portfolio_dashboard::config::{MarketArgs, ServerArgs};
use portfolio_dashboard::holding::Holding;
use portfolio_dashboard::portfolio::{HoldingsError, HoldingsStore};
use portfolio_dashboard::tui::app::App;
use portfolio_dashboard::utils::{format_money, format_pct, format_price};
use portfolio_dashboard::valuation::PortfolioView;
use portfolio_dashboard::*;

#[derive(Parser, Debug)]
#[command(about = "Personal portfolio dashboard")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API and websocket to clients
    Serve {
        #[command(flatten)]
        market: MarketArgs,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Terminal client of a running server
    Tui {
        #[arg(long, env = "SERVER_ADDRESS", default_value = "127.0.0.1:5555")]
        server_address: String,
        #[arg(long, default_value = "dashboard-tui.log")]
        log_file: PathBuf,
    },
    /// Print the valued holdings once
    Show {
        #[command(flatten)]
        market: MarketArgs,
    },
    /// Add a holding to the holdings file
    Add {
        #[arg(long, env = "HOLDINGS_PATH", default_value = "holdings.json")]
        holdings_path: PathBuf,
        ticker: String,
        quantity: Decimal,
        average_cost: Decimal,
        #[arg(long)]
        currency: Option<String>,
        notes: Vec<String>,
    },
    /// Remove a holding from the holdings file
    Remove {
        #[arg(long, env = "HOLDINGS_PATH", default_value = "holdings.json")]
        holdings_path: PathBuf,
        ticker: String,
    },
    /// Check that a holdings file can be imported
    Validate { path: PathBuf },
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}=debug,portfolio_dashboard=debug,tower_http=debug,reqwest=debug",
            env!("CARGO_CRATE_NAME")
        )
        .into()
    });

    match log_file {
        // the terminal belongs to the tui
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    match &args.command {
        Commands::Tui { log_file, .. } => init_tracing(Some(log_file))?,
        _ => init_tracing(None)?,
    }

    match args.command {
        Commands::Serve { market, server } => run_serve(market, server).await,
        Commands::Tui { server_address, .. } => run_tui(server_address).await,
        Commands::Show { market } => run_show(market).await,
        Commands::Add {
            holdings_path,
            ticker,
            quantity,
            average_cost,
            currency,
            notes,
        } => {
            let mut holding =
                Holding::new(&ticker, quantity, average_cost).with_notes(&notes.join(" "));
            if let Some(currency) = currency {
                holding = holding.with_currency(&currency);
            }
            run_add(&holdings_path, holding).await
        }
        Commands::Remove {
            holdings_path,
            ticker,
        } => run_remove(&holdings_path, &ticker).await,
        Commands::Validate { path } => run_validate(&path).await,
    }
}

async fn run_serve(market: MarketArgs, server: ServerArgs) -> Result<()> {
    info!("{}", "STARTING DASHBOARD".green());

    let holdings = HoldingsStore::load_file(&market.holdings_path).await;
    let dashboard = market.dashboard().await?;
    info!(
        "Pricing {} holdings with {} in {}",
        holdings.len(),
        market.provider,
        dashboard.display_currency()
    );

    let app_state = Arc::new(RwLock::new(state::State::new(
        holdings,
        market.holdings_path.clone(),
    )));
    let (app_tx, _) = tokio::sync::broadcast::channel::<AppEvent>(100);

    server::start(
        server.server_address.clone(),
        app_state,
        dashboard,
        app_tx,
        server.refresh_every(),
    )
    .await
}

async fn run_tui(server_address: String) -> Result<()> {
    let (tx, rx) = tokio::sync::mpsc::channel::<AppEvent>(100);
    let (tx_cmd, mut rx_cmd) = tokio::sync::mpsc::channel::<AppCommandEvent>(100);
    let mut app = App::new(rx, tx_cmd);

    let ws_client_task = tokio::task::spawn(async move {
        // (re)connect loop
        loop {
            let stream;
            // wait for server
            loop {
                let url = format!("ws://{}/ws", server_address);
                match connect_async(url).await {
                    Ok(res) => {
                        stream = res.0;
                        break;
                    }
                    Err(err) => warn!("Cannot reach {} : {}", server_address, err),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            info!("Connected to {}", server_address);

            let (mut write, mut read) = stream.split();

            loop {
                select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(msg))) => {
                                match serde_json::de::from_slice::<AppEvent>(msg.as_bytes()) {
                                    Ok(event) => { let _ = tx.send(event).await; }
                                    Err(err) => error!("Unreadable event : {}", err),
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            _ => {}
                        }
                    }
                    Some(cmd) = rx_cmd.recv() => {
                        if let Ok(cmd) = serde_json::ser::to_string(&cmd) {
                            let _ = write.send(Message::Text(cmd.into())).await;
                        }
                    }
                }
            }

            // connection closed by server, wait before reconnecting
            warn!("Connection to {} lost", server_address);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    let app_task = tokio::task::spawn(async move { app.run().await });

    let result = select! {
        res = app_task => res.context("TUI task failed").and_then(|res| res),
        _ = ws_client_task => Ok(()),
    };

    ratatui::restore();

    result
}

async fn run_show(market: MarketArgs) -> Result<()> {
    let holdings = HoldingsStore::load_file(&market.holdings_path).await;
    let dashboard = market.dashboard().await?;
    let view = dashboard.render(holdings.holdings()).await;
    print_view(&view);
    Ok(())
}

fn colored_money(value: Decimal) -> colored::ColoredString {
    if value.is_sign_negative() {
        format_money(value).red()
    } else {
        format_money(value).green()
    }
}

fn print_view(view: &PortfolioView) {
    println!(
        "{}",
        format!(
            "{:<10} {:>12} {:>11} {:>11} {:>4} {:>12} {:>10} {:>8} {:>8}",
            "Ticker",
            "Qty",
            "Cost",
            "Price",
            "Ccy",
            format!("Value {}", view.display_currency),
            "P/L",
            "Day",
            "Hour"
        )
        .bold()
    );

    for row in view.rows.iter() {
        let gain_loss = match row.gain_loss {
            Some(gain_loss) => format!("{:>10}", colored_money(gain_loss)),
            None => format!("{:>10}", "-"),
        };
        println!(
            "{:<10} {:>12} {:>11} {:>11} {:>4} {:>12} {} {:>8} {:>8} {}",
            row.ticker.blue(),
            row.quantity.normalize().to_string(),
            format_price(Some(row.average_cost)),
            format_price(row.price),
            row.currency,
            row.market_value.map_or("-".to_string(), format_money),
            gain_loss,
            format_pct(row.intraday_pct),
            format_pct(row.hour_pct),
            row.error.as_deref().unwrap_or_default().red(),
        );
    }

    let totals = &view.totals;
    println!();
    println!(
        "Value {} {}  Cost {}  P/L {}  Day {}  Hour {}",
        view.display_currency,
        format_money(totals.market_value).yellow(),
        format_money(totals.cost_basis),
        colored_money(totals.gain_loss),
        colored_money(totals.intraday_move),
        colored_money(totals.hour_move),
    );
    for warning in view.warnings.iter() {
        println!("{}", warning.yellow());
    }
}

/// Reads the holdings file, starting empty when there is none yet.
async fn open_store(path: &Path) -> Result<HoldingsStore> {
    match HoldingsStore::read_file(path).await {
        Ok(store) => Ok(store),
        Err(HoldingsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok(HoldingsStore::new())
        }
        Err(err) => Err(err).with_context(|| format!("Cannot read {}", path.display())),
    }
}

async fn run_add(path: &Path, holding: Holding) -> Result<()> {
    let mut store = open_store(path).await?;
    let ticker = holding.ticker.clone();
    store.add(holding)?;
    store.save_file(path).await?;
    println!("{} {}", "Added".green(), ticker);
    Ok(())
}

async fn run_remove(path: &Path, ticker: &str) -> Result<()> {
    let mut store = open_store(path).await?;
    let removed = store.remove(ticker)?;
    store.save_file(path).await?;
    println!("{} {}", "Removed".red(), removed.ticker);
    Ok(())
}

async fn run_validate(path: &Path) -> Result<()> {
    match HoldingsStore::read_file(path).await {
        Ok(store) => {
            println!(
                "{} {} holds {} holdings",
                "OK".green(),
                path.display(),
                store.len()
            );
            Ok(())
        }
        Err(err) => {
            println!("{} {}", "INVALID".red(), err);
            Err(err.into())
        }
    }
}
