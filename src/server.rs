use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ws::Message, ws::WebSocket, Path, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post, put},
    Json, Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use tokio::{
    select,
    sync::{
        broadcast::{error::RecvError, Sender},
        Notify, RwLock,
    },
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace};

use crate::{
    config::LiveDashboard,
    holding::Holding,
    portfolio::HoldingsError,
    state::{self, Notice},
    valuation::PortfolioView,
    AppCommandEvent, AppEvent,
};

struct ServerState {
    app_tx: Sender<AppEvent>,
    app_state: Arc<RwLock<state::State>>,
    dashboard: Arc<LiveDashboard>,
    refresh: Arc<Notify>,
}

type SharedServerState = Arc<ServerState>;

pub struct ApiError(HoldingsError);

impl From<HoldingsError> for ApiError {
    fn from(err: HoldingsError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HoldingsError::Format(_) => StatusCode::BAD_REQUEST,
            HoldingsError::NotFound(_) => StatusCode::NOT_FOUND,
            HoldingsError::Duplicate(_) => StatusCode::CONFLICT,
            HoldingsError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn start(
    address: String,
    app_state: Arc<RwLock<state::State>>,
    dashboard: LiveDashboard,
    app_tx: Sender<AppEvent>,
    refresh_every: Duration,
) -> Result<()> {
    let state = Arc::from(ServerState {
        app_tx,
        app_state,
        dashboard: Arc::new(dashboard),
        refresh: Arc::new(Notify::new()),
    });

    tokio::task::spawn({
        let state = state.clone();
        async move { render_loop(state, refresh_every).await }
    });

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn router(state: SharedServerState) -> Router {
    Router::new()
        .route("/api/holdings", get(list_holdings).post(add_holding))
        .route(
            "/api/holdings/{ticker}",
            put(update_holding).delete(remove_holding),
        )
        .route("/api/holdings/import", post(import_holdings))
        .route("/api/holdings/export", get(export_holdings))
        .route("/api/holdings/save", post(save_holdings))
        .route("/api/holdings/reload", post(reload_holdings))
        .route("/api/portfolio", get(get_portfolio))
        .route("/ws", any(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Re-renders on every tick and every applied command.
async fn render_loop(state: SharedServerState, refresh_every: Duration) {
    let mut interval = tokio::time::interval(refresh_every);
    loop {
        select! {
            _ = interval.tick() => trace!("refresh tick"),
            _ = state.refresh.notified() => trace!("refresh requested"),
        }
        state::refresh(&state.app_state, &state.dashboard, &state.app_tx).await;
    }
}

async fn dispatch(
    state: &SharedServerState,
    command: AppCommandEvent,
) -> Result<String, HoldingsError> {
    let result = state::dispatch(&state.app_state, command, &state.app_tx).await;
    if result.is_ok() {
        state.refresh.notify_one();
    }
    result
}

async fn list_holdings(State(state): State<SharedServerState>) -> Json<Vec<Holding>> {
    Json(state.app_state.read().await.holdings.snapshot())
}

async fn add_holding(
    State(state): State<SharedServerState>,
    Json(holding): Json<Holding>,
) -> Result<impl IntoResponse, ApiError> {
    let message = dispatch(&state, AppCommandEvent::Add(holding)).await?;
    Ok((StatusCode::CREATED, Json(Notice::info(message))))
}

async fn update_holding(
    State(state): State<SharedServerState>,
    Path(ticker): Path<String>,
    Json(holding): Json<Holding>,
) -> Result<Json<Notice>, ApiError> {
    let holding = Holding { ticker, ..holding };
    let message = dispatch(&state, AppCommandEvent::Update(holding)).await?;
    Ok(Json(Notice::info(message)))
}

async fn remove_holding(
    State(state): State<SharedServerState>,
    Path(ticker): Path<String>,
) -> Result<Json<Notice>, ApiError> {
    let message = dispatch(&state, AppCommandEvent::Remove(ticker)).await?;
    Ok(Json(Notice::info(message)))
}

async fn import_holdings(
    State(state): State<SharedServerState>,
    body: Bytes,
) -> Result<Json<Notice>, ApiError> {
    let document = String::from_utf8(body.to_vec())
        .map_err(|e| HoldingsError::Format(format!("Upload is not UTF-8: {}", e)))?;
    let message = dispatch(&state, AppCommandEvent::Import(document)).await?;
    Ok(Json(Notice::info(message)))
}

async fn export_holdings(State(state): State<SharedServerState>) -> Result<Response, ApiError> {
    let bytes = state.app_state.read().await.holdings.export()?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"holdings.json\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn save_holdings(State(state): State<SharedServerState>) -> Result<Json<Notice>, ApiError> {
    let message = dispatch(&state, AppCommandEvent::Save).await?;
    Ok(Json(Notice::info(message)))
}

async fn reload_holdings(
    State(state): State<SharedServerState>,
) -> Result<Json<Notice>, ApiError> {
    let message = dispatch(&state, AppCommandEvent::Reload).await?;
    Ok(Json(Notice::info(message)))
}

async fn get_portfolio(State(state): State<SharedServerState>) -> Json<PortfolioView> {
    let view = state.app_state.read().await.view.clone();
    match view {
        Some(view) => Json(view),
        None => Json(state::refresh(&state.app_state, &state.dashboard, &state.app_tx).await),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn to_message(event: &AppEvent) -> Option<Message> {
    match serde_json::ser::to_string(event) {
        Ok(msg) => Some(Message::Text(msg.into())),
        Err(err) => {
            error!("Failed to serialize event : {}", err);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: SharedServerState) {
    let mut app_rx = state.app_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    // send holdings and the last view
    let initial = {
        let app_state = state.app_state.read().await;
        let mut events = vec![AppEvent::Holdings(app_state.holdings.snapshot())];
        if let Some(view) = &app_state.view {
            events.push(AppEvent::Portfolio(view.clone()));
        }
        events
    };
    for event in initial.iter() {
        if let Some(msg) = to_message(event) {
            if sender.send(msg).await.is_err() {
                return;
            }
        }
    }

    let mut send_task = tokio::task::spawn(async move {
        loop {
            let event = match app_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Websocket client lagging, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            };
            let Some(msg) = to_message(&event) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                return;
            }
        }
    });

    let mut recv_task = tokio::task::spawn({
        let state = state.clone();
        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => {
                        match serde_json::de::from_str::<AppCommandEvent>(text.as_str()) {
                            Ok(command) => {
                                debug!("Received command : {:?}", command);
                                let _ = dispatch(&state, command).await;
                            }
                            Err(err) => {
                                let _ = state.app_tx.send(AppEvent::Notice(Notice::error(
                                    format!("Invalid command: {}", err),
                                )));
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }
}
