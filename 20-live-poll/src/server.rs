//! HTTP surface: the socket upgrade plus the admin endpoints.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, header::HOST},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::AuthGate,
    connection::{self, ConnectionConfig},
    hub::{self, HubHandle},
    tally::TallyStore,
};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub tally: Arc<TallyStore>,
    pub hub: HubHandle,
    pub gate: Arc<dyn AuthGate>,
    pub connection: ConnectionConfig,
}

impl AppState {
    /// Creates a fresh tally and starts a hub subscribed to it.
    pub fn new(gate: impl AuthGate + 'static, connection: ConnectionConfig) -> Self {
        let tally = Arc::new(TallyStore::new());
        let hub = hub::spawn(Arc::clone(&tally));
        Self {
            tally,
            hub,
            gate: Arc::new(gate),
            connection,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/socket", get(socket_handler))
        .route("/vote_open", post(vote_open))
        .route("/vote_close", post(vote_close))
        .route("/dump_votes", get(dump_votes))
        .route("/socket_url", get(socket_url))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        gate: impl AuthGate + 'static,
        connection: ConnectionConfig,
    ) -> Self {
        Self {
            listener,
            state: AppState::new(gate, connection),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server { listener, state } = self;
        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("http server failed")?;
        info!("server shut down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn socket_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            warn!(error = %rejection, "could not upgrade connection");
            return rejection.into_response();
        }
    };

    let AppState {
        hub, connection, ..
    } = state;
    upgrade
        .max_message_size(connection.max_message_size)
        .on_upgrade(move |socket| connection::serve(socket, hub, connection))
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "no").into_response()
}

async fn vote_open(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.gate.is_authorized(&headers) {
        return forbidden();
    }
    state.tally.open();
    StatusCode::OK.into_response()
}

async fn vote_close(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.gate.is_authorized(&headers) {
        return forbidden();
    }
    state.tally.close();
    StatusCode::OK.into_response()
}

async fn dump_votes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.gate.is_authorized(&headers) {
        return forbidden();
    }
    Json(state.tally.snapshot()).into_response()
}

/// Tells the browser client where to open its socket, honouring TLS
/// termination in front of the server.
async fn socket_url(headers: HeaderMap) -> Json<serde_json::Value> {
    let forwarded_https = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
    let protocol = if forwarded_https { "wss" } else { "ws" };
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");

    Json(json!({ "socket_url": format!("{protocol}://{host}/socket") }))
}

async fn health(State(state): State<AppState>) -> Response {
    match state.hub.connection_count().await {
        Ok(connections) => Json(json!({ "status": "ok", "connections": connections })).into_response(),
        Err(err) => {
            warn!(error = ?err, "health check could not reach hub");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
