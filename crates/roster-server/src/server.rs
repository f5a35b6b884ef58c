//! Axum server assembly: shared state, router, and startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use roster_core::ids::{ApiToken, ConnectionId};
use roster_directory::SqliteDirectory;
use roster_events::EventLog;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{bots, promotions};
use crate::config::ServerConfig;
use crate::gateway::handshake;
use crate::gateway::registry::ConnectionRegistry;
use crate::gateway::session::run_gateway_session;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from every handler.
#[derive(Clone)]
pub struct AppState {
    /// The bot directory (credential resolution + listing data).
    pub directory: Arc<SqliteDirectory>,
    /// The shared event log.
    pub events: Arc<EventLog>,
    /// Open gateway connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Server configuration.
    pub config: ServerConfig,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Assemble state around a directory and a fresh log/registry.
    pub fn new(config: ServerConfig, directory: Arc<SqliteDirectory>, metrics: PrometheusHandle) -> Self {
        Self {
            directory,
            events: Arc::new(EventLog::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            config,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/bots/stats", post(bots::post_stats))
        .route("/api/bots/maint", post(bots::post_maint))
        .route(
            "/api/promotion",
            get(promotions::get_promotions)
                .put(promotions::put_promotion)
                .patch(promotions::patch_promotion)
                .delete(promotions::delete_promotion),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Handle returned by [`start`] — keeps the accept loop alive.
pub struct ServerHandle {
    /// The bound address (useful with port `0`).
    pub addr: SocketAddr,
    /// Shutdown coordinator shared with the running server.
    pub shutdown: Arc<ShutdownCoordinator>,
    _server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// The bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Bind and start serving. Returns once the listener is bound.
pub async fn start(state: AppState) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = Arc::clone(&state.shutdown);
    let token = shutdown.token();
    let router = build_router(state);

    let server = tokio::spawn(async move {
        let graceful = async move { token.cancelled().await };
        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
            .ok();
    });

    info!(addr = %local_addr, "roster server started");

    Ok(ServerHandle {
        addr: local_addr,
        shutdown,
        _server: server,
    })
}

/// GET `/api/ws` — upgrade into a gateway session.
///
/// Repeated `api_token` query parameters are resolved before the upgrade;
/// any hit pre-authorizes the connection and skips the IDENTITY challenge.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<Vec<(String, String)>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tokens: Vec<ApiToken> = params
        .iter()
        .filter(|(key, _)| key == "api_token")
        .map(|(_, value)| ApiToken::new(value.clone()))
        .collect();
    let preauthorized = handshake::resolve_tokens(state.directory.as_ref(), &tokens).await;

    ws.on_upgrade(move |socket| {
        run_gateway_session(
            socket,
            ConnectionId::new(),
            preauthorized,
            Arc::clone(&state.registry),
            Arc::clone(&state.events),
            state.directory.clone(),
            state.config.clone(),
            state.shutdown.token(),
        )
    })
}

/// GET `/health`.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.registry.count(),
        state.events.pending_count(),
    );
    Json(resp)
}

/// GET `/metrics` — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
