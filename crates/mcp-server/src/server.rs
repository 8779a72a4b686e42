//! `McpServer`: Axum HTTP discovery plus the WebSocket transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use mcp_core::{EventBus, EventKind};
use mcp_rpc::{Processor, Registry};
use metrics::counter;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::AuthProvider;
use crate::config::ServerConfig;
use crate::discovery::{self, DiscoveryResponse, ServerInfo, WEBSOCKET_PATH};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::ConnectionTable;
use crate::websocket::handler::FrameHandler;
use crate::websocket::session::{self, CLOSE_NORMAL, SessionContext};

/// How long the listener waits for sessions to close after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Resource registry.
    pub registry: Arc<Registry>,
    /// Live connections.
    pub connections: Arc<ConnectionTable>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// Per-session dependencies.
    pub sessions: Arc<SessionContext>,
    /// When the server started.
    pub start_time: Instant,
}

/// The MCP gateway server.
pub struct McpServer {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    processor: Processor,
    events: Arc<EventBus>,
    auth: Option<Arc<dyn AuthProvider>>,
    connections: Arc<ConnectionTable>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
}

impl McpServer {
    /// Create a server over an existing registry and dispatcher.
    pub fn new(config: ServerConfig, registry: Arc<Registry>, processor: Processor, events: Arc<EventBus>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            processor,
            events,
            auth: None,
            connections: Arc::new(ConnectionTable::new()),
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
        }
    }

    /// Require every connection to authenticate with `provider` before
    /// sending requests.
    #[must_use]
    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let frames = Arc::new(FrameHandler::new(
            self.processor.clone(),
            self.auth.clone(),
            Arc::clone(&self.events),
        ));
        let sessions = Arc::new(SessionContext {
            connections: Arc::clone(&self.connections),
            frames,
            events: Arc::clone(&self.events),
            shutdown: self.shutdown.token(),
            server_name: self.config.name.clone(),
            heartbeat_interval: self.config.heartbeat_interval(),
            heartbeat_timeout: self.config.heartbeat_timeout(),
            send_queue_capacity: self.config.send_queue_capacity,
        });
        let state = AppState {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            connections: Arc::clone(&self.connections),
            shutdown: self.shutdown.clone(),
            sessions,
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/mcp", get(discovery_handler))
            .route("/mcp/resources/{id}", get(resource_handler))
            .route(WEBSOCKET_PATH, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve in the background.
    ///
    /// The returned task ends once [`McpServer::shutdown`] has run and the
    /// open sessions have closed (or the drain timeout passed).
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, name = %self.config.name, "MCP server listening");
        let _ = self.events.dispatch(
            EventKind::ServerStarted,
            json!({ "address": local_addr.to_string() }),
        );

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let connections = Arc::clone(&self.connections);
        let handle = tokio::spawn(async move {
            let drained = async move {
                token.cancelled().await;
                drain(&connections).await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(drained).await {
                warn!(error = %e, "server error");
            }
            info!("MCP server stopped");
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting upgrades and signal every session to close.
    ///
    /// Each session stops reading, answers the frames it already received,
    /// then closes with a normal closure. Handler calls are never aborted.
    pub async fn shutdown(&self) {
        if self.shutdown.is_shutting_down() {
            return;
        }
        let _ = self.events.dispatch(EventKind::ServerStopping, json!({}));
        self.shutdown.shutdown();
        let open = self.connections.connection_count().await;
        info!(open, "shutdown requested");
    }

    /// Live connection table.
    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Resource registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Lifecycle event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}

/// Wait for sessions to finish, then close whatever is left.
async fn drain(connections: &ConnectionTable) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        let remaining = connections.connection_count().await;
        if remaining == 0 {
            return;
        }
        if Instant::now() >= deadline {
            warn!(remaining, "sessions still open after drain timeout, closing");
            let _ = connections.close_all(CLOSE_NORMAL, "server shutdown").await;
            return;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

fn server_info(state: &AppState) -> ServerInfo {
    ServerInfo {
        name: state.config.name.clone(),
        version: state.config.version.clone(),
        websocket: WEBSOCKET_PATH.into(),
        auth_required: state.sessions.frames.auth_required(),
    }
}

fn unavailable(message: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": { "message": message, "code": "unavailable" } })),
    )
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.connection_count().await;
    Json(health::health_check(state.start_time, connections, state.registry.len()))
}

/// GET /mcp
async fn discovery_handler(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(discovery::discovery(server_info(&state), &state.registry))
}

/// GET /mcp/resources/{id}
async fn resource_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match discovery::resource_detail(&state.registry, &id) {
        Some(detail) => Json(detail).into_response(),
        None => (StatusCode::NOT_FOUND, Json(discovery::not_found_body(&id))).into_response(),
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return unavailable("Server is shutting down");
    }
    let live = state.connections.connection_count().await;
    if live >= state.config.max_connections {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(live, max = state.config.max_connections, "rejecting connection over capacity");
        return unavailable("Server at capacity");
    }

    let sessions = Arc::clone(&state.sessions);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| session::run_ws_session(socket, sessions, Some(remote_addr)))
}
