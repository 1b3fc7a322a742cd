//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use admincraft_core::{AdmissionGate, AuthError, TokenVerifier};
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cert;
use crate::config::ServerConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::process::ManagedProcess;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::SessionRegistry;
use crate::websocket::session::{SessionDeps, run_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dependencies handed to every session.
    pub sessions: Arc<SessionDeps>,
    /// Connection token verifier.
    pub verifier: Arc<TokenVerifier>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started (monotonic).
    pub start_time: Instant,
    /// When the server started (wall clock).
    pub started_at: DateTime<Utc>,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Certificate to serve at `/cert`; `None` when TLS mode is off.
    pub cert_path: Option<Arc<Path>>,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    sessions: Arc<SessionDeps>,
    verifier: Arc<TokenVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl RelayServer {
    /// Wire up the registry, dispatcher, and session dependencies.
    pub fn new(
        config: ServerConfig,
        verifier: TokenVerifier,
        process: Arc<dyn ManagedProcess>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            process.clone(),
            registry.clone(),
            config.restart_command.clone(),
        ));
        let sessions = Arc::new(SessionDeps {
            registry,
            dispatcher,
            process,
            gate: AdmissionGate::new(config.rate_limit_per_sec),
            send_queue: config.send_queue,
            tail_buffer: config.tail_buffer,
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            shutdown: shutdown.token(),
        });

        Self {
            config,
            sessions,
            verifier: Arc::new(verifier),
            shutdown,
            metrics,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Build the Axum router with all routes.
    ///
    /// The WebSocket endpoint answers on both `/` and `/ws`.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            verifier: self.verifier.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            started_at: self.started_at,
            metrics: self.metrics.clone(),
            cert_path: self
                .config
                .use_tls
                .then(|| Arc::from(self.config.cert_path.as_path())),
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/cert", get(cert_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            scheme = self.config.scheme(),
            tls = self.config.use_tls,
            "relay listening"
        );

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.sessions.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Query parameters on the upgrade request.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// GET / and GET /ws: verify the token, then upgrade.
///
/// Verification happens before the upgrade; a rejected client is still
/// upgraded so it can receive the authentication-failure close frame.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let auth = match params.token.as_deref() {
        Some(token) => state.verifier.verify(token),
        None => {
            warn!("connection attempt without token");
            Err(AuthError::MissingToken)
        }
    };

    let conn_id = Uuid::now_v7().to_string();
    let guard = state.shutdown.track_session();
    let deps = state.sessions.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let _guard = guard;
            run_session(socket, conn_id, auth, deps).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.sessions.registry.streaming_count().await;
    Json(health::health_check(
        state.start_time,
        state.started_at,
        sessions,
        state.cert_path.is_some(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /cert
async fn cert_handler(State(state): State<AppState>) -> Response {
    cert::serve_certificate(state.cert_path.as_deref()).await
}
