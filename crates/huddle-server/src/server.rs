//! `HuddleServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use huddle_session::SessionManager;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::gateway;
use crate::health;
use crate::hub::{Hub, HubHandle};
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;
use crate::shutdown::{DrainReport, ShutdownCoordinator};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager, hub and deadline.
    pub ctx: Arc<RpcContext>,
    /// RPC method registry.
    pub registry: Arc<MethodRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The main Huddle server.
pub struct HuddleServer {
    config: Arc<ServerConfig>,
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl HuddleServer {
    /// Create a new server and start its hub. Must be called within a Tokio
    /// runtime.
    pub fn new(
        config: ServerConfig,
        sessions: Arc<SessionManager>,
        registry: MethodRegistry,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout()));
        let (hub, hub_task) = Hub::spawn(config.max_connections, shutdown.token());
        shutdown.track("hub", hub_task);
        let ctx = RpcContext {
            sessions,
            hub,
            server_start_time: Instant::now(),
            request_timeout: config.request_timeout(),
        };
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            shutdown,
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: Arc::clone(&self.ctx),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/rpc", post(gateway::rpc))
            .route("/api/v1/session/new", post(gateway::create_session))
            .route("/api/v1/session/join", post(gateway::join_session))
            .route("/ws/{game}/{code}/{user}", get(gateway::ws_upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0). The serve task is
    /// drained by [`stop`](Self::stop) before the hub.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(%addr, "huddle server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        self.shutdown.track("listener", handle);
        Ok(addr)
    }

    /// Get the hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.ctx.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Stop accepting connections, let the hub close live sockets, and
    /// wait for both within the configured deadline.
    pub async fn stop(self) -> DrainReport {
        self.shutdown.drain().await
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    let report = health::check(&state.ctx, state.shutdown.is_shutting_down()).await;
    (report.status_code(), Json(report)).into_response()
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
