//! `/health`: hub liveness and session store reachability.
//!
//! The report is `ok` only when the hub answers and a store round-trip
//! succeeds inside [`CHECK_TIMEOUT`]. Anything else is `degraded`, and a
//! server that has begun shutting down reports `draining`. Both are served
//! with 503 so a load balancer stops sending new players here.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use tokio::time::Instant;

use crate::deadline::with_deadline;
use crate::hub::HubStats;
use crate::rpc::context::RpcContext;

/// Upper bound on each check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Overall verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Hub and store both answered.
    Ok,
    /// The hub or the store did not answer.
    Degraded,
    /// Shutdown has begun.
    Draining,
}

/// Result of the store round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    /// Backend name.
    pub backend: &'static str,
    /// Whether the round-trip succeeded.
    pub reachable: bool,
    /// Round-trip time, when reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Client-safe failure description, when unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /health`.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Whether the hub task answered.
    pub hub_running: bool,
    /// Live connections registered in the hub.
    pub connections: usize,
    /// Sessions with at least one live connection.
    pub active_sessions: usize,
    /// Store round-trip.
    pub store: StoreHealth,
}

impl HealthReport {
    /// 200 when healthy, 503 otherwise.
    pub fn status_code(&self) -> StatusCode {
        match self.status {
            HealthStatus::Ok => StatusCode::OK,
            HealthStatus::Degraded | HealthStatus::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Query the hub and the store concurrently and fold the answers.
pub async fn check(ctx: &RpcContext, draining: bool) -> HealthReport {
    let (hub, store) = tokio::join!(
        tokio::time::timeout(CHECK_TIMEOUT, ctx.hub.stats()),
        check_store(ctx)
    );
    let hub: Option<HubStats> = hub.ok().and_then(Result::ok);
    let hub_running = hub.is_some();
    let stats = hub.unwrap_or_default();

    let status = if draining {
        HealthStatus::Draining
    } else if hub_running && store.reachable {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        uptime_secs: ctx.server_start_time.elapsed().as_secs(),
        hub_running,
        connections: stats.connections,
        active_sessions: stats.sessions,
        store,
    }
}

async fn check_store(ctx: &RpcContext) -> StoreHealth {
    let sessions = Arc::clone(&ctx.sessions);
    let started = Instant::now();
    let result = with_deadline(CHECK_TIMEOUT, async move { sessions.ping_store().await }).await;
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(()) => StoreHealth {
            backend: ctx.sessions.store_backend(),
            reachable: true,
            latency_ms: Some(elapsed),
            error: None,
        },
        Err(e) => StoreHealth {
            backend: ctx.sessions.store_backend(),
            reachable: false,
            latency_ms: None,
            error: Some(e.public_message()),
        },
    }
}
