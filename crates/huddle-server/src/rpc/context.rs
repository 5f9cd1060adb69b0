//! RPC dependency-injection context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use huddle_session::SessionManager;

use crate::hub::HubHandle;

/// Shared context passed to every RPC handler and HTTP route.
pub struct RpcContext {
    /// Session lifecycle manager.
    pub sessions: Arc<SessionManager>,
    /// Mailbox of the connection hub.
    pub hub: HubHandle,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
    /// Deadline applied to each session call.
    pub request_timeout: Duration,
}
