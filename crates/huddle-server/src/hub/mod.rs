//! Connection hub: live connection registry, heartbeat, and per-socket loops.

pub mod connection;
pub mod coordinator;
pub mod heartbeat;
pub mod session;

pub use connection::{ClientConnection, ConnectionState, Delivery};
pub use coordinator::{Hub, HubError, HubHandle, HubStats};
pub use session::run_ws_session;
