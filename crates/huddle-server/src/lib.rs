//! # huddle-server
//!
//! Axum HTTP + `WebSocket` gateway and the connection hub.
//!
//! - HTTP endpoints: session create/join, health check, Prometheus metrics
//! - `POST /rpc`: JSON method dispatch through [`rpc::registry::MethodRegistry`]
//! - `WebSocket` gateway: authorization before upgrade, per-connection read
//!   and write loops, heartbeat
//! - Connection hub: a single task owning every live connection, fed through
//!   a mailbox, never blocking on a slow client
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod deadline;
pub mod gateway;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use server::HuddleServer;
