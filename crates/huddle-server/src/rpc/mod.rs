//! JSON RPC envelope, method registry and handlers.

pub mod context;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;
