//! # huddle-session
//!
//! Session lifecycle on top of a [`SessionStore`](huddle_store::SessionStore):
//!
//! - [`CodeGenerator`]: random join codes over a fixed alphabet
//! - [`SessionManager`]: create, join, phase changes and connection admission

#![deny(unsafe_code)]

pub mod code;
pub mod manager;

pub use code::{ALPHABET, CodeGenerator, DEFAULT_CODE_LENGTH};
pub use manager::{ClientContext, CreatedSession, JoinedSession, SessionConfig, SessionManager};
