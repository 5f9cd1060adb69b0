//! # huddle-store
//!
//! Narrow persistence boundary for session records.
//!
//! The store sees opaque string values under string keys, each with a TTL. It
//! never interprets session semantics, so the backing technology can change
//! without touching the session manager.
//!
//! Two atomic primitives close the races a plain get/set API leaves open:
//!
//! - [`SessionStore::set_if_absent`] arbitrates join-code collisions
//! - [`SessionStore::compare_and_swap`] serializes read-modify-write updates
//!
//! Backends: [`RedisStore`] for deployments, [`MemoryStore`] for development
//! and tests.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

pub use errors::{Result, StoreError};
pub use memory::MemoryStore;
pub use redis_store::{RedisConfig, RedisStore};

/// Outcome of [`SessionStore::compare_and_swap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched and was replaced.
    Swapped,
    /// The stored value changed since it was read; nothing written.
    Mismatch,
    /// No live entry under the key; nothing written.
    Missing,
}

/// Key-value persistence with expiry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the value under `key`, or [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<String>;

    /// Whether a live entry exists. No side effects.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Unconditionally write `value` and (re)arm its TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write only if no live entry exists. Returns `true` when written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Replace the value only if it is still exactly `expected`, re-arming the
    /// TTL on success.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<CasOutcome>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// Whole-second TTL as stores expect it. Sub-second TTLs round up to one second.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}
