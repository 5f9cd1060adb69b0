//! Layered settings loading.
//!
//! Loading flow, later layers win:
//! 1. Compiled [`HuddleSettings::default()`]
//! 2. JSON settings file, when it exists
//! 3. `HUDDLE_*` environment variables, nested with `__`
//!
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::HuddleSettings;

/// Environment variable naming an alternate settings file.
pub const CONFIG_ENV: &str = "HUDDLE_CONFIG";

/// Resolve the settings file path: `HUDDLE_CONFIG`, else
/// `~/.huddle/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".huddle").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HuddleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file with env var overrides.
///
/// A missing file contributes nothing. A file with invalid JSON or values of
/// the wrong type is an error, as is any value [`validate`] rejects.
pub fn load_settings_from_path(path: &Path) -> Result<HuddleSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }
    let settings: HuddleSettings = figment(path).extract()?;
    validate(&settings)?;
    Ok(settings)
}

/// The provider stack behind [`load_settings_from_path`].
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(HuddleSettings::default()))
        .merge(Json::file(path))
        .merge(
            Env::prefixed("HUDDLE_")
                .ignore(&["config", "env"])
                .split("__"),
        )
}

/// Reject settings the service cannot run with.
pub fn validate(settings: &HuddleSettings) -> Result<()> {
    let server = &settings.server;
    let session = &settings.session;
    let store = &settings.store;

    check(!server.public_host.trim().is_empty(), "server.public_host must not be empty")?;
    check(server.max_connections > 0, "server.max_connections must be at least 1")?;
    check(server.outbound_queue > 0, "server.outbound_queue must be at least 1")?;
    check(server.max_message_size >= 1024, "server.max_message_size must be at least 1024")?;
    check(server.request_timeout_secs > 0, "server.request_timeout_secs must be at least 1")?;
    check(server.shutdown_timeout_secs > 0, "server.shutdown_timeout_secs must be at least 1")?;
    check(
        server.heartbeat_interval_secs > 0
            && server.heartbeat_timeout_secs > server.heartbeat_interval_secs,
        "server.heartbeat_timeout_secs must exceed a non-zero heartbeat_interval_secs",
    )?;
    check(
        server.tls.cert_path.is_some() == server.tls.key_path.is_some(),
        "server.tls.cert_path and server.tls.key_path must be set together",
    )?;

    check(
        (3..=12).contains(&session.code_length),
        "session.code_length must be between 3 and 12",
    )?;
    check(session.lobby_ttl_secs > 0, "session.lobby_ttl_secs must be at least 1")?;
    check(session.joined_ttl_secs > 0, "session.joined_ttl_secs must be at least 1")?;
    check(session.max_code_attempts > 0, "session.max_code_attempts must be at least 1")?;
    check(!session.games.is_empty(), "session.games must list at least one game type")?;

    check(!store.address.trim().is_empty(), "store.address must not be empty")?;
    check(store.op_timeout_ms > 0, "store.op_timeout_ms must be at least 1")?;
    Ok(())
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(message.to_owned()))
    }
}
