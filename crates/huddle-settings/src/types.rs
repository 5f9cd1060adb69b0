//! Settings shape and compiled defaults.
//!
//! Field names are `snake_case` in every layer: the JSON file uses them as-is
//! and environment variables map `HUDDLE_STORE__OP_TIMEOUT_MS` to
//! `store.op_timeout_ms`.

use std::path::PathBuf;
use std::time::Duration;

use huddle_core::AddressScheme;
use huddle_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuddleSettings {
    /// Listener, public address and live-connection limits.
    pub server: ServerSettings,
    /// Join codes, TTLs and retry bounds.
    pub session: SessionSettings,
    /// Session store backend.
    pub store: StoreSettings,
    /// Global log subscriber.
    pub logging: LoggingSettings,
}

/// Listener and connection-hub settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Host (and optional port) clients use to reach the upgrade endpoint.
    pub public_host: String,
    /// Scheme of handed-out connection addresses.
    pub address_scheme: AddressScheme,
    /// Live connections admitted at once.
    pub max_connections: usize,
    /// Ping interval.
    pub heartbeat_interval_secs: u64,
    /// A connection without a pong for this long is closed.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before it is evicted.
    pub outbound_queue: usize,
    /// Deadline for one RPC or HTTP session call.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for the listener and hub before aborting them.
    pub shutdown_timeout_secs: u64,
    /// Certificate paths handed to the TLS-terminating proxy.
    pub tls: TlsSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 50051,
            public_host: "localhost".into(),
            address_scheme: AddressScheme::Wss,
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
            request_timeout_secs: 10,
            shutdown_timeout_secs: 10,
            tls: TlsSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// TLS certificate and key locations. Both or neither.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM certificate chain.
    pub cert_path: Option<PathBuf>,
    /// PEM private key.
    pub key_path: Option<PathBuf>,
}

impl TlsSettings {
    /// Whether a certificate pair is configured.
    pub fn is_configured(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Session lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Characters per join code.
    pub code_length: usize,
    /// TTL written at creation.
    pub lobby_ttl_secs: u64,
    /// TTL re-armed by joins and phase changes.
    pub joined_ttl_secs: u64,
    /// Candidate codes tried per create.
    pub max_code_attempts: u32,
    /// Re-reads per update after a lost race.
    pub max_join_retries: u32,
    /// Game types a session may be created for.
    pub games: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            code_length: 5,
            lobby_ttl_secs: 3600,
            joined_ttl_secs: 18_000,
            max_code_attempts: 100,
            max_join_retries: 32,
            games: vec![huddle_core::game::KOOKY_QUIZ.to_owned()],
        }
    }
}

/// Which store implementation backs sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server.
    #[default]
    Redis,
    /// Process-local map; sessions die with the process.
    Memory,
}

/// Session store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Backend selector.
    pub backend: StoreBackend,
    /// `host:port` of the Redis server.
    pub address: String,
    /// Redis `AUTH` password.
    pub password: Option<String>,
    /// Redis logical database.
    pub database: i64,
    /// Initial connection deadline.
    pub connect_timeout_ms: u64,
    /// Per-command deadline.
    pub op_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            address: "redis-master:6379".into(),
            password: None,
            database: 0,
            connect_timeout_ms: 5000,
            op_timeout_ms: 2000,
        }
    }
}

/// Log subscriber settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 50051);
        assert_eq!(s.outbound_queue, 256);
        assert_eq!(s.request_timeout(), Duration::from_secs(10));
        assert_eq!(s.shutdown_timeout_secs, 10);
        assert_eq!(s.address_scheme, AddressScheme::Wss);
        assert!(!s.tls.is_configured());
    }

    #[test]
    fn session_defaults() {
        let s = SessionSettings::default();
        assert_eq!(s.code_length, 5);
        assert_eq!(s.lobby_ttl_secs, 3600);
        assert_eq!(s.joined_ttl_secs, 18_000);
        assert_eq!(s.max_code_attempts, 100);
        assert_eq!(s.games, ["kooky-quiz"]);
    }

    #[test]
    fn store_defaults() {
        let s = StoreSettings::default();
        assert_eq!(s.backend, StoreBackend::Redis);
        assert_eq!(s.address, "redis-master:6379");
        assert!(s.password.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: HuddleSettings =
            serde_json::from_str(r#"{"server":{"port":9000},"store":{"backend":"memory"}}"#)
                .unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.store.backend, StoreBackend::Memory);
        assert_eq!(s.session, SessionSettings::default());
    }

    #[test]
    fn tls_pair() {
        let tls = TlsSettings {
            cert_path: Some("/etc/tls/cert.pem".into()),
            key_path: Some("/etc/tls/key.pem".into()),
        };
        assert!(tls.is_configured());
    }
}
