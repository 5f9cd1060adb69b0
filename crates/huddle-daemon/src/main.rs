//! # huddle-daemon
//!
//! Huddle session service binary. Loads settings, connects the session
//! store, and serves the HTTP/WebSocket gateway until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_core::logging::init_subscriber;
use huddle_core::{AddressBuilder, GameCatalog};
use huddle_server::config::ServerConfig;
use huddle_server::rpc::handlers::register_all;
use huddle_server::rpc::registry::MethodRegistry;
use huddle_server::server::HuddleServer;
use huddle_session::{CodeGenerator, SessionConfig, SessionManager};
use huddle_settings::{HuddleSettings, StoreBackend, StoreSettings};
use huddle_store::{MemoryStore, RedisConfig, RedisStore, SessionStore};
use tracing::{info, warn};

/// How often the in-memory backend drops expired sessions.
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Huddle session service.
#[derive(Parser, Debug)]
#[command(name = "huddled", about = "Multiplayer session and lobby service")]
struct Cli {
    /// Settings file (defaults to `HUDDLE_CONFIG` or `~/.huddle/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Host clients dial for live connections.
    #[arg(long, env = "KOOKY_HOSTNAME")]
    public_host: Option<String>,

    /// Characters per join code.
    #[arg(long = "game-code-size")]
    code_length: Option<usize>,

    /// Session store backend: `redis` or `memory`.
    #[arg(long, value_parser = parse_backend)]
    store: Option<StoreBackend>,

    /// Redis host name.
    #[arg(long)]
    redis_name: Option<String>,

    /// Redis port.
    #[arg(long)]
    redis_port: Option<u16>,

    /// Redis password.
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_pass: Option<String>,

    /// PEM certificate chain for the TLS-terminating proxy.
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the TLS-terminating proxy.
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_backend(raw: &str) -> std::result::Result<StoreBackend, String> {
    match raw.to_ascii_lowercase().as_str() {
        "redis" => Ok(StoreBackend::Redis),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(format!("unknown store backend '{other}' (expected redis or memory)")),
    }
}

impl Cli {
    /// Layer the flags over loaded settings. Unset flags leave settings alone.
    fn apply(&self, settings: &mut HuddleSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref public_host) = self.public_host {
            settings.server.public_host.clone_from(public_host);
        }
        if let Some(length) = self.code_length {
            settings.session.code_length = length;
        }
        if let Some(backend) = self.store {
            settings.store.backend = backend;
        }
        if self.redis_name.is_some() || self.redis_port.is_some() {
            settings.store.address = override_address(
                &settings.store.address,
                self.redis_name.as_deref(),
                self.redis_port,
            );
        }
        if let Some(ref password) = self.redis_pass {
            settings.store.password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if self.tls_cert.is_some() {
            settings.server.tls.cert_path.clone_from(&self.tls_cert);
        }
        if self.tls_key.is_some() {
            settings.server.tls.key_path.clone_from(&self.tls_key);
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Replace the host and/or port of a `host:port` address.
fn override_address(current: &str, host: Option<&str>, port: Option<u16>) -> String {
    let (current_host, current_port) = match current.rsplit_once(':') {
        Some((h, p)) => (h, p.parse().ok()),
        None => (current, None),
    };
    let host = host.unwrap_or(current_host);
    match port.or(current_port) {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

/// Load the settings file, apply flags, and validate the result.
fn resolve_settings(cli: &Cli) -> Result<HuddleSettings> {
    let path = cli.config.clone().unwrap_or_else(huddle_settings::settings_path);
    let mut settings = huddle_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    huddle_settings::validate(&settings).context("Invalid settings")?;
    Ok(settings)
}

fn redis_config(store: &StoreSettings) -> RedisConfig {
    RedisConfig {
        address: store.address.clone(),
        password: store.password.clone(),
        database: store.database,
        connect_timeout: Duration::from_millis(store.connect_timeout_ms),
        op_timeout: Duration::from_millis(store.op_timeout_ms),
    }
}

async fn build_store(store: &StoreSettings) -> Result<Arc<dyn SessionStore>> {
    match store.backend {
        StoreBackend::Memory => {
            warn!("using in-memory session store; sessions are lost on restart");
            let memory = Arc::new(MemoryStore::new());
            let _sweeper = memory.spawn_sweeper(MEMORY_SWEEP_INTERVAL);
            Ok(memory)
        }
        StoreBackend::Redis => {
            let redis = RedisStore::connect(&redis_config(store))
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", store.address))?;
            Ok(Arc::new(redis))
        }
    }
}

fn build_sessions(settings: &HuddleSettings, store: Arc<dyn SessionStore>) -> SessionManager {
    let session = &settings.session;
    let addresses = AddressBuilder::new(
        settings.server.address_scheme,
        settings.server.public_host.clone(),
    );
    SessionManager::new(store, addresses)
        .with_config(SessionConfig {
            lobby_ttl: Duration::from_secs(session.lobby_ttl_secs),
            joined_ttl: Duration::from_secs(session.joined_ttl_secs),
            max_code_attempts: session.max_code_attempts,
            max_join_retries: session.max_join_retries,
        })
        .with_codes(CodeGenerator::new(session.code_length))
        .with_games(GameCatalog::new(session.games.iter().cloned()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = match huddle_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    if settings.server.tls.is_configured() {
        info!("TLS certificate configured; termination happens at the fronting proxy");
    }

    let store = build_store(&settings.store).await?;
    let sessions = Arc::new(build_sessions(&settings, store));
    info!(
        backend = sessions.store_backend(),
        public_host = %settings.server.public_host,
        code_length = settings.session.code_length,
        "session manager ready"
    );

    let mut registry = MethodRegistry::new();
    register_all(&mut registry);

    let server = HuddleServer::new(
        ServerConfig::from(&settings.server),
        sessions,
        registry,
        metrics,
    );
    let addr = server.listen().await.context("Failed to bind server")?;
    info!(%addr, "huddle server listening");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    let report = server.stop().await;
    if report.is_clean() {
        info!("shutdown complete");
    } else {
        warn!(failed = ?report.failed, aborted = ?report.aborted, "shutdown incomplete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::AddressScheme;
    use huddle_session::ClientContext;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["huddled"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert!(cli.store.is_none());

        let mut settings = HuddleSettings::default();
        let before = settings.clone();
        Cli { public_host: None, redis_pass: None, ..cli }.apply(&mut settings);
        assert_eq!(settings, before);
    }

    #[test]
    fn cli_legacy_flag_names() {
        let cli = Cli::parse_from([
            "huddled",
            "--port",
            "7000",
            "--game-code-size",
            "6",
            "--redis-name",
            "cache",
            "--redis-port",
            "6380",
            "--redis-pass",
            "hunter2",
        ]);
        let mut settings = HuddleSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.session.code_length, 6);
        assert_eq!(settings.store.address, "cache:6380");
        assert_eq!(settings.store.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn cli_store_backend() {
        let cli = Cli::parse_from(["huddled", "--store", "memory"]);
        assert_eq!(cli.store, Some(StoreBackend::Memory));
        assert!(Cli::try_parse_from(["huddled", "--store", "sqlite"]).is_err());
    }

    #[test]
    fn cli_tls_and_public_host() {
        let cli = Cli::parse_from([
            "huddled",
            "--public-host",
            "play.example.com",
            "--tls-cert",
            "/etc/tls/cert.pem",
            "--tls-key",
            "/etc/tls/key.pem",
            "--log-level",
            "debug",
        ]);
        let mut settings = HuddleSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.public_host, "play.example.com");
        assert!(settings.server.tls.is_configured());
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn address_override_pieces() {
        assert_eq!(override_address("redis-master:6379", Some("cache"), None), "cache:6379");
        assert_eq!(override_address("redis-master:6379", None, Some(6380)), "redis-master:6380");
        assert_eq!(override_address("redis-master", None, None), "redis-master");
        assert_eq!(override_address("redis-master", None, Some(7000)), "redis-master:7000");
    }

    #[test]
    fn redis_config_from_settings() {
        let store = StoreSettings {
            password: Some("secret".into()),
            connect_timeout_ms: 1500,
            op_timeout_ms: 250,
            ..StoreSettings::default()
        };
        let config = redis_config(&store);
        assert_eq!(config.address, "redis-master:6379");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.op_timeout, Duration::from_millis(250));
    }

    #[test]
    fn settings_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":9000,"public_host":"lobby.test"},"store":{"backend":"memory"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "huddled",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ]);
        let settings = resolve_settings(&cli).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn invalid_flags_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "huddled",
            "--config",
            dir.path().join("missing.json").to_str().unwrap(),
            "--tls-cert",
            "/etc/tls/cert.pem",
        ]);
        assert!(resolve_settings(&cli).is_err());
    }

    #[tokio::test]
    async fn memory_backed_manager_uses_configured_host() {
        let mut settings = HuddleSettings::default();
        settings.store.backend = StoreBackend::Memory;
        settings.server.public_host = "play.example.com".into();
        settings.server.address_scheme = AddressScheme::Ws;
        settings.session.code_length = 6;

        let store = build_store(&settings.store).await.unwrap();
        let sessions = build_sessions(&settings, store);
        assert_eq!(sessions.store_backend(), "memory");

        let created = sessions
            .create_session("kooky-quiz", &ClientContext::default())
            .await
            .unwrap();
        assert_eq!(created.code.as_str().len(), 6);
        assert!(
            created
                .connection_address
                .starts_with("ws://play.example.com/ws/kooky-quiz/")
        );
    }
}
