//! Structured logging setup with `tracing`.
//!
//! All crates log through `tracing` macros with structured fields
//! (`code`, `user_id`, `conn_id`, ...). The binary installs one global
//! subscriber at startup via [`init_subscriber`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the global subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

impl LogFormat {
    /// Resolve the effective format. `HUDDLE_ENV=prod` forces JSON.
    pub fn resolve(self, env: Option<&str>) -> Self {
        match env {
            Some("prod" | "production") => Self::Json,
            _ => self,
        }
    }
}

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let format = format.resolve(std::env::var("HUDDLE_ENV").ok().as_deref());

    match format {
        LogFormat::Pretty => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prod_env_forces_json() {
        assert_eq!(LogFormat::Pretty.resolve(Some("prod")), LogFormat::Json);
        assert_eq!(LogFormat::Pretty.resolve(Some("production")), LogFormat::Json);
    }

    #[test]
    fn other_env_keeps_format() {
        assert_eq!(LogFormat::Pretty.resolve(Some("dev")), LogFormat::Pretty);
        assert_eq!(LogFormat::Json.resolve(None), LogFormat::Json);
    }

    #[test]
    fn format_serde() {
        let f: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(f, LogFormat::Json);
        assert_eq!(serde_json::to_string(&LogFormat::Pretty).unwrap(), "\"pretty\"");
    }

    #[test]
    fn init_twice_is_noop() {
        init_subscriber("warn", LogFormat::Pretty);
        init_subscriber("debug", LogFormat::Json);
    }
}
