//! Connection-address construction.
//!
//! A participant's connection address is a pure function of the public host,
//! the game type, the session code and the participant's user id. It is never
//! stored on its own; the record keeps the derived value for convenience only.

use serde::{Deserialize, Serialize};

use crate::ids::{SessionCode, UserId};

/// URL scheme used in connection addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScheme {
    /// TLS WebSocket (production, behind the TLS-terminating proxy).
    #[default]
    Wss,
    /// Plain WebSocket (local development).
    Ws,
}

impl AddressScheme {
    /// Scheme string without `://`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wss => "wss",
            Self::Ws => "ws",
        }
    }
}

/// Builds connection addresses for a fixed public host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressBuilder {
    scheme: AddressScheme,
    public_host: String,
}

impl AddressBuilder {
    /// Create a builder for the externally visible `public_host`
    /// (host or `host:port`).
    pub fn new(scheme: AddressScheme, public_host: impl Into<String>) -> Self {
        Self {
            scheme,
            public_host: public_host.into(),
        }
    }

    /// `{scheme}://{host}/ws/{game}/{code}/{user}`
    pub fn connection_address(&self, game_type: &str, code: &SessionCode, user: &UserId) -> String {
        format!(
            "{}://{}{}",
            self.scheme.as_str(),
            self.public_host,
            connection_path(game_type, code, user)
        )
    }
}

/// Path component the upgrade endpoint is mounted on.
pub fn connection_path(game_type: &str, code: &SessionCode, user: &UserId) -> String {
    format!("/ws/{game_type}/{code}/{user}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_wss_address() {
        let builder = AddressBuilder::new(AddressScheme::Wss, "play.example.com");
        let addr = builder.connection_address(
            "kooky-quiz",
            &SessionCode::from("AB3F9"),
            &UserId::from("u-1"),
        );
        assert_eq!(addr, "wss://play.example.com/ws/kooky-quiz/AB3F9/u-1");
    }

    #[test]
    fn builds_ws_address_with_port() {
        let builder = AddressBuilder::new(AddressScheme::Ws, "127.0.0.1:9000");
        let addr =
            builder.connection_address("kooky-quiz", &SessionCode::from("Q"), &UserId::from("u"));
        assert_eq!(addr, "ws://127.0.0.1:9000/ws/kooky-quiz/Q/u");
    }

    #[test]
    fn address_is_deterministic() {
        let builder = AddressBuilder::new(AddressScheme::Wss, "h");
        let code = SessionCode::from("C0DE1");
        let user = UserId::new();
        assert_eq!(
            builder.connection_address("g", &code, &user),
            builder.connection_address("g", &code, &user)
        );
    }

    #[test]
    fn scheme_serde() {
        let s: AddressScheme = serde_json::from_str("\"ws\"").unwrap();
        assert_eq!(s, AddressScheme::Ws);
        assert_eq!(AddressScheme::default(), AddressScheme::Wss);
    }
}
