//! Branded ID newtypes.
//!
//! Join codes, participant ids and hub connection ids are all strings on the
//! wire. Wrapping each in its own newtype keeps a join code from being passed
//! where a user id is expected.
//!
//! Generated ids ([`UserId`], [`ConnectionId`]) are random UUID v4 values.
//! A user id doubles as the capability that admits a live connection, so it
//! must not be guessable from its neighbours the way a time-ordered id is.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! random_id {
    ($name:ident) => {
        impl $name {
            /// Create a new random ID (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Join code of a session; also the store key of its record.
    SessionCode
}

branded_id! {
    /// Identity of a session participant (master or player).
    UserId
}

branded_id! {
    /// Identity of one live duplex connection inside the hub.
    ConnectionId
}

random_id!(UserId);
random_id!(ConnectionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_new_is_uuid_v4() {
        let id = UserId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn session_code_from_str() {
        let code = SessionCode::from("AB3F9");
        assert_eq!(code.as_str(), "AB3F9");
        assert_eq!(format!("{code}"), "AB3F9");
    }

    #[test]
    fn deref_to_str() {
        let id = UserId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn serde_is_transparent() {
        let code = SessionCode::from("QZ7K2");
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"QZ7K2\"");
        let back: SessionCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn into_inner_and_string() {
        let id = ConnectionId::from("conn-1");
        let s: String = id.clone().into();
        assert_eq!(s, "conn-1");
        assert_eq!(id.into_inner(), "conn-1");
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let _ = set.insert(UserId::from("same"));
        let _ = set.insert(UserId::from("same"));
        assert_eq!(set.len(), 1);
    }
}
