//! # huddle-core
//!
//! Shared vocabulary for the Huddle session service:
//!
//! - **Branded IDs**: [`SessionCode`], [`UserId`], [`ConnectionId`]
//! - **Session model**: [`Session`], [`Player`], [`Master`], the role-agnostic
//!   [`Participant`] view, and the versioned store record codec
//! - **Errors**: [`LobbyError`] with machine-readable [`ErrorKind`]
//! - **Rules**: player-name normalization, game-type allow-list, connection
//!   address construction
//! - **Logging**: global `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod address;
pub mod errors;
pub mod game;
pub mod ids;
pub mod logging;
pub mod name;
pub mod session;

pub use address::{AddressBuilder, AddressScheme};
pub use errors::{ErrorKind, LobbyError, Result};
pub use game::GameCatalog;
pub use ids::{ConnectionId, SessionCode, UserId};
pub use name::normalize_player_name;
pub use session::{Master, Participant, Phase, Player, Role, Session};
