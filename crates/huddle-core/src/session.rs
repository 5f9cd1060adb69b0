//! Session entity, participants and the persisted record format.
//!
//! A [`Session`] is stored as one opaque string per join code. The string is a
//! versioned JSON envelope:
//!
//! ```json
//! {"schema":1,"session":{"id":"AB3F9","gameType":"kooky-quiz","phase":"LOBBY",...}}
//! ```
//!
//! Decoding refuses unknown schema versions instead of guessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LobbyError, Result};
use crate::ids::{SessionCode, UserId};

/// Version of the persisted record layout.
pub const RECORD_SCHEMA: u32 = 1;

/// Lifecycle phase of a session. Ordered; transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Waiting for players.
    Lobby,
    /// Game content is being served.
    Active,
    /// Game over; the record lingers until its TTL expires.
    Finished,
}

/// Role of a participant within its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// The client that created the session.
    Master,
    /// A client that joined with a name.
    Player,
}

/// The creating client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Master {
    /// Master identity, independent of any player.
    pub user_id: UserId,
    /// Where the master opens its live connection.
    pub connection_address: String,
}

/// A joined participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Trimmed display name, unique within the session.
    pub name: String,
    /// Assigned at join, immutable.
    pub user_id: UserId,
    /// Where the player opens its live connection.
    pub connection_address: String,
}

/// Role-agnostic view of anyone allowed to connect to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Participant identity.
    pub user_id: UserId,
    /// Connection address handed out at create/join time.
    pub connection_address: String,
    /// Master or player.
    pub role: Role,
    /// Display name (players only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One running or lobby-phase game instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Join code; also the store key.
    pub id: SessionCode,
    /// Game kind, validated at creation.
    pub game_type: String,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Players in join order.
    pub players: Vec<Player>,
    /// The creating client.
    pub master: Master,
    /// Bumped on every successful mutation.
    pub revision: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RecordOut<'a> {
    schema: u32,
    session: &'a Session,
}

#[derive(Deserialize)]
struct RecordIn {
    schema: u32,
    session: Session,
}

impl Session {
    /// A fresh lobby with no players.
    pub fn new(id: SessionCode, game_type: impl Into<String>, master: Master) -> Self {
        Self {
            id,
            game_type: game_type.into(),
            phase: Phase::Lobby,
            players: Vec::new(),
            master,
            revision: 1,
            created_at: Utc::now(),
        }
    }

    /// Whether a player with exactly this (already trimmed) name exists.
    pub fn has_player_named(&self, name: &str) -> bool {
        self.players.iter().any(|p| p.name == name)
    }

    /// Append a player, enforcing name uniqueness.
    pub fn add_player(&mut self, player: Player) -> Result<()> {
        if self.has_player_named(&player.name) {
            return Err(LobbyError::Conflict { name: player.name });
        }
        self.players.push(player);
        self.revision += 1;
        Ok(())
    }

    /// Move to a later phase. Staying put or moving backwards is rejected.
    pub fn advance_phase(&mut self, next: Phase) -> Result<()> {
        if next <= self.phase {
            return Err(LobbyError::validation(format!(
                "cannot move session {} from {:?} to {:?}",
                self.id, self.phase, next
            )));
        }
        self.phase = next;
        self.revision += 1;
        Ok(())
    }

    /// Master first, then players in join order.
    pub fn participants(&self) -> impl Iterator<Item = Participant> + '_ {
        let master = std::iter::once(Participant {
            user_id: self.master.user_id.clone(),
            connection_address: self.master.connection_address.clone(),
            role: Role::Master,
            name: None,
        });
        master.chain(self.players.iter().map(|p| Participant {
            user_id: p.user_id.clone(),
            connection_address: p.connection_address.clone(),
            role: Role::Player,
            name: Some(p.name.clone()),
        }))
    }

    /// Look up a participant by user id.
    pub fn participant(&self, user: &UserId) -> Option<Participant> {
        self.participants().find(|p| &p.user_id == user)
    }

    /// Serialize to the persisted record format.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(&RecordOut {
            schema: RECORD_SCHEMA,
            session: self,
        })
        .map_err(|e| LobbyError::store(format!("failed to encode session {}: {e}", self.id)))
    }

    /// Parse a persisted record.
    pub fn decode(raw: &str) -> Result<Self> {
        let record: RecordIn = serde_json::from_str(raw)
            .map_err(|e| LobbyError::store(format!("corrupt session record: {e}")))?;
        if record.schema != RECORD_SCHEMA {
            return Err(LobbyError::store(format!(
                "unsupported session record schema {}",
                record.schema
            )));
        }
        Ok(record.session)
    }
}
