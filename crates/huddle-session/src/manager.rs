//! Session lifecycle: create, join, phase changes and connection admission.
//!
//! The store offers no multi-key transactions, so every write is one of two
//! atomic primitives:
//!
//! - creation claims a fresh code with set-if-absent, retrying on collision
//! - updates read the record, mutate it in memory, and compare-and-swap
//!   against the exact string that was read, re-reading on a lost race
//!
//! Both loops are bounded and report [`LobbyError::CapacityExceeded`] when
//! they run out of attempts.

use std::sync::Arc;
use std::time::Duration;

use huddle_core::{
    AddressBuilder, GameCatalog, LobbyError, Master, Participant, Phase, Player, Result, Session,
    SessionCode, UserId, normalize_player_name,
};
use huddle_store::{CasOutcome, SessionStore, StoreError};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::code::CodeGenerator;

/// Sessions created (counter, labels: `game_type`).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Successful joins (counter, labels: `game_type`).
pub const SESSION_JOINS_TOTAL: &str = "session_joins_total";
/// Candidate codes that were already taken (counter).
pub const SESSION_CODE_COLLISIONS_TOTAL: &str = "session_code_collisions_total";
/// Lost compare-and-swap races (counter, labels: `operation`).
pub const SESSION_CAS_RETRIES_TOTAL: &str = "session_cas_retries_total";

/// Key read by [`SessionManager::ping_store`]. Never a valid join code.
const STORE_PING_KEY: &str = "huddle:ping";

/// Tunables for [`SessionManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// TTL written at creation.
    pub lobby_ttl: Duration,
    /// TTL re-armed by every later write.
    pub joined_ttl: Duration,
    /// Candidate codes tried before creation gives up.
    pub max_code_attempts: u32,
    /// Re-reads after a lost race before an update gives up.
    pub max_join_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lobby_ttl: Duration::from_secs(3600),
            joined_ttl: Duration::from_secs(18_000),
            max_code_attempts: 100,
            max_join_retries: 32,
        }
    }
}

/// Who asked for a session. Only ever logged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientContext {
    /// Peer address as seen by the gateway.
    pub remote_addr: Option<String>,
    /// `User-Agent` header, if any.
    pub user_agent: Option<String>,
}

/// Result of [`SessionManager::create_session`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Join code to share with players.
    pub code: SessionCode,
    /// Identity the master connects with.
    pub master_user_id: UserId,
    /// Where the master opens its live connection.
    pub connection_address: String,
}

/// Result of [`SessionManager::join_session`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedSession {
    /// Identity assigned to the new player.
    pub user_id: UserId,
    /// Where the player opens its live connection.
    pub connection_address: String,
}

/// Owns session semantics on top of an opaque key-value store.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    codes: CodeGenerator,
    games: GameCatalog,
    addresses: AddressBuilder,
    config: SessionConfig,
}

impl SessionManager {
    /// Manager with the default code generator, game catalog and TTLs.
    pub fn new(store: Arc<dyn SessionStore>, addresses: AddressBuilder) -> Self {
        Self {
            store,
            codes: CodeGenerator::default(),
            games: GameCatalog::default(),
            addresses,
            config: SessionConfig::default(),
        }
    }

    /// Replace the TTLs and retry bounds.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the code generator.
    #[must_use]
    pub fn with_codes(mut self, codes: CodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    /// Replace the game allow-list.
    #[must_use]
    pub fn with_games(mut self, games: GameCatalog) -> Self {
        self.games = games;
        self
    }

    /// Active tunables.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Backend name of the underlying store.
    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Round-trip the store without touching any session.
    pub async fn ping_store(&self) -> Result<()> {
        let _ = self
            .store
            .exists(STORE_PING_KEY)
            .await
            .map_err(LobbyError::store)?;
        Ok(())
    }

    /// Create a lobby for `game_type` and return its code and the master's
    /// connection details.
    #[instrument(skip_all, fields(game_type = %game_type))]
    pub async fn create_session(
        &self,
        game_type: &str,
        client: &ClientContext,
    ) -> Result<CreatedSession> {
        self.games.check(game_type)?;
        let master_user_id = UserId::new();

        for attempt in 1..=self.config.max_code_attempts {
            let code = self.codes.generate();
            let connection_address =
                self.addresses
                    .connection_address(game_type, &code, &master_user_id);
            let session = Session::new(
                code.clone(),
                game_type,
                Master {
                    user_id: master_user_id.clone(),
                    connection_address: connection_address.clone(),
                },
            );
            let record = session.encode()?;

            let claimed = self
                .store
                .set_if_absent(&code, &record, self.config.lobby_ttl)
                .await
                .map_err(LobbyError::store)?;
            if claimed {
                counter!(SESSIONS_CREATED_TOTAL, "game_type" => game_type.to_owned()).increment(1);
                info!(
                    code = %code,
                    attempt,
                    remote_addr = client.remote_addr.as_deref().unwrap_or("-"),
                    user_agent = client.user_agent.as_deref().unwrap_or("-"),
                    "session created"
                );
                return Ok(CreatedSession {
                    code,
                    master_user_id,
                    connection_address,
                });
            }

            counter!(SESSION_CODE_COLLISIONS_TOTAL).increment(1);
            debug!(code = %code, attempt, "join code already taken");
        }

        warn!(
            attempts = self.config.max_code_attempts,
            code_space = self.codes.code_space(),
            "no free join code found"
        );
        Err(LobbyError::CapacityExceeded {
            operation: "code generation",
            attempts: self.config.max_code_attempts,
        })
    }

    /// Add a player named `requested_name` to the session under `code`.
    ///
    /// Checks run in order: unknown code, invalid name, duplicate name.
    #[instrument(skip_all, fields(code = %code))]
    pub async fn join_session(
        &self,
        code: &SessionCode,
        requested_name: &str,
    ) -> Result<JoinedSession> {
        let (mut raw, mut session) = self.load(code).await?;
        let name = normalize_player_name(requested_name)?;
        let user_id = UserId::new();
        let connection_address =
            self.addresses
                .connection_address(&session.game_type, code, &user_id);

        for attempt in 0..=self.config.max_join_retries {
            if attempt > 0 {
                (raw, session) = self.load(code).await?;
            }
            session.add_player(Player {
                name: name.clone(),
                user_id: user_id.clone(),
                connection_address: connection_address.clone(),
            })?;

            if self.swap(code, &raw, &session, "join").await? {
                counter!(SESSION_JOINS_TOTAL, "game_type" => session.game_type.clone())
                    .increment(1);
                info!(
                    user_id = %user_id,
                    players = session.players.len(),
                    attempt,
                    "player joined"
                );
                return Ok(JoinedSession {
                    user_id,
                    connection_address,
                });
            }
        }

        warn!(retries = self.config.max_join_retries, "join kept losing races");
        Err(LobbyError::CapacityExceeded {
            operation: "join",
            attempts: self.config.max_join_retries + 1,
        })
    }

    /// Current snapshot of a session.
    pub async fn get_session(&self, code: &SessionCode) -> Result<Session> {
        self.load(code).await.map(|(_, session)| session)
    }

    /// Move a session forward to `phase` and return the updated snapshot.
    #[instrument(skip_all, fields(code = %code, phase = ?phase))]
    pub async fn set_phase(&self, code: &SessionCode, phase: Phase) -> Result<Session> {
        for _ in 0..=self.config.max_join_retries {
            let (raw, mut session) = self.load(code).await?;
            session.advance_phase(phase)?;
            if self.swap(code, &raw, &session, "set_phase").await? {
                info!(revision = session.revision, "session phase changed");
                return Ok(session);
            }
        }
        Err(LobbyError::CapacityExceeded {
            operation: "phase change",
            attempts: self.config.max_join_retries + 1,
        })
    }

    /// Admission check for a live connection: the session must exist, be of
    /// `game_type`, and list `user_id` as master or player.
    #[instrument(skip_all, fields(game_type = %game_type, code = %code, user_id = %user_id))]
    pub async fn authorize(
        &self,
        game_type: &str,
        code: &SessionCode,
        user_id: &UserId,
    ) -> Result<Participant> {
        let (_, session) = self.load(code).await?;
        if session.game_type != game_type {
            debug!(expected = %session.game_type, "game type mismatch");
            return Err(LobbyError::unauthorized(format!(
                "Session {code} is not a {game_type} game"
            )));
        }
        session.participant(user_id).ok_or_else(|| {
            debug!("user is not a participant");
            LobbyError::unauthorized(format!("User {user_id} is not part of session {code}"))
        })
    }

    async fn load(&self, code: &SessionCode) -> Result<(String, Session)> {
        let raw = self.store.get(code).await.map_err(|e| match e {
            StoreError::NotFound { .. } => LobbyError::not_found(code.as_str()),
            other => LobbyError::store(other),
        })?;
        let session = Session::decode(&raw)?;
        Ok((raw, session))
    }

    /// Returns `false` when another writer got there first.
    async fn swap(
        &self,
        code: &SessionCode,
        expected: &str,
        session: &Session,
        operation: &'static str,
    ) -> Result<bool> {
        let record = session.encode()?;
        let outcome = self
            .store
            .compare_and_swap(code, expected, &record, self.config.joined_ttl)
            .await
            .map_err(LobbyError::store)?;
        match outcome {
            CasOutcome::Swapped => Ok(true),
            CasOutcome::Mismatch => {
                counter!(SESSION_CAS_RETRIES_TOTAL, "operation" => operation).increment(1);
                debug!(operation, "record changed underneath, retrying");
                Ok(false)
            }
            CasOutcome::Missing => Err(LobbyError::not_found(code.as_str())),
        }
    }
}
