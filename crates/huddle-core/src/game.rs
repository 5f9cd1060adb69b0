//! Allow-list of game types a session may be created for.

use std::collections::BTreeSet;

use crate::errors::{LobbyError, Result};

/// The game type served today.
pub const KOOKY_QUIZ: &str = "kooky-quiz";

/// Set of accepted game types.
///
/// Only membership is checked; routing sessions to per-game backends is not
/// done here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameCatalog {
    games: BTreeSet<String>,
}

impl GameCatalog {
    /// Build a catalog from game type identifiers.
    pub fn new<I, S>(games: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            games: games.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `game_type` is accepted.
    pub fn contains(&self, game_type: &str) -> bool {
        self.games.contains(game_type)
    }

    /// Validate a requested game type.
    pub fn check(&self, game_type: &str) -> Result<()> {
        if self.contains(game_type) {
            Ok(())
        } else {
            Err(LobbyError::validation(format!(
                "{game_type} is not a valid game type"
            )))
        }
    }

    /// Accepted game types, sorted.
    pub fn games(&self) -> impl Iterator<Item = &str> {
        self.games.iter().map(String::as_str)
    }
}

impl Default for GameCatalog {
    fn default() -> Self {
        Self::new([KOOKY_QUIZ])
    }
}
