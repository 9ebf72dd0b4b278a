//! The set of tracked games
//!
//! Only tracked games receive live attach/detach/pending notifications.
//! Dispatch code takes one [`TrackedGames::snapshot`] per event so that all
//! messages for a block see the same set.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// Identifier of a game
pub type GameId = String;

/// Longest accepted game id, in bytes
pub const MAX_GAME_ID_LENGTH: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameIdError {
    #[error("game id must not be empty")]
    Empty,
    #[error("game id is longer than {MAX_GAME_ID_LENGTH} bytes")]
    TooLong,
    #[error("game id must not contain whitespace or control characters")]
    InvalidCharacter,
}

/// Check that `id` can be used in a notification topic
pub fn validate_game_id(id: &str) -> Result<(), GameIdError> {
    if id.is_empty() {
        return Err(GameIdError::Empty);
    }
    if id.len() > MAX_GAME_ID_LENGTH {
        return Err(GameIdError::TooLong);
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(GameIdError::InvalidCharacter);
    }
    Ok(())
}

/// Process-wide, read-mostly set of tracked game ids
#[derive(Debug, Default)]
pub struct TrackedGames {
    games: RwLock<BTreeSet<GameId>>,
}

impl TrackedGames {
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<GameId>,
    {
        Self {
            games: RwLock::new(initial.into_iter().map(Into::into).collect()),
        }
    }

    /// Consistent copy of the current set
    pub fn snapshot(&self) -> BTreeSet<GameId> {
        self.games.read().clone()
    }

    pub fn contains(&self, game: &str) -> bool {
        self.games.read().contains(game)
    }

    /// Start tracking `game`; a no-op if it is already tracked
    pub fn add(&self, game: &str) -> Result<bool, GameIdError> {
        validate_game_id(game)?;
        let added = self.games.write().insert(game.to_string());
        if added {
            info!(game, "now tracking game");
        }
        Ok(added)
    }

    /// Stop tracking `game`; a no-op if it is not tracked
    pub fn remove(&self, game: &str) -> bool {
        let removed = self.games.write().remove(game);
        if removed {
            info!(game, "no longer tracking game");
        }
        removed
    }
}
