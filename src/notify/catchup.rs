//! Catch-up requests: replay the block path between two points for one game
//!
//! A game client that lost track (or is starting up) names the block it
//! knows and the block it wants to reach. The path between them goes over
//! their last common ancestor: detaches from `fromblock` down, attaches up
//! to `toblock`. The messages go out on the game's ordinary topics, tagged
//! with a request token so the client can tell them apart.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use crate::chain::{last_common_ancestor, path_to_ancestor, Block, BlockInfo, ChainError, ChainView};
use crate::crypto::Hash;
use crate::games::{validate_game_id, GameIdError};
use super::{GameBlocksNotifier, TopicKind};

/// Default limit on attach steps per request
pub const DEFAULT_MAX_ATTACHES: u64 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatchUpError {
    #[error("game block notifications are disabled")]
    Disabled,
    #[error("invalid game id: {0}")]
    InvalidGameId(#[from] GameIdError),
    #[error("fromblock must be given unless toblock is the tip")]
    MissingFromBlock,
    #[error("fromblock not found")]
    FromBlockNotFound,
    #[error("toblock not found")]
    ToBlockNotFound,
    #[error("fromblock has no data")]
    FromBlockNoData,
    #[error("toblock has no data")]
    ToBlockNoData,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateSteps {
    pub attach: u64,
    pub detach: u64,
}

/// Result of a `game_sendupdates` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendUpdatesResult {
    /// Last block attached; short of the requested target when capped
    pub toblock: Hash,
    pub ancestor: Hash,
    pub reqtoken: String,
    pub steps: UpdateSteps,
}

/// Computes and sends catch-up paths
#[derive(Debug, Clone, Copy)]
pub struct CatchUpEngine {
    max_attaches: u64,
}

impl Default for CatchUpEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTACHES)
    }
}

impl CatchUpEngine {
    pub fn new(max_attaches: u64) -> Self {
        Self {
            max_attaches: max_attaches.max(1),
        }
    }

    pub fn max_attaches(&self) -> u64 {
        self.max_attaches
    }

    /// Send the updates for `game` from `from` to `to` (default: tip).
    ///
    /// Runs to completion against `view`; the caller keeps the chain locked
    /// for the duration so the path cannot change underneath.
    pub fn send_updates(
        &self,
        view: &dyn ChainView,
        notifier: Option<&GameBlocksNotifier>,
        game: &str,
        from: Option<Hash>,
        to: Option<Hash>,
    ) -> Result<SendUpdatesResult, CatchUpError> {
        let notifier = notifier.ok_or(CatchUpError::Disabled)?;
        validate_game_id(game)?;

        let tip = view.tip();
        let to = to.unwrap_or(tip);
        let from = match from {
            Some(from) => from,
            None if to == tip => tip,
            None => return Err(CatchUpError::MissingFromBlock),
        };

        let from_info = view.block_info(&from).ok_or(CatchUpError::FromBlockNotFound)?;
        let to_info = view.block_info(&to).ok_or(CatchUpError::ToBlockNotFound)?;
        if view.block(&from).is_none() {
            return Err(CatchUpError::FromBlockNoData);
        }
        if view.block(&to).is_none() {
            return Err(CatchUpError::ToBlockNoData);
        }

        let ancestor = last_common_ancestor(view, &from_info, &to_info)?;
        let detach = load_blocks(view, path_to_ancestor(view, &from_info, &ancestor)?)?;

        let mut attach_path = path_to_ancestor(view, &to_info, &ancestor)?;
        attach_path.reverse();
        attach_path.truncate(self.max_attaches as usize);
        let attach = load_blocks(view, attach_path)?;

        let reqtoken = Hash::random().to_hex();
        for (block, info) in &detach {
            notifier.send_block_notification(TopicKind::BlockDetach, game, block, info, &reqtoken);
        }
        for (block, info) in &attach {
            notifier.send_block_notification(TopicKind::BlockAttach, game, block, info, &reqtoken);
        }

        let toblock = attach.last().map_or(ancestor.hash, |(_, info)| info.hash);
        let result = SendUpdatesResult {
            toblock,
            ancestor: ancestor.hash,
            reqtoken,
            steps: UpdateSteps {
                attach: attach.len() as u64,
                detach: detach.len() as u64,
            },
        };

        info!(
            game,
            from = %from,
            to = %result.toblock,
            detach = result.steps.detach,
            attach = result.steps.attach,
            reqtoken = %result.reqtoken,
            "sent game updates"
        );
        Ok(result)
    }
}

fn load_blocks(
    view: &dyn ChainView,
    path: Vec<BlockInfo>,
) -> Result<Vec<(Arc<Block>, BlockInfo)>, ChainError> {
    path.into_iter()
        .map(|info| {
            let block = view.block(&info.hash).ok_or(ChainError::MissingBlockData(info.hash))?;
            Ok((block, info))
        })
        .collect()
}
