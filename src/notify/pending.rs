//! Pending move notifications for mempool transactions

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;
use crate::chain::Transaction;
use crate::games::{move_json, GameId, MoveExtractor};
use super::{Publisher, TopicKind};

/// Publishes one `game-pending-move` message per move of a transaction
pub struct PendingMoveNotifier {
    publisher: Arc<Publisher>,
    extractor: MoveExtractor,
}

impl PendingMoveNotifier {
    pub fn new(publisher: Arc<Publisher>, extractor: MoveExtractor) -> Self {
        Self { publisher, extractor }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Announce the moves of `tx`; returns how many were sent
    pub fn transaction_pending(&self, tx: &Transaction, games: &BTreeSet<GameId>) -> usize {
        let data = self.extractor.extract_transaction(tx, games);
        for mv in &data.moves {
            let sent = self
                .publisher
                .publish(TopicKind::PendingMove.topic(&mv.game_id), move_json(mv).to_string());
            trace!(txid = %mv.txid, game = %mv.game_id, sequence = sent.sequence, "pending move");
        }
        data.moves.len()
    }
}
