//! The chain listener tying the game notifiers together

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use crate::chain::{Block, BlockInfo, ChainListener, Transaction};
use crate::crypto::Hash;
use crate::games::{MoveExtractor, TrackedGames};
use super::{GameBlocksNotifier, PendingMoveNotifier, Publisher};

/// Which notifications are enabled, and where they go
#[derive(Clone, Default)]
pub struct NotifierSettings {
    pub blocks: Option<Arc<Publisher>>,
    pub pending: Option<Arc<Publisher>>,
    pub attach_cache_depth: usize,
}

/// Game notification interface, registered with the chain engine.
///
/// The tracked set is snapshotted once per chain event. Transactions from
/// disconnected blocks are held back and announced as pending again only at
/// `tip_updated`, so no pending message ever lands between the detaches and
/// attaches of one reorg.
pub struct GameNotifications {
    games: Arc<TrackedGames>,
    blocks: Option<GameBlocksNotifier>,
    pending: Option<PendingMoveNotifier>,
    resurrected: Mutex<Vec<Transaction>>,
    consistent: AtomicBool,
}

impl GameNotifications {
    pub fn new(games: Arc<TrackedGames>, extractor: MoveExtractor, settings: NotifierSettings) -> Self {
        let blocks = settings.blocks.map(|publisher| {
            GameBlocksNotifier::new(publisher, extractor.clone(), settings.attach_cache_depth)
        });
        let pending = settings
            .pending
            .map(|publisher| PendingMoveNotifier::new(publisher, extractor));

        Self {
            games,
            blocks,
            pending,
            resurrected: Mutex::new(Vec::new()),
            consistent: AtomicBool::new(true),
        }
    }

    pub fn tracked_games(&self) -> &Arc<TrackedGames> {
        &self.games
    }

    pub fn blocks(&self) -> Option<&GameBlocksNotifier> {
        self.blocks.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingMoveNotifier> {
        self.pending.as_ref()
    }

    /// False once any ordering check has failed
    pub fn is_consistent(&self) -> bool {
        self.consistent.load(Ordering::SeqCst)
    }
}

impl ChainListener for GameNotifications {
    fn block_connected(&self, block: &Block, info: &BlockInfo) {
        if self.pending.is_some() {
            let confirmed: HashSet<Hash> = block.transactions.iter().map(|tx| tx.txid()).collect();
            self.resurrected.lock().retain(|tx| !confirmed.contains(&tx.txid()));
        }

        if let Some(blocks) = &self.blocks {
            blocks.block_attached(block, info, &self.games.snapshot());
        }
    }

    fn block_disconnected(&self, block: &Block, info: &BlockInfo) {
        if let Some(blocks) = &self.blocks {
            if let Err(e) = blocks.block_detached(block, info, &self.games.snapshot()) {
                error!(block = %info.hash, height = info.height, error = %e, "notification consistency violated");
                self.consistent.store(false, Ordering::SeqCst);
            }
        }

        if self.pending.is_some() {
            let returned = block.transactions.iter().filter(|tx| !tx.is_coinbase()).cloned();
            // Disconnects come newest first; keep the stash in chain order.
            self.resurrected.lock().splice(0..0, returned);
        }
    }

    fn transaction_accepted(&self, tx: &Transaction) {
        if let Some(pending) = &self.pending {
            pending.transaction_pending(tx, &self.games.snapshot());
        }
    }

    fn tip_updated(&self, tip: &BlockInfo) {
        let Some(pending) = &self.pending else {
            return;
        };

        let stash = std::mem::take(&mut *self.resurrected.lock());
        if stash.is_empty() {
            return;
        }

        debug!(tip = %tip.hash, count = stash.len(), "re-announcing transactions from disconnected blocks");
        let games = self.games.snapshot();
        for tx in &stash {
            pending.transaction_pending(tx, &games);
        }
    }
}
