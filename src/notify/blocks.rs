//! Attach and detach notifications for connected and disconnected blocks

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};
use crate::chain::{Block, BlockInfo};
use crate::games::{block_message, BlockGameData, GameId, MoveExtractor};
use super::{NotifyError, Publisher, TopicKind};

/// Attach payloads of one block, as they were sent
#[derive(Debug, Clone)]
struct CachedAttach {
    info: BlockInfo,
    games: BTreeSet<GameId>,
    bodies: Vec<(GameId, String)>,
}

/// Look-back cache of recent attach payloads, oldest first
#[derive(Debug)]
struct AttachCache {
    entries: VecDeque<CachedAttach>,
    depth: usize,
}

impl AttachCache {
    fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(depth.min(1024)),
            depth,
        }
    }

    fn push(&mut self, entry: CachedAttach) {
        if self.depth == 0 {
            return;
        }
        while self.entries.len() >= self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Remove the entry for `info.hash`, with whether it was the newest
    fn take(&mut self, info: &BlockInfo) -> Option<(CachedAttach, bool)> {
        let pos = self.entries.iter().position(|e| e.info.hash == info.hash)?;
        let newest = pos + 1 == self.entries.len();
        self.entries.remove(pos).map(|entry| (entry, newest))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Publishes `game-block-attach` and `game-block-detach` messages.
///
/// Detaching a block replays the attach bodies from the cache, so that
/// subscribers see the exact inverse of what they were told on connect even
/// if the tracked set changed in between.
pub struct GameBlocksNotifier {
    publisher: Arc<Publisher>,
    extractor: MoveExtractor,
    cache: Mutex<AttachCache>,
}

impl GameBlocksNotifier {
    pub fn new(publisher: Arc<Publisher>, extractor: MoveExtractor, cache_depth: usize) -> Self {
        Self {
            publisher,
            extractor,
            cache: Mutex::new(AttachCache::new(cache_depth)),
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn cached_blocks(&self) -> usize {
        self.cache.lock().len()
    }

    fn render(
        &self,
        block: &Block,
        info: &BlockInfo,
        games: &BTreeSet<GameId>,
        reqtoken: Option<&str>,
    ) -> Vec<(GameId, String)> {
        self.extractor
            .extract_block(block, games)
            .into_iter()
            .map(|(game, data)| {
                let body = block_message(info, &data, reqtoken).to_string();
                (game, body)
            })
            .collect()
    }

    fn publish_all(&self, kind: TopicKind, bodies: &[(GameId, String)]) {
        for (game, body) in bodies {
            let sent = self.publisher.publish(kind.topic(game), body.clone());
            trace!(topic = %sent.topic, sequence = sent.sequence, "published");
        }
    }

    pub fn block_attached(&self, block: &Block, info: &BlockInfo, games: &BTreeSet<GameId>) {
        let bodies = self.render(block, info, games, None);
        self.publish_all(TopicKind::BlockAttach, &bodies);

        self.cache.lock().push(CachedAttach {
            info: info.clone(),
            games: games.clone(),
            bodies,
        });
    }

    /// Publish the detach messages for `block`.
    ///
    /// The messages always go out. An error reports a broken ordering
    /// assumption that the caller should surface.
    pub fn block_detached(
        &self,
        block: &Block,
        info: &BlockInfo,
        games: &BTreeSet<GameId>,
    ) -> Result<(), NotifyError> {
        let cached = self.cache.lock().take(info);

        let Some((entry, newest)) = cached else {
            debug!(block = %info.hash, height = info.height, "attach cache miss, recomputing detach");
            let bodies = self.render(block, info, games, None);
            self.publish_all(TopicKind::BlockDetach, &bodies);
            return Ok(());
        };

        self.publish_all(TopicKind::BlockDetach, &entry.bodies);

        if !newest {
            return Err(NotifyError::DetachOutOfOrder(info.hash));
        }
        if entry.info != *info {
            return Err(NotifyError::BlockInfoMismatch(info.hash));
        }
        if cfg!(debug_assertions) && entry.games == *games {
            let fresh = self.render(block, info, games, None);
            if let Some((game, _)) = fresh.iter().zip(&entry.bodies).find_map(|(a, b)| (a != b).then_some(a)) {
                return Err(NotifyError::PayloadMismatch {
                    block: info.hash,
                    game: game.clone(),
                });
            }
        }

        Ok(())
    }

    /// Single block message for one game, used by catch-up requests
    pub fn send_block_notification(
        &self,
        kind: TopicKind,
        game: &str,
        block: &Block,
        info: &BlockInfo,
        reqtoken: &str,
    ) {
        let games = BTreeSet::from([game.to_string()]);
        let data = self
            .extractor
            .extract_block(block, &games)
            .remove(game)
            .unwrap_or_else(BlockGameData::default);
        let body = block_message(info, &data, Some(reqtoken)).to_string();
        self.publisher.publish(kind.topic(game), body);
    }
}
