//! Notify module - publishing, reorg-aware block notifications, pending
//! moves, catch-up requests and the subscriber transport

mod publisher;
mod blocks;
mod pending;
mod interface;
mod catchup;
mod transport;

pub use publisher::*;
pub use blocks::*;
pub use pending::*;
pub use interface::*;
pub use catchup::*;
pub use transport::*;

use thiserror::Error;
use crate::crypto::Hash;

/// Broken assumptions about the order of chain events
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("block {0} detached while newer attached blocks are still cached")]
    DetachOutOfOrder(Hash),
    #[error("block {0} detached with different metadata than it was attached with")]
    BlockInfoMismatch(Hash),
    #[error("detach payload for game {game} in block {block} differs from the attach payload")]
    PayloadMismatch { block: Hash, game: String },
}
