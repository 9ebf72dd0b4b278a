//! Game notification core library
//!
//! Turns the chain's block and mempool events into per-game streams of moves
//! and admin commands: attach and detach messages that stay consistent across
//! reorgs, pending moves from the mempool, and on-demand catch-up for clients
//! that fell behind.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod games;
pub mod notify;
pub mod rpc;

/// Protocol constants
pub mod constants {
    /// Topic prefix for block attach notifications
    pub const TOPIC_BLOCK_ATTACH: &str = "game-block-attach";

    /// Topic prefix for block detach notifications
    pub const TOPIC_BLOCK_DETACH: &str = "game-block-detach";

    /// Topic prefix for pending move notifications
    pub const TOPIC_PENDING_MOVE: &str = "game-pending-move";

    /// Number of decimal places of amounts
    pub const DECIMAL_PLACES: u8 = 8;
}
