//! Chain event callbacks

use super::{Block, BlockInfo, Transaction};

/// Receiver of chain and mempool events.
///
/// Calls arrive serialized from the engine's processing context. Within one
/// chain activation the order is: all disconnects (newest first), all
/// connects (oldest first), then exactly one `tip_updated`.
///
/// Transactions that a disconnect puts back into the mempool are *not*
/// reported through `transaction_accepted`; listeners that care about them
/// take them from the disconnected block itself.
pub trait ChainListener: Send + Sync {
    fn block_connected(&self, block: &Block, info: &BlockInfo);

    fn block_disconnected(&self, block: &Block, info: &BlockInfo);

    fn transaction_accepted(&self, tx: &Transaction);

    /// End of a chain activation, before control returns to the caller
    fn tip_updated(&self, tip: &BlockInfo);
}
