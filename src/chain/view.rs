//! Read access to chain history
//!
//! The catch-up path walks the block index through this trait; the engine
//! guarantees that the view stays consistent for as long as the caller holds
//! its lock.

use std::sync::Arc;
use thiserror::Error;
use crate::crypto::Hash;
use super::{Block, BlockInfo};

/// Errors from walking the block index
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("block {0} is not known")]
    UnknownBlock(Hash),
    #[error("parent of block {0} is missing from the index")]
    MissingParent(Hash),
    #[error("block {0} has no data")]
    MissingBlockData(Hash),
    #[error("blocks {0} and {1} share no common ancestor")]
    NoCommonAncestor(Hash, Hash),
}

/// Read-only view of the block index and block data
pub trait ChainView {
    /// Hash of the active chain tip
    fn tip(&self) -> Hash;

    /// Metadata of any indexed block (active or not)
    fn block_info(&self, hash: &Hash) -> Option<BlockInfo>;

    /// Hash of the active-chain block at `height`
    fn block_at_height(&self, height: u64) -> Option<Hash>;

    /// Full block data
    fn block(&self, hash: &Hash) -> Option<Arc<Block>>;
}

fn parent_info(view: &dyn ChainView, info: &BlockInfo) -> Result<BlockInfo, ChainError> {
    let parent = info.parent.ok_or(ChainError::MissingParent(info.hash))?;
    view.block_info(&parent).ok_or(ChainError::MissingParent(info.hash))
}

/// Lowest common ancestor of two indexed blocks.
///
/// The deeper side is first walked back to the other's height, then both
/// sides step back together until they meet.
pub fn last_common_ancestor(
    view: &dyn ChainView,
    a: &BlockInfo,
    b: &BlockInfo,
) -> Result<BlockInfo, ChainError> {
    let mut a = a.clone();
    let mut b = b.clone();

    while a.height > b.height {
        a = parent_info(view, &a)?;
    }
    while b.height > a.height {
        b = parent_info(view, &b)?;
    }

    while a.hash != b.hash {
        if a.parent.is_none() || b.parent.is_none() {
            return Err(ChainError::NoCommonAncestor(a.hash, b.hash));
        }
        a = parent_info(view, &a)?;
        b = parent_info(view, &b)?;
    }

    Ok(a)
}

/// Blocks from `from` back to `ancestor` (exclusive), newest first
pub fn path_to_ancestor(
    view: &dyn ChainView,
    from: &BlockInfo,
    ancestor: &BlockInfo,
) -> Result<Vec<BlockInfo>, ChainError> {
    let mut path = Vec::new();
    let mut current = from.clone();

    while current.hash != ancestor.hash {
        if current.height <= ancestor.height {
            return Err(ChainError::NoCommonAncestor(from.hash, ancestor.hash));
        }
        let parent = parent_info(view, &current)?;
        path.push(current);
        current = parent;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;

    #[test]
    fn test_ancestor_of_fork() {
        let mut chain = MemoryChain::new_regtest();
        let base = chain.tip();
        let a1 = chain.mine_block().unwrap();
        let a2 = chain.mine_block().unwrap();

        chain.invalidate_block(&a1).unwrap();
        let b1 = chain.mine_block().unwrap();

        let info_a2 = chain.block_info(&a2).unwrap();
        let info_b1 = chain.block_info(&b1).unwrap();
        let ancestor = last_common_ancestor(&chain, &info_a2, &info_b1).unwrap();
        assert_eq!(ancestor.hash, base);

        let path = path_to_ancestor(&chain, &info_a2, &ancestor).unwrap();
        let hashes: Vec<Hash> = path.iter().map(|b| b.hash).collect();
        assert_eq!(hashes, vec![a2, a1]);
    }

    #[test]
    fn test_ancestor_of_same_block() {
        let mut chain = MemoryChain::new_regtest();
        let tip = chain.mine_block().unwrap();
        let info = chain.block_info(&tip).unwrap();

        let ancestor = last_common_ancestor(&chain, &info, &info).unwrap();
        assert_eq!(ancestor.hash, tip);
        assert!(path_to_ancestor(&chain, &info, &ancestor).unwrap().is_empty());
    }

    #[test]
    fn test_ancestor_on_same_branch() {
        let mut chain = MemoryChain::new_regtest();
        let low = chain.mine_block().unwrap();
        chain.mine_block().unwrap();
        let high = chain.mine_block().unwrap();

        let low_info = chain.block_info(&low).unwrap();
        let high_info = chain.block_info(&high).unwrap();
        let ancestor = last_common_ancestor(&chain, &high_info, &low_info).unwrap();
        assert_eq!(ancestor.hash, low);
        assert_eq!(path_to_ancestor(&chain, &high_info, &ancestor).unwrap().len(), 2);
    }
}
