//! Blocks and the per-block metadata sent to games

use serde::{Deserialize, Serialize};
use crate::crypto::{Hash, double_hash, hash_bytes};
use super::Transaction;

/// Block header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash,
    /// Commitment to the transaction ids
    pub tx_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(prev_hash: Hash, tx_root: Hash, timestamp: u64, nonce: u64) -> Self {
        Self {
            version: 1,
            prev_hash,
            tx_root,
            timestamp,
            nonce,
        }
    }

    /// Serialize the header for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + 32 + 32 + 8 + 8);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.tx_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    /// Per-block random seed handed to games
    pub fn rng_seed(&self) -> Hash {
        double_hash(&self.hash().0)
    }
}

/// A complete block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block on top of `prev_hash`, committing to the transactions
    pub fn new(prev_hash: Hash, timestamp: u64, nonce: u64, transactions: Vec<Transaction>) -> Self {
        let header = BlockHeader::new(prev_hash, compute_tx_root(&transactions), timestamp, nonce);
        Self { header, transactions }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash == Hash::zero()
    }
}

/// Hash over the concatenated transaction ids
pub fn compute_tx_root(transactions: &[Transaction]) -> Hash {
    let mut bytes = Vec::with_capacity(transactions.len() * 32);
    for tx in transactions {
        bytes.extend_from_slice(&tx.txid().0);
    }
    hash_bytes(&bytes)
}

/// Block metadata as it appears in attach/detach notifications.
///
/// Immutable once the block is indexed; a disconnect reports the same value
/// that the connect did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: Hash,
    /// `None` only for genesis
    pub parent: Option<Hash>,
    pub height: u64,
    pub timestamp: u64,
    /// Median timestamp of the last (up to) eleven blocks
    pub median_time: u64,
    pub rng_seed: Hash,
}
