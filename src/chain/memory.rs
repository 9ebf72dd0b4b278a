//! In-memory chain engine
//!
//! A small regtest-style engine: block index with side branches, an active
//! chain selected by height, a mempool, and `invalidate`/`reconsider` for
//! forcing reorgs. It drives [`ChainListener`]s with the same call contract
//! a full node would, which makes it the reference collaborator for the
//! notification layer and its tests.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use crate::crypto::{Hash, hash_bytes};
use super::{
    last_common_ancestor, path_to_ancestor, Amount, Block, BlockInfo, ChainError,
    ChainListener, ChainView, NameOpKind, NameOperation, OutPoint, OutputKind, Transaction,
    TxOutput, COIN,
};

/// Number of blocks that enter the median-time calculation
const MEDIAN_TIME_SPAN: usize = 11;

/// Block subsidy paid by the engine's coinbases
const BLOCK_REWARD: Amount = 50 * COIN;

/// Amount locked in every name output
pub const NAME_LOCKED_AMOUNT: Amount = COIN / 100;

/// Timestamp of the regtest genesis block
const REGTEST_GENESIS_TIME: u64 = 1_531_470_713;

/// Engine-level failures
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("transaction {0} is already known")]
    DuplicateTransaction(Hash),
    #[error("coinbase transactions cannot enter the mempool")]
    CoinbaseInMempool,
    #[error("block {0} is already known")]
    DuplicateBlock(Hash),
    #[error("genesis block {0} cannot be invalidated")]
    GenesisInvalidation(Hash),
    #[error("name {0} already exists")]
    NameExists(String),
    #[error("name {0} does not exist")]
    NameNotFound(String),
}

/// In-memory chain state
pub struct MemoryChain {
    blocks: HashMap<Hash, Arc<Block>>,
    index: HashMap<Hash, BlockInfo>,
    children: HashMap<Hash, Vec<Hash>>,
    /// Arrival order, used to break ties between equally long branches
    arrival: HashMap<Hash, u64>,
    active: Vec<Hash>,
    /// Blocks passed to `invalidate_block`
    invalidated: HashSet<Hash>,
    /// Invalidated blocks and everything built on them
    invalid: HashSet<Hash>,
    /// Valid blocks without a valid child
    candidates: HashSet<Hash>,
    /// Active-chain txid to containing block
    tx_index: HashMap<Hash, Hash>,
    /// Active-chain name outputs, latest last
    names: HashMap<String, Vec<OutPoint>>,
    mempool: Vec<Transaction>,
    listeners: Vec<Arc<dyn ChainListener>>,
    coinbase_address: String,
    counter: u64,
}

impl MemoryChain {
    /// Create a chain from its genesis block
    pub fn new(genesis: Block, coinbase_address: impl Into<String>) -> Self {
        let hash = genesis.hash();
        let info = BlockInfo {
            hash,
            parent: None,
            height: 0,
            timestamp: genesis.header.timestamp,
            median_time: genesis.header.timestamp,
            rng_seed: genesis.header.rng_seed(),
        };

        let mut chain = Self {
            blocks: HashMap::new(),
            index: HashMap::new(),
            children: HashMap::new(),
            arrival: HashMap::new(),
            active: vec![hash],
            invalidated: HashSet::new(),
            invalid: HashSet::new(),
            candidates: HashSet::from([hash]),
            tx_index: HashMap::new(),
            names: HashMap::new(),
            mempool: Vec::new(),
            listeners: Vec::new(),
            coinbase_address: coinbase_address.into(),
            counter: 0,
        };
        chain.index_transactions(&genesis);
        chain.blocks.insert(hash, Arc::new(genesis));
        chain.index.insert(hash, info);
        chain.arrival.insert(hash, 0);
        chain
    }

    /// Chain with a fixed regtest genesis
    pub fn new_regtest() -> Self {
        let address = "regtest-miner";
        let genesis = Block::new(
            Hash::zero(),
            REGTEST_GENESIS_TIME,
            0,
            vec![Transaction::coinbase(BLOCK_REWARD, address, 0)],
        );
        Self::new(genesis, address)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ChainListener>) {
        self.listeners.push(listener);
    }

    pub fn height(&self) -> u64 {
        (self.active.len() - 1) as u64
    }

    pub fn tip_info(&self) -> BlockInfo {
        self.index[&self.tip()].clone()
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn is_active(&self, hash: &Hash) -> bool {
        self.index
            .get(hash)
            .and_then(|info| self.active.get(info.height as usize))
            .map_or(false, |h| h == hash)
    }

    /// Add a transaction to the mempool and announce it
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<Hash, EngineError> {
        if tx.is_coinbase() {
            return Err(EngineError::CoinbaseInMempool);
        }

        let txid = tx.txid();
        if self.tx_index.contains_key(&txid) || self.mempool.iter().any(|m| m.txid() == txid) {
            return Err(EngineError::DuplicateTransaction(txid));
        }

        debug!(%txid, "transaction accepted to mempool");
        for listener in &self.listeners {
            listener.transaction_accepted(&tx);
        }
        self.mempool.push(tx);

        Ok(txid)
    }

    /// Mine all mempool transactions into a block on the current tip
    pub fn mine_block(&mut self) -> Result<Hash, EngineError> {
        let tip = self.tip_info();
        self.counter += 1;

        let mut transactions = vec![Transaction::coinbase(
            BLOCK_REWARD,
            &self.coinbase_address,
            tip.height + 1,
        )
        .with_witness(self.counter.to_le_bytes().to_vec())];
        transactions.extend(self.mempool.iter().cloned());

        let block = Block::new(tip.hash, tip.timestamp + 1, self.counter, transactions);
        self.accept_block(block)
    }

    /// Index a block and switch to it if it extends the best chain
    pub fn accept_block(&mut self, block: Block) -> Result<Hash, EngineError> {
        let hash = block.hash();
        if self.index.contains_key(&hash) {
            return Err(EngineError::DuplicateBlock(hash));
        }

        let parent = self
            .index
            .get(block.prev_hash())
            .cloned()
            .ok_or(ChainError::MissingParent(hash))?;

        let info = BlockInfo {
            hash,
            parent: Some(parent.hash),
            height: parent.height + 1,
            timestamp: block.header.timestamp,
            median_time: self.median_time(&parent, block.header.timestamp),
            rng_seed: block.header.rng_seed(),
        };

        self.counter += 1;
        self.arrival.insert(hash, self.counter);
        self.index.insert(hash, info);
        self.blocks.insert(hash, Arc::new(block));
        self.children.entry(parent.hash).or_default().push(hash);

        if self.invalid.contains(&parent.hash) {
            self.invalid.insert(hash);
            return Ok(hash);
        }
        self.candidates.remove(&parent.hash);
        self.candidates.insert(hash);

        self.activate_best_chain()?;
        Ok(hash)
    }

    /// Mark a block (and thus its descendants) invalid
    pub fn invalidate_block(&mut self, hash: &Hash) -> Result<(), EngineError> {
        let info = self.index.get(hash).ok_or(ChainError::UnknownBlock(*hash))?;
        if info.parent.is_none() {
            return Err(EngineError::GenesisInvalidation(*hash));
        }

        info!(block = %hash, "invalidating block");
        self.invalidated.insert(*hash);
        self.refresh_validity(hash);
        self.activate_best_chain()
    }

    /// Undo `invalidate_block` for a block and everything built on it
    pub fn reconsider_block(&mut self, hash: &Hash) -> Result<(), EngineError> {
        if !self.index.contains_key(hash) {
            return Err(ChainError::UnknownBlock(*hash).into());
        }

        for h in self.subtree(hash) {
            self.invalidated.remove(&h);
        }
        self.refresh_validity(hash);

        info!(block = %hash, "reconsidering block");
        self.activate_best_chain()
    }

    /// Outpoint of the current name output for `name`, mempool first
    pub fn find_name_outpoint(&self, name: &str) -> Option<OutPoint> {
        let pending = self.mempool.iter().rev().find_map(|tx| {
            tx.outputs.iter().enumerate().find_map(|(vout, out)| match &out.kind {
                OutputKind::Name(op) if op.name == name => {
                    Some(OutPoint::new(tx.txid(), vout as u32))
                }
                _ => None,
            })
        });

        pending.or_else(|| self.names.get(name).and_then(|history| history.last().copied()))
    }

    /// Build and submit a name transaction, with optional payments and burns
    pub fn send_name_operation(
        &mut self,
        kind: NameOpKind,
        name: &str,
        value: &str,
        payments: &[(String, Amount)],
        burns: &[(String, Amount)],
    ) -> Result<Hash, EngineError> {
        let previous = self.find_name_outpoint(name);
        self.counter += 1;
        let funding = OutPoint::new(hash_bytes(&self.counter.to_le_bytes()), 0);

        let mut inputs = vec![funding];
        match (kind, previous) {
            (NameOpKind::Register, Some(_)) => return Err(EngineError::NameExists(name.into())),
            (NameOpKind::Update, None) => return Err(EngineError::NameNotFound(name.into())),
            (NameOpKind::Update, Some(prev)) => inputs.insert(0, prev),
            (NameOpKind::Register, None) => {}
        }

        let op = NameOperation {
            kind,
            name: name.to_string(),
            value: value.to_string(),
        };
        let mut outputs = vec![TxOutput::name(op, NAME_LOCKED_AMOUNT)];
        for (address, amount) in payments {
            outputs.push(TxOutput::to_address(address.clone(), *amount));
        }
        for (label, amount) in burns {
            outputs.push(TxOutput::burn(Some(label), *amount));
        }

        let tx = Transaction::new(inputs, outputs).with_witness(self.counter.to_le_bytes().to_vec());
        self.submit_transaction(tx)
    }

    fn index_transactions(&mut self, block: &Block) {
        let hash = block.hash();
        for tx in &block.transactions {
            let txid = tx.txid();
            self.tx_index.insert(txid, hash);
            for (vout, out) in tx.outputs.iter().enumerate() {
                if let OutputKind::Name(op) = &out.kind {
                    self.names
                        .entry(op.name.clone())
                        .or_default()
                        .push(OutPoint::new(txid, vout as u32));
                }
            }
        }
    }

    /// Reverse of `index_transactions`; blocks leave in the opposite order
    /// they were indexed in.
    fn unindex_transactions(&mut self, block: &Block) {
        for tx in block.transactions.iter().rev() {
            self.tx_index.remove(&tx.txid());
            for out in tx.outputs.iter().rev() {
                if let OutputKind::Name(op) = &out.kind {
                    if let Some(history) = self.names.get_mut(&op.name) {
                        history.pop();
                        if history.is_empty() {
                            self.names.remove(&op.name);
                        }
                    }
                }
            }
        }
    }

    fn median_time(&self, parent: &BlockInfo, timestamp: u64) -> u64 {
        let mut times = vec![timestamp];
        let mut current = Some(parent.clone());
        while let Some(info) = current {
            if times.len() >= MEDIAN_TIME_SPAN {
                break;
            }
            times.push(info.timestamp);
            current = info.parent.and_then(|p| self.index.get(&p).cloned());
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// `root` and all its descendants, parents before children
    fn subtree(&self, root: &Hash) -> Vec<Hash> {
        let mut out = Vec::new();
        let mut stack = vec![*root];
        while let Some(hash) = stack.pop() {
            out.push(hash);
            if let Some(children) = self.children.get(&hash) {
                stack.extend(children.iter().copied());
            }
        }
        out
    }

    /// Recompute invalid marks below `root`, then the candidate tips
    fn refresh_validity(&mut self, root: &Hash) {
        for hash in self.subtree(root) {
            let parent_invalid = self
                .index
                .get(&hash)
                .and_then(|info| info.parent)
                .map_or(false, |p| self.invalid.contains(&p));
            if parent_invalid || self.invalidated.contains(&hash) {
                self.invalid.insert(hash);
            } else {
                self.invalid.remove(&hash);
            }
        }

        let candidates: HashSet<Hash> = self
            .index
            .keys()
            .filter(|h| !self.invalid.contains(*h))
            .filter(|h| {
                self.children
                    .get(*h)
                    .map_or(true, |c| c.iter().all(|c| self.invalid.contains(c)))
            })
            .copied()
            .collect();
        self.candidates = candidates;
    }

    /// Whether `info` is the tip or built on top of it
    fn extends_tip(&self, info: &BlockInfo, tip: &Hash) -> bool {
        let mut current = Some(info);
        while let Some(i) = current {
            if self.is_active(&i.hash) {
                return i.hash == *tip;
            }
            current = i.parent.and_then(|p| self.index.get(&p));
        }
        false
    }

    /// Highest candidate. Among equals, blocks on top of the current tip
    /// win, then the earliest arrival.
    fn best_candidate(&self) -> Hash {
        let tip = self.tip();
        let infos: Vec<&BlockInfo> = self.candidates.iter().filter_map(|h| self.index.get(h)).collect();
        let Some(height) = infos.iter().map(|info| info.height).max() else {
            return tip;
        };

        infos
            .into_iter()
            .filter(|info| info.height == height)
            .max_by_key(|info| {
                let arrival = self.arrival.get(&info.hash).copied().unwrap_or(u64::MAX);
                (self.extends_tip(info, &tip), Reverse(arrival))
            })
            .map_or(tip, |info| info.hash)
    }

    fn activate_best_chain(&mut self) -> Result<(), EngineError> {
        let target = self.best_candidate();
        let tip = self.tip_info();
        if target == tip.hash {
            return Ok(());
        }

        let target_info = self
            .index
            .get(&target)
            .cloned()
            .ok_or(ChainError::UnknownBlock(target))?;
        let ancestor = last_common_ancestor(self, &tip, &target_info)?;
        let detach = path_to_ancestor(self, &tip, &ancestor)?;
        let mut attach = path_to_ancestor(self, &target_info, &ancestor)?;
        attach.reverse();

        debug!(
            from = %tip.hash,
            to = %target,
            detach = detach.len(),
            attach = attach.len(),
            "activating best chain"
        );

        let mut resurrected = Vec::new();
        for info in &detach {
            let block = self.block(&info.hash).ok_or(ChainError::MissingBlockData(info.hash))?;
            self.active.pop();
            self.unindex_transactions(&block);
            for listener in &self.listeners {
                listener.block_disconnected(&block, info);
            }
            let returned = block.transactions.iter().filter(|tx| !tx.is_coinbase()).cloned();
            // Older blocks go in front so the mempool keeps chain order.
            resurrected.splice(0..0, returned);
        }

        for info in &attach {
            let block = self.block(&info.hash).ok_or(ChainError::MissingBlockData(info.hash))?;
            self.active.push(info.hash);
            self.index_transactions(&block);
            let confirmed: HashSet<Hash> = block.transactions.iter().map(|tx| tx.txid()).collect();
            self.mempool.retain(|tx| !confirmed.contains(&tx.txid()));
            resurrected.retain(|tx| !confirmed.contains(&tx.txid()));
            for listener in &self.listeners {
                listener.block_connected(&block, info);
            }
        }

        resurrected.append(&mut self.mempool);
        self.mempool = resurrected;

        let new_tip = self.tip_info();
        for listener in &self.listeners {
            listener.tip_updated(&new_tip);
        }

        Ok(())
    }
}

impl ChainView for MemoryChain {
    fn tip(&self) -> Hash {
        self.active[self.active.len() - 1]
    }

    fn block_info(&self, hash: &Hash) -> Option<BlockInfo> {
        self.index.get(hash).cloned()
    }

    fn block_at_height(&self, height: u64) -> Option<Hash> {
        self.active.get(height as usize).copied()
    }

    fn block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.blocks.get(hash).cloned()
    }
}
