//! The chain coordinator: owns the tip set, the miniblock DAG, and both
//! transaction pools, and drives admission end to end.
//!
//! One read-write lock guards the whole of [`ChainInner`];
//! `add_complete_block` and the submit entry points take it for writing,
//! queries for reading. Each inbound entry point installs a panic
//! supervisor that converts an unexpected fault into [`ChainError::Panic`]
//! without touching state. Notifications broadcast after commit, outside
//! the lock.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::block::Block;
use crate::codec::DecodeError;
use crate::config::Config;
use crate::consensus::dag::{DagError, MiniBlockCollection};
use crate::consensus::difficulty::{check_pow_target, next_difficulty, DifficultyCache};
use crate::consensus::verify::{verify_complete_block, verify_transfer_tx, CompleteBlock, VerifyContext};
use crate::constants::{RELAY_QUEUE_CAPACITY, STABLE_LIMIT};
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::Address;
use crate::mempool::{Mempool, MempoolError};
use crate::miniblock::{MiniBlock, MiniBlockId};
use crate::regpool::{RegPool, RegPoolError};
use crate::relay::{Notifier, RelayHooks};
use crate::state::{self, ContractVm, NullVm, StateBatch, StateError};
use crate::storage::{BlockRecord, BlockStore, MemoryStore, StorageError, Store, TopoIndex, TopoRecord, TxStore};
use crate::transaction::{Transaction, TxType};
use crate::Hash;

/// The error taxonomy every admission path reports through.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("already exists")]
    AlreadyExists,
    #[error("referenced past is unresolvable")]
    PastMissing,
    #[error("invalid block: {0}")]
    InvalidBlock(&'static str),
    #[error("oversize block or transaction")]
    InvalidSize,
    #[error("proof of work below target")]
    InvalidPow,
    #[error("invalid transaction: {0}")]
    InvalidTx(&'static str),
    #[error("double spend")]
    TxDoubleSpend,
    #[error("timestamp violates ordering")]
    InvalidTimestamp,
    #[error("timestamp ahead of wall clock")]
    FutureTimestamp,
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("state transition failed: {0}")]
    State(#[from] StateError),
    #[error("caught internal fault: {0}")]
    Panic(String),
}

impl From<DagError> for ChainError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::Collision(_) => ChainError::AlreadyExists,
            DagError::Disconnected(_) => ChainError::PastMissing,
            DagError::TimestampOrder => ChainError::InvalidTimestamp,
            DagError::HeightMismatch => ChainError::InvalidBlock("miniblock height mismatch"),
        }
    }
}

impl From<MempoolError> for ChainError {
    fn from(err: MempoolError) -> Self {
        match err {
            MempoolError::AlreadyExists => ChainError::AlreadyExists,
            MempoolError::NonceConflict => ChainError::TxDoubleSpend,
            MempoolError::WrongType => ChainError::InvalidTx("not a transfer"),
        }
    }
}

impl From<RegPoolError> for ChainError {
    fn from(err: RegPoolError) -> Self {
        match err {
            RegPoolError::AlreadyPending => ChainError::AlreadyExists,
            RegPoolError::PowFloor => ChainError::InvalidTx("registration misses pow floor"),
            RegPoolError::BadSignature => ChainError::InvalidTx("registration signature"),
            RegPoolError::WrongType => ChainError::InvalidTx("not a registration"),
        }
    }
}

/// Mutable chain state behind the coordinator lock.
pub(crate) struct ChainInner {
    pub(crate) topo: TopoIndex,
    pub(crate) blocks: BlockStore,
    pub(crate) txs: TxStore,
    pub(crate) dag: MiniBlockCollection,
    /// Candidate heads: hash → height.
    pub(crate) tips: HashMap<Hash, u64>,
    pub(crate) mempool: Mempool,
    pub(crate) regpool: RegPool,
    pub(crate) diff_cache: DifficultyCache,
    /// Mining job registry: job id → template block.
    pub(crate) jobs: HashMap<u64, Block>,
    pub(crate) job_counter: u64,
}

/// What to broadcast once the lock is released.
#[derive(Default)]
pub(crate) struct Notices {
    pub(crate) new_block: bool,
    pub(crate) height_changed: bool,
    pub(crate) new_miniblock: bool,
    pub(crate) relay_block: Option<Vec<u8>>,
    pub(crate) relay_miniblock: Option<[u8; crate::constants::MINIBLOCK_SIZE]>,
}

/// The chain coordinator.
pub struct Chain {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) vm: Arc<dyn ContractVm>,
    pub(crate) hooks: Arc<RelayHooks>,
    pub(crate) notifier: Notifier,
    pub(crate) inner: RwLock<ChainInner>,
    relay_sender: mpsc::Sender<Hash>,
    relay_receiver: Mutex<Option<mpsc::Receiver<Hash>>>,
}

impl Chain {
    /// Build a chain over the given collaborators and bootstrap genesis.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        vm: Arc<dyn ContractVm>,
        hooks: Arc<RelayHooks>,
    ) -> Result<Chain, ChainError> {
        let genesis = config.genesis_block();
        let genesis_hash = genesis.hash();

        let base_version = store.latest_version();
        let snapshot = store.snapshot(base_version)?;
        let mut batch = StateBatch::new(snapshot);
        state::apply_miner_tx(&mut batch, &genesis.miner_tx, 0, 0)?;
        let version = store.commit(base_version, batch.into_trees())?;

        let mut blocks = BlockStore::new();
        blocks.put(
            genesis_hash,
            BlockRecord {
                bytes: genesis.serialize(),
                difficulty: config.minimum_difficulty,
                state_version: version,
                height: 0,
            },
        );
        let mut topo = TopoIndex::new();
        topo.set(
            0,
            TopoRecord {
                block_hash: genesis_hash,
                state_version: version,
                height: 0,
            },
        );
        let mut tips = HashMap::new();
        tips.insert(genesis_hash, 0);

        let (relay_sender, relay_receiver) = mpsc::channel(RELAY_QUEUE_CAPACITY);
        tracing::info!(genesis = %hex::encode(genesis_hash), "chain initialised");
        Ok(Chain {
            config,
            store,
            vm,
            hooks,
            notifier: Notifier::new(),
            inner: RwLock::new(ChainInner {
                topo,
                blocks,
                txs: TxStore::new(),
                dag: MiniBlockCollection::new(),
                tips,
                mempool: Mempool::new(),
                regpool: RegPool::new(),
                diff_cache: DifficultyCache::new(),
                jobs: HashMap::new(),
                job_counter: 0,
            }),
            relay_sender,
            relay_receiver: Mutex::new(Some(relay_receiver)),
        })
    }

    /// A self-contained chain for tests and the simulator: in-memory
    /// store, null VM, silent relay hooks.
    pub fn with_defaults(config: Config) -> Result<Chain, ChainError> {
        Chain::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(NullVm),
            Arc::new(RelayHooks::default()),
        )
    }

    /// Rebuild the volatile tip set from the topo index, as done after
    /// reopening a database.
    pub fn initialise_chain_from_db(&self) -> Result<(), ChainError> {
        let mut inner = self.write();
        let count = inner.topo.count();
        if count == 0 {
            return Err(ChainError::PastMissing);
        }
        let top = inner.topo.get(count - 1).ok_or(ChainError::PastMissing)?;
        inner.tips.clear();
        inner.tips.insert(top.block_hash, top.height);
        inner.diff_cache.clear();
        inner.jobs.clear();
        tracing::info!(height = top.height, "chain state reloaded");
        Ok(())
    }

    // a panic inside an entry point is converted to ChainError::Panic; the
    // lock itself recovers rather than staying poisoned
    pub(crate) fn write(&self) -> std::sync::RwLockWriteGuard<'_, ChainInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ChainInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn top_record(inner: &ChainInner) -> TopoRecord {
        let count = inner.topo.count();
        inner
            .topo
            .get(count.saturating_sub(1))
            .expect("chain always has a genesis record")
    }

    /// Current chain height.
    pub fn height(&self) -> u64 {
        Self::top_record(&self.read()).height
    }

    /// Hash of the current top block.
    pub fn top_hash(&self) -> Hash {
        Self::top_record(&self.read()).block_hash
    }

    /// Current candidate heads.
    pub fn tips(&self) -> Vec<Hash> {
        self.read().tips.keys().copied().collect()
    }

    pub fn mempool_len(&self) -> usize {
        self.read().mempool.len()
    }

    pub fn regpool_len(&self) -> usize {
        self.read().regpool.len()
    }

    pub fn miniblock_count(&self) -> usize {
        self.read().dag.len()
    }

    /// The notification surface.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Take the relay queue's receiving end; the relay task calls this
    /// once at startup.
    pub fn take_relay_receiver(&self) -> Option<mpsc::Receiver<Hash>> {
        self.relay_receiver.lock().expect("relay lock poisoned").take()
    }

    /// Serialized bytes of a stored block.
    pub fn block_bytes(&self, hash: &Hash) -> Result<Vec<u8>, ChainError> {
        Ok(self.read().blocks.read(hash)?.bytes.clone())
    }

    /// Merkle root of an asset's balance tree at the state a block
    /// committed.
    pub fn balance_root_at(&self, blid: &Hash, scid: &Hash) -> Result<Hash, ChainError> {
        let inner = self.read();
        let version = inner.blocks.read_version(blid)?;
        let snapshot = self.store.snapshot(version)?;
        Ok(snapshot
            .tree(&state::balance_tree_name(scid))
            .map(|t| t.root())
            .unwrap_or(crate::ZERO_HASH))
    }

    /// Read one account at the state a block committed.
    pub fn account_at(
        &self,
        blid: &Hash,
        scid: &Hash,
        address: &Address,
    ) -> Result<Option<state::Account>, ChainError> {
        let inner = self.read();
        let version = inner.blocks.read_version(blid)?;
        let snapshot = self.store.snapshot(version)?;
        Ok(state::account_at(
            &snapshot,
            &state::balance_tree_name(scid),
            address,
        )?)
    }

    /// Ring ciphertexts at the state a block committed; absent accounts of
    /// registered addresses read as zero.
    pub fn ring_ciphertexts(
        &self,
        blid: &Hash,
        scid: &Hash,
        addresses: &[Address],
    ) -> Result<Vec<Ciphertext>, ChainError> {
        let inner = self.read();
        let version = inner.blocks.read_version(blid)?;
        let snapshot = self.store.snapshot(version)?;
        let tree = state::balance_tree_name(scid);
        addresses
            .iter()
            .map(|address| {
                match state::account_at(&snapshot, &tree, address)? {
                    Some(account) => Ok(account.balance),
                    None if state::is_registered(&snapshot, address) => Ok(Ciphertext::zero()),
                    None => Err(ChainError::InvalidTx("ring member unregistered")),
                }
            })
            .collect()
    }

    /// Miniblock difficulty for a tip set, cached until the tips change.
    pub(crate) fn difficulty_for_tips(
        &self,
        inner: &mut ChainInner,
        tips: &[Hash],
    ) -> Result<u64, ChainError> {
        if let Some(cached) = inner.diff_cache.get(tips) {
            return Ok(cached);
        }
        let minimum = self.config.minimum_difficulty;
        let tip = tips.first().ok_or(ChainError::PastMissing)?;
        let tip_record = inner.blocks.read(tip).map_err(|_| ChainError::PastMissing)?;
        let difficulty = if tip_record.height < 2 {
            minimum
        } else {
            let parent = Block::deserialize(&tip_record.bytes)?;
            let grand_hash = parent.tips.first().copied().ok_or(ChainError::PastMissing)?;
            let grand = Block::deserialize(&inner.blocks.read(&grand_hash)?.bytes)?;
            next_difficulty(
                tip_record.difficulty,
                parent.timestamp,
                grand.timestamp,
                minimum,
            )
        };
        inner.diff_cache.insert(tips, difficulty);
        Ok(difficulty)
    }

    pub(crate) fn notify(&self, notices: Notices) {
        if let Some(bytes) = &notices.relay_block {
            (self.hooks.relay_block)(bytes, "admitted");
        }
        if let Some(bytes) = &notices.relay_miniblock {
            (self.hooks.relay_miniblock)(bytes, "admitted");
        }
        if notices.new_block {
            self.notifier.notify_new_block();
        }
        if notices.height_changed {
            self.notifier.notify_height_changed();
        }
        if notices.new_miniblock {
            self.notifier.notify_new_miniblock();
        }
    }

    /// Admit a complete block: verify, persist, execute, commit, then
    /// update the tip set and indexes, all under one write lock.
    pub fn add_complete_block(&self, cb: &CompleteBlock) -> Result<Hash, ChainError> {
        let notices = {
            let mut inner = self.write();
            self.add_complete_block_locked(&mut inner, cb)?
        };
        let hash = cb.block.hash();
        self.notify(notices);
        Ok(hash)
    }

    pub(crate) fn add_complete_block_locked(
        &self,
        inner: &mut ChainInner,
        cb: &CompleteBlock,
    ) -> Result<Notices, ChainError> {
        let block = &cb.block;
        let hash = block.hash();
        if block.is_genesis() {
            return Err(ChainError::AlreadyExists);
        }

        // verification
        let difficulty = self.difficulty_for_tips(inner, &block.tips)?;
        let current = Self::top_record(inner);
        let ctx = VerifyContext {
            config: &self.config,
            store: &*self.store,
            topo: &inner.topo,
            blocks: &inner.blocks,
            tips: inner.tips.keys().copied().collect(),
            current_height: current.height,
            block_difficulty: difficulty,
            now_ms: crate::now_ms(),
        };
        verify_complete_block(cb, &ctx)?;

        // persist transactions
        for tx in &cb.txs {
            inner.txs.put(tx.hash(), tx.serialize());
        }

        // state execution and commit
        let parent_hash = block.tips[0];
        let parent_version = inner.blocks.read_version(&parent_hash)?;
        let snapshot = self.store.snapshot(parent_version)?;
        let mut batch = StateBatch::new(snapshot);
        let mut fees = 0u64;
        for tx in &cb.txs {
            state::apply_transaction(&mut batch, tx, block.height, &*self.vm)?;
            fees = fees.saturating_add(tx.fees());
        }
        state::apply_miner_tx(&mut batch, &block.miner_tx, fees, block.height)?;
        let version = self.store.commit(parent_version, batch.into_trees())?;

        inner.blocks.put(
            hash,
            BlockRecord {
                bytes: block.serialize(),
                difficulty,
                state_version: version,
                height: block.height,
            },
        );

        // topo index rewrite back to the common ancestor
        let height_changed = block.height > current.height;
        if height_changed {
            Self::rewrite_topo(inner, hash, block.height)?;
            inner.jobs.clear();
        }

        // tip set maintenance
        inner.tips.remove(&parent_hash);
        inner.tips.insert(hash, block.height);
        let top_height = Self::top_record(inner).height;
        inner.tips.retain(|_, h| *h + STABLE_LIMIT > top_height);

        // purge settled miniblocks
        if top_height >= STABLE_LIMIT {
            let purged = inner.dag.purge_height(top_height - STABLE_LIMIT);
            if purged > 0 {
                tracing::debug!(purged, "miniblocks below stable height removed");
            }
        }

        // pools: drop what this block mined
        for tx_hash in &block.tx_hashes {
            inner.mempool.delete(tx_hash);
        }
        for tx in &cb.txs {
            if tx.tx_type == TxType::Registration {
                if let Some(address) = tx.miner_address {
                    inner.regpool.delete(&address);
                }
            }
        }

        inner.diff_cache.clear();
        tracing::info!(
            height = block.height,
            hash = %hex::encode(hash),
            txs = cb.txs.len(),
            "block admitted"
        );
        Ok(Notices {
            new_block: true,
            height_changed,
            relay_block: Some(block.serialize()),
            ..Default::default()
        })
    }

    fn rewrite_topo(inner: &mut ChainInner, head: Hash, head_height: u64) -> Result<(), ChainError> {
        let mut hash = head;
        let mut height = head_height;
        loop {
            if inner
                .topo
                .get(height)
                .map(|r| r.block_hash == hash)
                .unwrap_or(false)
            {
                break;
            }
            let (state_version, parent) = {
                let record = inner.blocks.read(&hash)?;
                let parent = Block::deserialize(&record.bytes)?.tips.first().copied();
                (record.state_version, parent)
            };
            inner.topo.set(
                height,
                TopoRecord {
                    block_hash: hash,
                    state_version,
                    height,
                },
            );
            match (height, parent) {
                (0, _) | (_, None) => break,
                (_, Some(next)) => {
                    hash = next;
                    height -= 1;
                }
            }
        }
        Ok(())
    }

    /// Point the topo head at a competing same-height block when a
    /// miniblock disagrees with the current top. Both blocks already
    /// committed their snapshots; only the head pointer moves.
    pub fn flip_top(&self, competitor: Hash) -> Result<bool, ChainError> {
        let mut inner = self.write();
        self.flip_top_locked(&mut inner, competitor)
    }

    fn flip_top_locked(
        &self,
        inner: &mut ChainInner,
        competitor: Hash,
    ) -> Result<bool, ChainError> {
        let top = Self::top_record(inner);
        if top.block_hash == competitor {
            return Ok(false);
        }
        let comp = inner
            .blocks
            .read(&competitor)
            .map_err(|_| ChainError::PastMissing)?;
        if comp.height != top.height {
            return Ok(false);
        }
        let comp_parent = Block::deserialize(&comp.bytes)?
            .tips
            .first()
            .copied()
            .ok_or(ChainError::PastMissing)?;
        let cur = inner.blocks.read(&top.block_hash)?;
        let cur_parent = Block::deserialize(&cur.bytes)?
            .tips
            .first()
            .copied()
            .ok_or(ChainError::PastMissing)?;
        if comp_parent != cur_parent {
            return Ok(false);
        }
        let state_version = comp.state_version;
        inner.topo.set(
            top.height,
            TopoRecord {
                block_hash: competitor,
                state_version,
                height: top.height,
            },
        );
        inner.diff_cache.clear();
        inner.jobs.clear();
        tracing::info!(
            height = top.height,
            from = %hex::encode(top.block_hash),
            to = %hex::encode(competitor),
            "top flipped"
        );
        Ok(true)
    }

    /// Inbound serialized block.
    pub fn submit_block(&self, bytes: &[u8]) -> Result<Hash, ChainError> {
        self.supervised("submit_block", || {
            let block = Block::deserialize(bytes)?;
            let notices = {
                let mut inner = self.write();
                let txs = Self::resolve_txs(&inner, &block)?;
                let cb = CompleteBlock { block, txs };
                self.add_complete_block_locked(&mut inner, &cb)?
            };
            let hash = crate::sha3(bytes);
            self.notify(notices);
            Ok(hash)
        })
    }

    pub(crate) fn resolve_txs(inner: &ChainInner, block: &Block) -> Result<Vec<Transaction>, ChainError> {
        block
            .tx_hashes
            .iter()
            .map(|hash| {
                if let Some(tx) = inner.mempool.get(hash) {
                    return Ok(tx.clone());
                }
                if inner.regpool.exists_hash(hash) {
                    // regpool keys by address; scan is bounded by pool size
                    for tx in inner.regpool.list() {
                        if tx.hash() == *hash {
                            return Ok(tx);
                        }
                    }
                }
                match inner.txs.read(hash) {
                    Ok(bytes) => Ok(Transaction::deserialize(bytes)?),
                    Err(_) => Err(ChainError::PastMissing),
                }
            })
            .collect()
    }

    /// Inbound 68-byte miniblock from the network.
    pub fn submit_miniblock(&self, bytes: &[u8]) -> Result<MiniBlockId, ChainError> {
        self.supervised("submit_miniblock", || {
            let mbl = MiniBlock::deserialize(bytes)?;
            let mut relay = None;
            let id = {
                let mut inner = self.write();
                if inner.dag.is_collision(&mbl) {
                    return Err(ChainError::AlreadyExists);
                }

                // a genesis miniblock for the next interval that anchors on
                // a non-top tip is the signal a competing head won a race
                if mbl.genesis {
                    let top = Self::top_record(&inner);
                    if mbl.genesis_height() == top.height + 1
                        && !mbl.references_tips(&[top.block_hash])
                    {
                        let competitor = inner
                            .tips
                            .keys()
                            .copied()
                            .find(|t| mbl.references_tips(&[*t]));
                        if let Some(competitor) = competitor {
                            self.flip_top_locked(&mut inner, competitor)?;
                        }
                    }
                }

                let top_hash = Self::top_record(&inner).block_hash;
                let difficulty = self.difficulty_for_tips(&mut inner, &[top_hash])?;
                if !check_pow_target(&mbl.pow_hash(), difficulty) {
                    return Err(ChainError::InvalidPow);
                }
                let entry = inner.dag.insert(mbl)?;
                let id = entry.mbl.id();
                relay = Some(mbl.serialize());
                id
            };
            self.notify(Notices {
                new_miniblock: true,
                relay_miniblock: relay,
                ..Default::default()
            });
            Ok(id)
        })
    }

    /// Inbound serialized transaction: registrations go to the regpool,
    /// transfers are fully verified then pooled and queued for relay.
    pub fn submit_tx(&self, bytes: &[u8]) -> Result<Hash, ChainError> {
        self.supervised("submit_tx", || {
            let tx = Transaction::deserialize(bytes)?;
            match tx.tx_type {
                TxType::Registration => {
                    let mut inner = self.write();
                    let top = Self::top_record(&inner);
                    let snapshot = self.store.snapshot(top.state_version)?;
                    let address = tx.miner_address.ok_or(ChainError::InvalidTx("no address"))?;
                    if state::is_registered(&snapshot, &address) {
                        return Err(ChainError::AlreadyExists);
                    }
                    let hash =
                        inner
                            .regpool
                            .add(tx, self.config.simulator, crate::now_ms())?;
                    Ok(hash)
                }
                TxType::Normal | TxType::Burn | TxType::ScCall => {
                    let hash = {
                        let mut inner = self.write();
                        let tx_hash = tx.hash();
                        if inner.mempool.exists(&tx_hash) {
                            return Err(ChainError::AlreadyExists);
                        }
                        for nonce in tx.nonces() {
                            if inner
                                .mempool
                                .nonce_seen(&crate::crypto::point_to_compressed(&nonce))
                            {
                                return Err(ChainError::TxDoubleSpend);
                            }
                        }
                        let top = Self::top_record(&inner);
                        let top_hash_vec = inner.tips.keys().copied().collect();
                        let difficulty = self.config.minimum_difficulty;
                        let ctx = VerifyContext {
                            config: &self.config,
                            store: &*self.store,
                            topo: &inner.topo,
                            blocks: &inner.blocks,
                            tips: top_hash_vec,
                            current_height: top.height,
                            block_difficulty: difficulty,
                            now_ms: crate::now_ms(),
                        };
                        verify_transfer_tx(&tx, &ctx)?;
                        inner.mempool.add(tx, crate::now_ms())?
                    };
                    let _ = self.relay_sender.try_send(hash);
                    Ok(hash)
                }
                _ => Err(ChainError::InvalidTx("kind not accepted from the network")),
            }
        })
    }

    /// Pool housekeeping: evict mined or stale transfers and registrations
    /// that landed on chain. Driven by a timer task.
    pub fn housekeeping(&self) {
        let mut inner = self.write();
        let top = Self::top_record(&inner);
        inner.mempool.housekeeping(top.height);
        let Ok(snapshot) = self.store.snapshot(top.state_version) else {
            return;
        };
        inner
            .regpool
            .housekeeping(|address| state::is_registered(&snapshot, address));
    }

    /// Relay bookkeeping passthroughs for the relay task.
    pub fn relay_candidates(&self, now_ms: u64, max: usize) -> Vec<Hash> {
        self.read().mempool.relay_candidates(now_ms, max)
    }

    pub fn note_relayed(&self, hash: &Hash, peers: u32, now_ms: u64) {
        self.write().mempool.note_relayed(hash, peers, now_ms);
    }

    fn supervised<T>(
        &self,
        op: &'static str,
        f: impl FnOnce() -> Result<T, ChainError>,
    ) -> Result<T, ChainError> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(op, %msg, "operation dropped after internal fault");
                Err(ChainError::Panic(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_genesis() {
        let chain = Chain::with_defaults(Config::simulator()).unwrap();
        assert_eq!(chain.height(), 0);
        let genesis_hash = Config::simulator().genesis_block().hash();
        assert_eq!(chain.top_hash(), genesis_hash);
        assert_eq!(chain.tips(), vec![genesis_hash]);
    }

    #[test]
    fn genesis_resubmission_rejected() {
        let chain = Chain::with_defaults(Config::simulator()).unwrap();
        let genesis = Config::simulator().genesis_block();
        let err = chain.submit_block(&genesis.serialize()).unwrap_err();
        assert!(matches!(err, ChainError::AlreadyExists));
    }

    #[test]
    fn premine_account_exists_at_genesis() {
        let config = Config::simulator();
        let chain = Chain::with_defaults(config.clone()).unwrap();
        let genesis_hash = chain.top_hash();
        let account = chain
            .account_at(&genesis_hash, &crate::ZERO_HASH, &config.genesis_address)
            .unwrap()
            .expect("premine account");
        assert_eq!(account.nonce_height, 0);
    }

    #[test]
    fn initialise_from_db_rebuilds_tips() {
        let chain = Chain::with_defaults(Config::simulator()).unwrap();
        {
            let mut inner = chain.write();
            inner.tips.insert([9u8; 32], 0);
        }
        chain.initialise_chain_from_db().unwrap();
        assert_eq!(chain.tips().len(), 1);
        assert_eq!(chain.tips()[0], chain.top_hash());
    }

    #[test]
    fn supervisor_converts_panic() {
        let chain = Chain::with_defaults(Config::simulator()).unwrap();
        let err = chain
            .supervised("test", || -> Result<(), ChainError> {
                panic!("boom");
            })
            .unwrap_err();
        assert!(matches!(err, ChainError::Panic(msg) if msg.contains("boom")));
    }

    #[test]
    fn garbage_miniblock_rejected_as_decode_error() {
        let chain = Chain::with_defaults(Config::simulator()).unwrap();
        let err = chain.submit_miniblock(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }

    #[test]
    fn flip_top_switches_to_a_same_height_competitor() {
        let config = Config::simulator();
        let chain = Chain::with_defaults(config.clone()).unwrap();
        let integrator = Config::simulator_genesis_keypair().address();
        let genesis_hash = chain.top_hash();
        let a_hash = crate::miner::mine_block(&chain, integrator);
        assert_eq!(chain.top_hash(), a_hash);

        // a competitor at the same height, sharing the parent, already on
        // disk with its own committed snapshot
        let competitor = {
            let mut inner = chain.write();
            let a_record = inner.blocks.read(&a_hash).unwrap().clone();
            let mut b = Block::deserialize(&a_record.bytes).unwrap();
            b.minor_version += 1; // distinct hash, same parent
            let b_hash = b.hash();
            assert_eq!(b.tips[0], genesis_hash);
            inner.blocks.put(
                b_hash,
                BlockRecord {
                    bytes: b.serialize(),
                    difficulty: a_record.difficulty,
                    state_version: a_record.state_version,
                    height: 1,
                },
            );
            inner.tips.insert(b_hash, 1);
            b_hash
        };

        assert!(chain.flip_top(competitor).unwrap());
        assert_eq!(chain.top_hash(), competitor);
        // flipping to the current top is a no-op
        assert!(!chain.flip_top(competitor).unwrap());
        // an unknown competitor cannot be flipped to
        assert!(matches!(
            chain.flip_top([0xEE; 32]),
            Err(ChainError::PastMissing)
        ));
    }

    #[test]
    fn reorg_rewrites_topo_to_common_ancestor() {
        let config = Config::simulator();
        let chain = Chain::with_defaults(config).unwrap();
        let integrator = Config::simulator_genesis_keypair().address();
        let b1 = crate::miner::mine_block(&chain, integrator);
        let b2 = crate::miner::mine_block(&chain, integrator);
        let inner = chain.inner.read().unwrap();
        assert_eq!(inner.topo.count(), 3);
        assert_eq!(inner.topo.get(1).unwrap().block_hash, b1);
        assert_eq!(inner.topo.get(2).unwrap().block_hash, b2);
        // versions are monotonic along the chain
        assert!(inner.topo.get(1).unwrap().state_version < inner.topo.get(2).unwrap().state_version);
    }
}
