//! The block verification pipeline: an ordered gauntlet of structural,
//! temporal, cryptographic, and economic checks. The first failure rejects
//! the block with a typed error; nothing here mutates state.
//!
//! The expensive tail of the pipeline, proof verification and nonce
//! validity for every transaction, fans out across a rayon worker pool
//! with a shared atomic fail flag so one bad transaction stops the rest
//! early.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::block::Block;
use crate::chain::ChainError;
use crate::config::{version_at_height, Config};
use crate::constants::{
    CHAIN_LOOKBACK, MINIBLOCKS_PER_BLOCK, REGISTRATION_POW_BLOCK_BYTES, STABLE_LIMIT,
    TIMESTAMP_TOLERANCE_MS, TX_VALIDITY_HEIGHT,
};
use crate::crypto::{point_to_compressed, Address};
use crate::consensus::dag::MiniBlockCollection;
use crate::consensus::difficulty::check_pow_target;
use crate::state;
use crate::storage::{BlockStore, Snapshot, Store, TopoIndex};
use crate::transaction::{leading_zero_bytes, Transaction, TxType};
use crate::Hash;

/// A block together with its resolved transactions, in `tx_hashes` order.
#[derive(Clone, Debug)]
pub struct CompleteBlock {
    pub block: Block,
    pub txs: Vec<Transaction>,
}

/// Everything the pipeline needs to judge a block.
pub struct VerifyContext<'a> {
    pub config: &'a Config,
    pub store: &'a dyn Store,
    pub topo: &'a TopoIndex,
    pub blocks: &'a BlockStore,
    /// Current candidate heads.
    pub tips: Vec<Hash>,
    pub current_height: u64,
    /// Miniblock difficulty for this block's tip set.
    pub block_difficulty: u64,
    pub now_ms: u64,
}

/// Run the full pipeline on a non-genesis complete block.
pub fn verify_complete_block(cb: &CompleteBlock, ctx: &VerifyContext<'_>) -> Result<(), ChainError> {
    let block = &cb.block;
    let hash = block.hash();

    // 1. duplicate
    if ctx.tips.contains(&hash) || ctx.topo.topoheight_of(&hash).is_some() || ctx.blocks.has(&hash)
    {
        return Err(ChainError::AlreadyExists);
    }

    // 2. height window
    if block.height > ctx.current_height + 2
        || block.height + STABLE_LIMIT < ctx.current_height
    {
        return Err(ChainError::InvalidBlock("height outside admission window"));
    }

    // 3. tip count
    if block.tips.len() != 1 {
        return Err(ChainError::InvalidBlock("block must carry exactly one tip"));
    }
    let parent_hash = block.tips[0];

    // 4. tip resolvability
    if !ctx.blocks.has(&parent_hash) {
        return Err(ChainError::PastMissing);
    }

    // 5. height coherence
    let parent_height = ctx.blocks.read_height(&parent_hash)?;
    if block.height != parent_height + 1 {
        return Err(ChainError::InvalidBlock("height does not extend the tip"));
    }

    // 6. genesis invariants
    if (block.height == 0) != block.tips.is_empty() {
        return Err(ChainError::InvalidBlock("genesis shape violation"));
    }

    // 7. timestamp sanity
    if block.timestamp > ctx.now_ms + TIMESTAMP_TOLERANCE_MS {
        return Err(ChainError::FutureTimestamp);
    }
    let parent_block = Block::deserialize(&ctx.blocks.read(&parent_hash)?.bytes)?;
    if block.timestamp <= parent_block.timestamp && parent_height != 0 {
        return Err(ChainError::InvalidTimestamp);
    }

    // 8. fork version
    if block.major_version != version_at_height(block.height) {
        return Err(ChainError::InvalidBlock("major version not active at height"));
    }

    // 9. block size
    let total: usize = cb.txs.iter().map(|t| t.size()).sum();
    if total >= ctx.config.max_block_size {
        return Err(ChainError::InvalidSize);
    }

    // 10. miniblock structure
    verify_miniblock_section(block)?;

    // 11. final-miniblock binding
    if !block.final_miniblock_binds() {
        return Err(ChainError::InvalidBlock("final miniblock does not bind header"));
    }

    // 12. miner-address registration for every non-final miniblock
    verify_miniblock_miners(block, ctx)?;

    // 13. miniblock PoW
    for mbl in &block.miniblocks {
        if !check_pow_target(&mbl.pow_hash(), ctx.block_difficulty) {
            return Err(ChainError::InvalidPow);
        }
    }

    // 14. coinbase validity
    verify_miner_tx(block, &parent_hash, ctx)?;

    // 15. tx-hash coverage
    if block.tx_hashes.len() != cb.txs.len() {
        return Err(ChainError::InvalidBlock("tx hash count mismatch"));
    }
    let mut seen = HashSet::new();
    for (hash, tx) in block.tx_hashes.iter().zip(&cb.txs) {
        if !seen.insert(*hash) {
            return Err(ChainError::InvalidBlock("duplicate tx hash"));
        }
        if tx.hash() != *hash {
            return Err(ChainError::InvalidTx("tx does not match listed hash"));
        }
    }

    // 16–18. per-tx structural checks
    for tx in &cb.txs {
        verify_tx_structure(tx, block, ctx)?;
    }

    // 19. intra-block uniqueness
    verify_intra_block_uniqueness(&cb.txs)?;

    // 20–21. proofs and nonce validity, in parallel
    let failed = AtomicBool::new(false);
    cb.txs.par_iter().try_for_each(|tx| {
        if failed.load(Ordering::Relaxed) {
            return Err(ChainError::InvalidTx("verification aborted"));
        }
        let result = verify_transfer_tx(tx, ctx);
        if result.is_err() {
            failed.store(true, Ordering::Relaxed);
        }
        result
    })?;

    Ok(())
}

/// Checks 10: exactly ten miniblocks forming one chain over the block's
/// tips, all at the block's height, closed by a single final miniblock.
fn verify_miniblock_section(block: &Block) -> Result<(), ChainError> {
    if block.miniblocks.len() != MINIBLOCKS_PER_BLOCK {
        return Err(ChainError::InvalidBlock("miniblock count mismatch"));
    }
    let mut scratch = MiniBlockCollection::new();
    for mbl in &block.miniblocks {
        if mbl.genesis && !mbl.references_tips(&block.tips) {
            return Err(ChainError::InvalidBlock("genesis miniblock off the tips"));
        }
        if mbl.genesis && mbl.genesis_height() != block.height {
            return Err(ChainError::InvalidBlock("genesis miniblock height mismatch"));
        }
        scratch
            .insert(*mbl)
            .map_err(|_| ChainError::InvalidBlock("miniblock section not a connected chain"))?;
    }
    // exactly one final miniblock: the last one, at full distance
    let last = block.miniblocks.last().expect("count checked above");
    let final_distance = scratch
        .get(last.id())
        .map(|e| e.distance)
        .unwrap_or_default();
    if final_distance as usize != MINIBLOCKS_PER_BLOCK - 1 {
        return Err(ChainError::InvalidBlock("final miniblock distance mismatch"));
    }
    Ok(())
}

/// Check 12: each non-final miniblock's key hash must belong to an address
/// registered at least `CHAIN_LOOKBACK` blocks back. Young chains skip the
/// check; nobody can be that old yet.
fn verify_miniblock_miners(block: &Block, ctx: &VerifyContext<'_>) -> Result<(), ChainError> {
    if ctx.current_height < CHAIN_LOOKBACK {
        return Ok(());
    }
    let lookback_topo = ctx.current_height - CHAIN_LOOKBACK;
    let Some(record) = ctx.topo.get(lookback_topo) else {
        return Err(ChainError::PastMissing);
    };
    let snapshot = ctx.store.snapshot(record.state_version)?;
    let final_id = block.miniblocks.last().map(|m| m.id());
    for mbl in &block.miniblocks {
        if Some(mbl.id()) == final_id {
            continue;
        }
        if !state::key_hash_registered(&snapshot, &mbl.key_hash) {
            return Err(ChainError::InvalidBlock("miniblock miner not registered"));
        }
    }
    Ok(())
}

/// Check 14: premine only at height 0, coinbase elsewhere; the integrator
/// must exist in the parent's balance tree.
fn verify_miner_tx(
    block: &Block,
    parent_hash: &Hash,
    ctx: &VerifyContext<'_>,
) -> Result<(), ChainError> {
    let expected = if block.height == 0 {
        TxType::Premine
    } else {
        TxType::Coinbase
    };
    if block.miner_tx.tx_type != expected {
        return Err(ChainError::InvalidTx("wrong miner tx kind"));
    }
    let Some(address) = block.miner_tx.miner_address else {
        return Err(ChainError::InvalidTx("miner tx carries no address"));
    };
    if block.height > 0 {
        let version = ctx.blocks.read_version(parent_hash)?;
        let snapshot = ctx.store.snapshot(version)?;
        if !state::is_registered(&snapshot, &address) {
            return Err(ChainError::InvalidTx("integrator not registered"));
        }
    }
    Ok(())
}

/// Checks 16–18 for one transaction.
fn verify_tx_structure(
    tx: &Transaction,
    block: &Block,
    ctx: &VerifyContext<'_>,
) -> Result<(), ChainError> {
    match tx.tx_type {
        TxType::Premine | TxType::Coinbase => {
            Err(ChainError::InvalidTx("miner tx listed in tx hashes"))
        }
        TxType::Registration => {
            tx.verify_registration()
                .map_err(|_| ChainError::InvalidTx("registration signature"))?;
            if !ctx.config.simulator
                && leading_zero_bytes(&tx.hash()) < REGISTRATION_POW_BLOCK_BYTES
            {
                return Err(ChainError::InvalidTx("registration misses pow floor"));
            }
            Ok(())
        }
        TxType::Normal | TxType::Burn | TxType::ScCall => {
            // 16. height bound
            if tx.height >= block.height {
                return Err(ChainError::InvalidTx("tx height not below block height"));
            }
            // 17. freshness and BLID reachability
            if block.height - tx.height >= TX_VALIDITY_HEIGHT {
                return Err(ChainError::InvalidTx("tx expired"));
            }
            if !blid_reachable(&tx.blid, &block.tips[0], ctx) {
                return Err(ChainError::PastMissing);
            }
            // 18. contract-install hash shape
            if tx.is_contract_install() {
                let hash = tx.hash();
                if hash[0] < 0x80 || hash[31] < 0x80 {
                    return Err(ChainError::InvalidTx("install hash outside id space"));
                }
            }
            tx.validate_statements()
                .map_err(|_| ChainError::InvalidTx("statement shape"))?;
            Ok(())
        }
    }
}

/// Walk the single-parent chain from `from` for up to `CHAIN_LOOKBACK`
/// steps looking for `blid`.
fn blid_reachable(blid: &Hash, from: &Hash, ctx: &VerifyContext<'_>) -> bool {
    let mut cursor = *from;
    for _ in 0..=CHAIN_LOOKBACK {
        if cursor == *blid {
            return true;
        }
        let Ok(record) = ctx.blocks.read(&cursor) else {
            return false;
        };
        let Ok(parent) = Block::deserialize(&record.bytes) else {
            return false;
        };
        match parent.tips.first() {
            Some(next) => cursor = *next,
            None => return false, // reached genesis
        }
    }
    false
}

/// Check 19: no duplicate registration addresses, proof nonces, or
/// parity-selected ring keys across the block.
fn verify_intra_block_uniqueness(txs: &[Transaction]) -> Result<(), ChainError> {
    let mut reg_addresses: HashSet<Address> = HashSet::new();
    let mut nonces: HashSet<[u8; 33]> = HashSet::new();
    let mut spend_keys: HashSet<[u8; 33]> = HashSet::new();
    for tx in txs {
        match tx.tx_type {
            TxType::Registration => {
                let address = tx.miner_address.expect("validated earlier");
                if !reg_addresses.insert(address) {
                    return Err(ChainError::TxDoubleSpend);
                }
            }
            TxType::Normal | TxType::Burn | TxType::ScCall => {
                for payload in &tx.payloads {
                    let nonce = point_to_compressed(&payload.proof.u);
                    if !nonces.insert(nonce) {
                        return Err(ChainError::TxDoubleSpend);
                    }
                    let parity_even = payload.proof.sender_parity_even();
                    for (i, member) in payload.statement.ring.iter().enumerate() {
                        if (i % 2 == 0) == parity_even
                            && !spend_keys.insert(point_to_compressed(member))
                        {
                            return Err(ChainError::TxDoubleSpend);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Checks 20–21 for one transfer: statement resolution against the BLID
/// snapshot, proof verification, and nonce-height validity against every
/// current tip. Also used verbatim for mempool admission.
pub fn verify_transfer_tx(tx: &Transaction, ctx: &VerifyContext<'_>) -> Result<(), ChainError> {
    if !tx.tx_type.has_payloads() {
        return Ok(());
    }
    let Some(topoheight) = ctx.topo.topoheight_of(&tx.blid) else {
        return Err(ChainError::PastMissing);
    };
    let record = ctx.topo.get(topoheight).ok_or(ChainError::PastMissing)?;
    let blid_snapshot = ctx.store.snapshot(record.state_version)?;
    let prefix_hash = tx.prefix_hash();

    for (index, payload) in tx.payloads.iter().enumerate() {
        payload
            .statement
            .validate()
            .map_err(|_| ChainError::InvalidTx("statement shape"))?;

        // the statement must reference the exact state it was built on
        let tree_name = state::balance_tree_name(&payload.scid);
        let actual_root = blid_snapshot
            .tree(&tree_name)
            .map(|t| t.root())
            .unwrap_or(crate::ZERO_HASH);
        if payload.statement.roothash != actual_root {
            return Err(ChainError::InvalidTx("statement root stale"));
        }

        // expand ring accounts from the BLID snapshot
        let mut accounts = Vec::with_capacity(payload.statement.ring.len());
        let mut blid_nonce_heights = Vec::with_capacity(payload.statement.ring.len());
        for member in &payload.statement.ring {
            let address = Address::from_point(member);
            let account = state::account_at(&blid_snapshot, &tree_name, &address)
                .map_err(|_| ChainError::InvalidTx("corrupt ring account"))?;
            let account = match account {
                Some(acc) => acc,
                None => {
                    if !state::is_registered(&blid_snapshot, &address) {
                        return Err(ChainError::InvalidTx("ring member unregistered"));
                    }
                    state::Account::empty()
                }
            };
            blid_nonce_heights.push(account.nonce_height);
            accounts.push(account.balance);
        }

        // 20. proof
        payload
            .verify_proof(&accounts, &prefix_hash, index as u32, tx.height)
            .map_err(|_| ChainError::InvalidTx("proof rejected"))?;

        // 21. nonce validity against every tip snapshot
        verify_nonce_heights(payload, &blid_nonce_heights, &tree_name, ctx)?;
    }
    Ok(())
}

/// For each parity-selected ring member, every tip's view of the
/// account must not have spent past the referenced state.
fn verify_nonce_heights(
    payload: &crate::transaction::Payload,
    blid_nonce_heights: &[u64],
    tree_name: &[u8],
    ctx: &VerifyContext<'_>,
) -> Result<(), ChainError> {
    let parity_even = payload.proof.sender_parity_even();
    for tip in &ctx.tips {
        let version = ctx.blocks.read_version(tip)?;
        let tip_snapshot: Snapshot = ctx.store.snapshot(version)?;
        for (i, member) in payload.statement.ring.iter().enumerate() {
            if (i % 2 == 0) != parity_even {
                continue;
            }
            let address = Address::from_point(member);
            let tip_nonce = state::account_at(&tip_snapshot, tree_name, &address)
                .map_err(|_| ChainError::InvalidTx("corrupt ring account"))?
                .map(|a| a.nonce_height)
                .unwrap_or(0);
            if tip_nonce > blid_nonce_heights[i] {
                return Err(ChainError::TxDoubleSpend);
            }
        }
    }
    Ok(())
}
