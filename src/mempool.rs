//! Transaction mempool with fee-per-byte ordering and proof-nonce conflict
//! detection.
//!
//! Holds fully verified transfer transactions waiting for a block template.
//! Entries key by transaction hash and additionally by every payload's
//! proof nonce: two transactions sharing a nonce point cannot coexist,
//! which is the pool-level half of double-spend prevention. Relay metadata
//! (added-at, relay count, last relay time) rides along for the relay
//! task.

use std::collections::{BTreeMap, HashMap};

use crate::crypto::point_to_compressed;
use crate::transaction::{Transaction, TxType};
use crate::Hash;

/// Errors from mempool operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    AlreadyExists,
    #[error("proof nonce collides with a pooled transaction")]
    NonceConflict,
    #[error("only transfer transactions enter the mempool")]
    WrongType,
}

/// A pooled transaction with its metadata.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub added_at_ms: u64,
    pub relay_count: u32,
    pub last_relay_ms: u64,
    pub size: usize,
    pub fee_per_byte: u64,
}

/// Fee ordering key: higher fee-per-byte first, older insertion first on
/// ties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct FeeKey {
    neg_fee_per_byte: u64,
    insertion_order: u64,
}

impl FeeKey {
    fn new(fee_per_byte: u64, insertion_order: u64) -> Self {
        FeeKey {
            neg_fee_per_byte: u64::MAX - fee_per_byte,
            insertion_order,
        }
    }
}

/// The mempool.
#[derive(Default)]
pub struct Mempool {
    txs: HashMap<Hash, MempoolEntry>,
    fee_index: BTreeMap<FeeKey, Hash>,
    fee_keys: HashMap<Hash, FeeKey>,
    /// Compressed nonce point → owning tx hash.
    nonce_index: HashMap<[u8; 33], Hash>,
    insertion_counter: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn exists(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.txs.get(hash).map(|e| &e.tx)
    }

    /// Whether any pooled transaction already carries this nonce point.
    pub fn nonce_seen(&self, nonce: &[u8; 33]) -> bool {
        self.nonce_index.contains_key(nonce)
    }

    /// Admit a verified transfer. The caller has already run full proof
    /// verification; the pool only enforces its own keying invariants.
    pub fn add(&mut self, tx: Transaction, now_ms: u64) -> Result<Hash, MempoolError> {
        if !tx.tx_type.has_payloads() {
            return Err(MempoolError::WrongType);
        }
        let hash = tx.hash();
        if self.txs.contains_key(&hash) {
            return Err(MempoolError::AlreadyExists);
        }
        let nonces: Vec<[u8; 33]> = tx
            .nonces()
            .iter()
            .map(point_to_compressed)
            .collect();
        for nonce in &nonces {
            if self.nonce_index.contains_key(nonce) {
                return Err(MempoolError::NonceConflict);
            }
        }

        let size = tx.size().max(1);
        let fee_per_byte = tx.fees() / size as u64;
        let key = FeeKey::new(fee_per_byte, self.insertion_counter);
        self.insertion_counter += 1;

        for nonce in nonces {
            self.nonce_index.insert(nonce, hash);
        }
        self.fee_index.insert(key, hash);
        self.fee_keys.insert(hash, key);
        self.txs.insert(
            hash,
            MempoolEntry {
                tx,
                added_at_ms: now_ms,
                relay_count: 0,
                last_relay_ms: 0,
                size,
                fee_per_byte,
            },
        );
        Ok(hash)
    }

    pub fn delete(&mut self, hash: &Hash) -> Option<Transaction> {
        let entry = self.txs.remove(hash)?;
        if let Some(key) = self.fee_keys.remove(hash) {
            self.fee_index.remove(&key);
        }
        for nonce in entry.tx.nonces() {
            self.nonce_index.remove(&point_to_compressed(&nonce));
        }
        Some(entry.tx)
    }

    /// Transactions ordered by descending fee-per-byte.
    pub fn list_sorted_by_fee(&self) -> Vec<Transaction> {
        self.fee_index
            .values()
            .filter_map(|h| self.txs.get(h).map(|e| e.tx.clone()))
            .collect()
    }

    /// Drop transactions that are mined or stale:
    /// `tx.height + 1 ≤ current_height`. Returns the evicted hashes.
    pub fn housekeeping(&mut self, current_height: u64) -> Vec<Hash> {
        let stale: Vec<Hash> = self
            .txs
            .iter()
            .filter(|(_, e)| e.tx.height + 1 <= current_height)
            .map(|(h, _)| *h)
            .collect();
        for hash in &stale {
            self.delete(hash);
        }
        if !stale.is_empty() {
            tracing::debug!(evicted = stale.len(), "mempool housekeeping");
        }
        stale
    }

    /// Hashes due for (re-)relay: fewer than the peer target and quiet for
    /// at least one relay round.
    pub fn relay_candidates(&self, now_ms: u64, max: usize) -> Vec<Hash> {
        use crate::constants::{RELAY_PEER_TARGET, RELAY_ROUND_MS};
        self.fee_index
            .values()
            .filter_map(|h| self.txs.get(h).map(|e| (h, e)))
            .filter(|(_, e)| {
                e.relay_count < RELAY_PEER_TARGET
                    && now_ms.saturating_sub(e.last_relay_ms) >= RELAY_ROUND_MS
            })
            .take(max)
            .map(|(h, _)| *h)
            .collect()
    }

    /// Record a relay round's outcome for one transaction.
    pub fn note_relayed(&mut self, hash: &Hash, peers: u32, now_ms: u64) {
        if let Some(entry) = self.txs.get_mut(hash) {
            entry.relay_count = entry.relay_count.saturating_add(peers);
            entry.last_relay_ms = now_ms;
        }
    }

    pub fn entry(&self, hash: &Hash) -> Option<&MempoolEntry> {
        self.txs.get(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::Ciphertext;
    use crate::crypto::Keypair;
    use crate::transaction::builder::{build_transfer, TransferSpec};
    use rand::SeedableRng;

    fn make_transfer(seed: u64, fees: u64, height: u64) -> Transaction {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let keys: Vec<Keypair> = (0..2).map(|_| Keypair::generate(&mut rng)).collect();
        let spec = TransferSpec {
            sender: &keys[0],
            sender_index: 0,
            receiver_index: 1,
            ring: keys.iter().map(|k| k.public).collect(),
            accounts: vec![Ciphertext::encrypt_plain(1_000_000); 2],
            sender_balance: 1_000_000,
            amount: 100,
            fees,
            burn: 0,
            scid: crate::ZERO_HASH,
            roothash: [0u8; 32],
            height,
            blid: [height as u8; 32],
        };
        build_transfer(&spec, TxType::Normal, Vec::new(), &mut rng).unwrap()
    }

    #[test]
    fn add_exists_get_delete() {
        let mut pool = Mempool::new();
        let tx = make_transfer(1, 10, 3);
        let hash = pool.add(tx.clone(), 100).unwrap();
        assert!(pool.exists(&hash));
        assert_eq!(pool.get(&hash).unwrap().hash(), hash);
        assert_eq!(pool.len(), 1);
        let removed = pool.delete(&hash).unwrap();
        assert_eq!(removed.hash(), hash);
        assert!(pool.is_empty());
        // nonce index is cleaned up with the entry
        assert!(pool.add(tx, 101).is_ok());
    }

    #[test]
    fn duplicate_rejected() {
        let mut pool = Mempool::new();
        let tx = make_transfer(2, 10, 3);
        pool.add(tx.clone(), 100).unwrap();
        assert_eq!(pool.add(tx, 101), Err(MempoolError::AlreadyExists));
    }

    #[test]
    fn nonce_conflict_rejected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let keys: Vec<Keypair> = (0..2).map(|_| Keypair::generate(&mut rng)).collect();
        let mk = |rng: &mut rand::rngs::StdRng, amount: u64| {
            let spec = TransferSpec {
                sender: &keys[0],
                sender_index: 0,
                receiver_index: 1,
                ring: keys.iter().map(|k| k.public).collect(),
                accounts: vec![Ciphertext::encrypt_plain(1_000_000); 2],
                sender_balance: 1_000_000,
                amount,
                fees: 10,
                burn: 0,
                scid: crate::ZERO_HASH,
                roothash: [0u8; 32],
                height: 3,
                blid: [3u8; 32],
            };
            build_transfer(&spec, TxType::Normal, Vec::new(), rng).unwrap()
        };
        // same sender, same validity window, same payload index: the nonce
        // point collides even though the tx hashes differ
        let tx1 = mk(&mut rng, 100);
        let tx2 = mk(&mut rng, 200);
        assert_ne!(tx1.hash(), tx2.hash());

        let mut pool = Mempool::new();
        pool.add(tx1, 100).unwrap();
        assert_eq!(pool.add(tx2, 101), Err(MempoolError::NonceConflict));
    }

    #[test]
    fn non_transfer_rejected() {
        let mut pool = Mempool::new();
        let kp = Keypair::from_secret(crate::crypto::Scalar::from(5u64));
        let tx = Transaction::coinbase(kp.address());
        assert_eq!(pool.add(tx, 100), Err(MempoolError::WrongType));
    }

    #[test]
    fn fee_ordering_is_descending_per_byte() {
        let mut pool = Mempool::new();
        pool.add(make_transfer(10, 500, 3), 100).unwrap();
        pool.add(make_transfer(11, 90_000, 3), 100).unwrap();
        pool.add(make_transfer(12, 20_000, 3), 100).unwrap();
        let fees: Vec<u64> = pool.list_sorted_by_fee().iter().map(|t| t.fees()).collect();
        assert_eq!(fees, vec![90_000, 20_000, 500]);
    }

    #[test]
    fn housekeeping_evicts_mined_heights() {
        let mut pool = Mempool::new();
        let old = pool.add(make_transfer(20, 10, 2), 100).unwrap();
        let fresh = pool.add(make_transfer(21, 10, 9), 100).unwrap();
        let evicted = pool.housekeeping(3); // 2 + 1 ≤ 3 evicts the old one
        assert_eq!(evicted, vec![old]);
        assert!(pool.exists(&fresh));
    }

    #[test]
    fn relay_bookkeeping() {
        let mut pool = Mempool::new();
        let hash = pool.add(make_transfer(30, 10, 3), 0).unwrap();
        // eligible immediately (never relayed)
        assert_eq!(pool.relay_candidates(10_000, 10), vec![hash]);
        pool.note_relayed(&hash, 3, 10_000);
        // quiet period not yet over
        assert!(pool.relay_candidates(11_000, 10).is_empty());
        // due again after a round, until the peer target is reached
        assert_eq!(pool.relay_candidates(14_000, 10), vec![hash]);
        pool.note_relayed(&hash, 10, 14_000);
        assert!(pool.relay_candidates(60_000, 10).is_empty());
    }
}
