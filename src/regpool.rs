//! Registration pool: pending account registrations keyed by address.
//!
//! A registration is admitted once its signature checks out and its hash
//! clears the proof-of-work floor (three leading zero bytes; waived in
//! simulator mode). One pending registration per address; housekeeping
//! drops entries whose address has since registered on chain.

use std::collections::HashMap;

use crate::constants::REGISTRATION_POW_POOL_BYTES;
use crate::crypto::Address;
use crate::transaction::{leading_zero_bytes, Transaction, TxType};
use crate::Hash;

/// Errors from regpool operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegPoolError {
    #[error("a registration for this address is already pending")]
    AlreadyPending,
    #[error("registration hash misses the proof-of-work floor")]
    PowFloor,
    #[error("registration signature invalid")]
    BadSignature,
    #[error("not a registration transaction")]
    WrongType,
}

/// A pending registration with its metadata.
#[derive(Clone, Debug)]
pub struct RegPoolEntry {
    pub tx: Transaction,
    pub added_at_ms: u64,
    pub size: usize,
}

/// The registration pool.
#[derive(Default)]
pub struct RegPool {
    entries: HashMap<Address, RegPoolEntry>,
    by_hash: HashMap<Hash, Address>,
}

impl RegPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn exists_hash(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, address: &Address) -> Option<&Transaction> {
        self.entries.get(address).map(|e| &e.tx)
    }

    /// Admit a registration.
    pub fn add(&mut self, tx: Transaction, simulator: bool, now_ms: u64) -> Result<Hash, RegPoolError> {
        if tx.tx_type != TxType::Registration {
            return Err(RegPoolError::WrongType);
        }
        tx.verify_registration()
            .map_err(|_| RegPoolError::BadSignature)?;
        let hash = tx.hash();
        if !simulator && leading_zero_bytes(&hash) < REGISTRATION_POW_POOL_BYTES {
            return Err(RegPoolError::PowFloor);
        }
        let address = tx.miner_address.expect("registration carries an address");
        if self.entries.contains_key(&address) {
            return Err(RegPoolError::AlreadyPending);
        }
        let size = tx.size();
        self.by_hash.insert(hash, address);
        self.entries.insert(
            address,
            RegPoolEntry {
                tx,
                added_at_ms: now_ms,
                size,
            },
        );
        Ok(hash)
    }

    pub fn delete(&mut self, address: &Address) -> Option<Transaction> {
        let entry = self.entries.remove(address)?;
        self.by_hash.remove(&entry.tx.hash());
        Some(entry.tx)
    }

    /// Pending registrations, oldest first.
    pub fn list(&self) -> Vec<Transaction> {
        let mut entries: Vec<&RegPoolEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.added_at_ms);
        entries.iter().map(|e| e.tx.clone()).collect()
    }

    /// Drop every entry whose address the predicate reports as registered
    /// on chain. Returns how many went.
    pub fn housekeeping(&mut self, is_registered: impl Fn(&Address) -> bool) -> usize {
        let registered: Vec<Address> = self
            .entries
            .keys()
            .filter(|a| is_registered(a))
            .copied()
            .collect();
        for address in &registered {
            self.delete(address);
        }
        if !registered.is_empty() {
            tracing::debug!(evicted = registered.len(), "regpool housekeeping");
        }
        registered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use rand::SeedableRng;

    fn registration(seed: u64) -> (Keypair, Transaction) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let kp = Keypair::generate(&mut rng);
        let sig = kp.sign_address(&mut rng);
        let tx = Transaction::registration(kp.address(), sig);
        (kp, tx)
    }

    #[test]
    fn add_and_reject_repeat() {
        let mut pool = RegPool::new();
        let (kp, tx) = registration(1);
        let hash = pool.add(tx.clone(), true, 100).unwrap();
        assert!(pool.exists(&kp.address()));
        assert!(pool.exists_hash(&hash));
        // a second registration for the same address, pending or identical
        assert_eq!(
            pool.add(tx, true, 101),
            Err(RegPoolError::AlreadyPending)
        );
    }

    #[test]
    fn pow_floor_enforced_outside_simulator() {
        let mut pool = RegPool::new();
        let (_, tx) = registration(2);
        // a random registration essentially never clears three zero bytes
        assert_eq!(pool.add(tx, false, 100), Err(RegPoolError::PowFloor));
    }

    #[test]
    fn bad_signature_rejected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let kp = Keypair::generate(&mut rng);
        let other = Keypair::generate(&mut rng);
        let sig = other.sign_address(&mut rng); // signature over the wrong address
        let tx = Transaction::registration(kp.address(), sig);
        let mut pool = RegPool::new();
        assert_eq!(pool.add(tx, true, 100), Err(RegPoolError::BadSignature));
    }

    #[test]
    fn housekeeping_drops_registered_addresses() {
        let mut pool = RegPool::new();
        let (kp1, tx1) = registration(4);
        let (_kp2, tx2) = registration(5);
        pool.add(tx1, true, 100).unwrap();
        pool.add(tx2, true, 101).unwrap();
        let dropped = pool.housekeeping(|a| *a == kp1.address());
        assert_eq!(dropped, 1);
        assert!(!pool.exists(&kp1.address()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn list_is_oldest_first() {
        let mut pool = RegPool::new();
        let (_, tx1) = registration(6);
        let (_, tx2) = registration(7);
        let h1 = tx1.hash();
        pool.add(tx2, true, 200).unwrap();
        pool.add(tx1, true, 100).unwrap();
        let listed = pool.list();
        assert_eq!(listed[0].hash(), h1);
    }
}
