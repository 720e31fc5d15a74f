//! # Strata
//!
//! The consensus core of a privacy cryptocurrency built around a two-tier
//! block structure:
//! - **Blocks** anchor ledger state and carry the coinbase plus a batch of
//!   transactions; each block has exactly one parent.
//! - **MiniBlocks** are fixed 68-byte proof-of-work units forming a DAG
//!   inside each block interval. A block closes when it collects ten
//!   miniblocks chaining back to its parent, the last of which commits to
//!   the block header by hash.
//! - **Confidential transfers** move homomorphically encrypted balances
//!   among a ring of accounts, gated by a Bulletproofs-style range proof
//!   combined with a one-out-of-many ring proof over the BN256 curve.
//!
//! Peer transport, persistent storage, and the contract VM are external
//! collaborators reached through the interfaces in [`relay`], [`storage`],
//! and [`state`].

pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mempool;
pub mod miner;
pub mod miniblock;
pub mod regpool;
pub mod relay;
pub mod state;
pub mod storage;
pub mod transaction;

/// Protocol constants
pub mod constants {
    /// Target block cadence in seconds; also the basis for the miniblock count.
    pub const BLOCK_TIME: u64 = 18;
    /// Difficulty share reserved for the final miniblock.
    pub const MINIBLOCK_HIGHDIFF: u64 = 9;
    /// Miniblocks per block: `BLOCK_TIME - MINIBLOCK_HIGHDIFF + 1`.
    pub const MINIBLOCKS_PER_BLOCK: usize = (BLOCK_TIME - MINIBLOCK_HIGHDIFF + 1) as usize;
    /// Serialized miniblock size in bytes.
    pub const MINIBLOCK_SIZE: usize = 68;
    /// Reorg horizon: blocks deeper than this below the top are immutable.
    pub const STABLE_LIMIT: u64 = 8;
    /// A transaction must be mined within this many blocks of its reference height.
    pub const TX_VALIDITY_HEIGHT: u64 = 11;
    /// Maximum ring size for confidential transfers (must be a power of two).
    pub const MAX_RING_SIZE: usize = 128;
    /// Minimum ring size for confidential transfers.
    pub const MIN_RING_SIZE: usize = 2;
    /// Initial balance credited to a freshly registered account, in atomic units.
    pub const REGISTRATION_INITIAL_BALANCE: u64 = 800_000;
    /// Flat block-integrator reward added to collected fees, in atomic units.
    pub const COINBASE_CONSTANT_REWARD: u64 = 50_000;
    /// Allowed forward clock drift for block timestamps, in milliseconds.
    pub const TIMESTAMP_TOLERANCE_MS: u64 = 50;
    /// Ancestry depth for miner-registration and BLID reachability checks.
    pub const CHAIN_LOOKBACK: u64 = 25;
    /// Bits covered by the transfer range proof: 64 for the amount,
    /// 64 for the post-transfer balance.
    pub const RANGE_PROOF_BITS: usize = 128;
    /// Bits per committed value inside the range proof.
    pub const VALUE_BITS: usize = 64;
    /// Leading zero bytes required on a registration tx hash for pool admission.
    pub const REGISTRATION_POW_POOL_BYTES: usize = 3;
    /// Leading zero bytes required on a registration tx hash inside a block.
    pub const REGISTRATION_POW_BLOCK_BYTES: usize = 2;
    /// Maximum tx hashes relayed per relay round.
    pub const RELAY_BURST: usize = 200;
    /// Relay round interval in milliseconds.
    pub const RELAY_ROUND_MS: u64 = 4_000;
    /// Stop re-relaying a transaction once it has reached this many peers.
    pub const RELAY_PEER_TARGET: u32 = 8;
    /// Capacity of the relay request channel.
    pub const RELAY_QUEUE_CAPACITY: usize = 1_024;
    /// Mempool and regpool housekeeping interval in milliseconds.
    pub const POOL_HOUSEKEEPING_MS: u64 = 2_000;
    /// Largest timestamp representable in the miniblock's 6-byte field
    /// (milliseconds; reaches into the year 2121).
    pub const MINIBLOCK_TIMESTAMP_MAX: u64 = 0xFFFF_FFFF_FFFF;
}

/// 32-byte hash used throughout the protocol.
pub type Hash = [u8; 32];

/// The zero hash; names the base asset's balance tree.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Compute the SHA3-256 hash of a byte slice.
///
/// This is the protocol's identity hash: block hashes, transaction hashes,
/// and miniblock IDs are all derived from it, so the function is fixed for
/// network compatibility.
pub fn sha3(data: &[u8]) -> Hash {
    use sha3::{Digest, Sha3_256};
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute a domain-separated SHA3-256 hash.
///
/// The domain is length-prefixed so distinct (domain, data) pairs can never
/// collide by concatenation ambiguity.
pub fn sha3_domain(domain: &[u8], data: &[u8]) -> Hash {
    use sha3::{Digest, Sha3_256};
    let mut hasher = Sha3_256::new();
    hasher.update((domain.len() as u64).to_be_bytes());
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Constant-time comparison of two byte slices.
///
/// Returns true only if the slices have equal length and identical contents.
/// The length comparison is not constant-time; all callers compare
/// fixed-size hashes.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Serialize a value using bincode with legacy (v1-compatible) encoding.
///
/// Used for storage metadata only; consensus objects have hand-rolled
/// byte-exact codecs.
pub fn serialize<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(val, bincode::config::legacy())
}

/// Deserialize a value using bincode with legacy (v1-compatible) encoding.
pub fn deserialize<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, bincode::error::DecodeError> {
    let (val, _len) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    Ok(val)
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha3_deterministic() {
        assert_eq!(sha3(b"hello"), sha3(b"hello"));
        assert_ne!(sha3(b"hello"), sha3(b"world"));
    }

    #[test]
    fn sha3_domain_separates() {
        assert_ne!(sha3_domain(b"a", b"data"), sha3_domain(b"b", b"data"));
        assert_ne!(sha3_domain(b"ab", b"c"), sha3_domain(b"a", b"bc"));
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn miniblock_count_is_ten() {
        assert_eq!(constants::MINIBLOCKS_PER_BLOCK, 10);
    }
}
