//! Node configuration: network parameters, the fork-version table, and the
//! genesis block.

use crate::block::Block;
use crate::crypto::{hash_to_point, Address, Keypair, Scalar};
use crate::transaction::Transaction;

/// Hard-fork activation table: `(height, major version)` in ascending
/// height order.
const FORK_TABLE: &[(u64, u64)] = &[(0, 1)];

/// The block major version activated at `height`.
pub fn version_at_height(height: u64) -> u64 {
    FORK_TABLE
        .iter()
        .rev()
        .find(|(h, _)| *h <= height)
        .map(|(_, v)| *v)
        .unwrap_or(1)
}

/// Node configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound on the summed size of a block's transactions, bytes.
    pub max_block_size: usize,
    /// Difficulty floor for miniblock PoW.
    pub minimum_difficulty: u64,
    /// Simulator mode: difficulty floor of 1 and no registration PoW floor.
    pub simulator: bool,
    /// Amount premined to the genesis address, atomic units.
    pub premine_value: u64,
    /// Recipient of the premine.
    pub genesis_address: Address,
}

impl Config {
    /// Production parameters. The premine address has no known secret key;
    /// it is a hash-to-point output.
    pub fn mainnet() -> Self {
        let premine_point = hash_to_point(b"strata.genesis.address", b"strata-mainnet-v1");
        Config {
            max_block_size: 10_000_000,
            minimum_difficulty: 1_000,
            simulator: false,
            premine_value: 2_000_000_000_000,
            genesis_address: Address::from_point(&premine_point),
        }
    }

    /// Simulator parameters: trivial difficulty, relaxed registration
    /// proof-of-work, and a premine address with a published secret so
    /// harness code can integrate blocks.
    pub fn simulator() -> Self {
        Config {
            max_block_size: 10_000_000,
            minimum_difficulty: 1,
            simulator: true,
            premine_value: 2_000_000_000_000,
            genesis_address: Self::simulator_genesis_keypair().address(),
        }
    }

    /// The well-known simulator premine keypair.
    pub fn simulator_genesis_keypair() -> Keypair {
        Keypair::from_secret(Scalar::from(0x5354_5241_5441u64))
    }

    /// The genesis miner transaction: the premine.
    pub fn genesis_tx(&self) -> Transaction {
        Transaction::premine(self.genesis_address, self.premine_value)
    }

    /// Hex encoding of the genesis miner transaction, as published in the
    /// network parameters.
    pub fn genesis_tx_hex(&self) -> String {
        hex::encode(self.genesis_tx().serialize())
    }

    /// The genesis block: height 0, zero timestamp, no tips, no
    /// miniblocks, only the premine.
    pub fn genesis_block(&self) -> Block {
        Block {
            major_version: version_at_height(0),
            minor_version: 0,
            timestamp: 0,
            height: 0,
            miner_tx: self.genesis_tx(),
            proof: [0u8; 32],
            tips: vec![],
            miniblocks: vec![],
            tx_hashes: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxType;

    #[test]
    fn fork_table_resolves_versions() {
        assert_eq!(version_at_height(0), 1);
        assert_eq!(version_at_height(1_000_000), 1);
    }

    #[test]
    fn genesis_tx_hex_decodes_to_the_premine() {
        let config = Config::mainnet();
        let bytes = hex::decode(config.genesis_tx_hex()).unwrap();
        let tx = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(tx.tx_type, TxType::Premine);
        assert_eq!(tx.value, config.premine_value);
        assert_eq!(tx.miner_address, Some(config.genesis_address));
        assert_eq!(tx.hash(), config.genesis_tx().hash());
    }

    #[test]
    fn genesis_block_roundtrips_with_identical_hash() {
        let config = Config::mainnet();
        let genesis = config.genesis_block();
        assert!(genesis.is_genesis());
        let back = Block::deserialize(&genesis.serialize()).unwrap();
        assert_eq!(genesis.hash(), back.hash());
    }

    #[test]
    fn simulator_relaxations() {
        let config = Config::simulator();
        assert!(config.simulator);
        assert_eq!(config.minimum_difficulty, 1);
        // the simulator premine is spendable by the published keypair
        assert_eq!(
            Config::simulator_genesis_keypair().address(),
            config.genesis_address
        );
    }
}
