//! The heavyweight block and its codec.
//!
//! A block anchors ledger state: it embeds the miner (coinbase or premine)
//! transaction, the miniblocks that closed its interval, and the hashes of
//! the transactions it confirms. Small fields serialize as varints; the
//! timestamp is 8 bytes big-endian. The identity hash covers the full
//! serialization including miniblocks. The *skip-last* serialization omits
//! the final miniblock; its hash prefix is what the final miniblock's key
//! hash must equal, binding the miniblock race to the header.

use crate::codec::{write_varint, DecodeError, Reader};
use crate::constants::MINIBLOCKS_PER_BLOCK;
use crate::miniblock::MiniBlock;
use crate::transaction::Transaction;
use crate::Hash;

/// A block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub major_version: u64,
    pub minor_version: u64,
    /// Milliseconds since the epoch.
    pub timestamp: u64,
    pub height: u64,
    /// The embedded coinbase (premine at height 0).
    pub miner_tx: Transaction,
    /// Carries the balance-root hash after this block's state commit.
    pub proof: Hash,
    /// Parent block hash; empty only for genesis.
    pub tips: Vec<Hash>,
    pub miniblocks: Vec<MiniBlock>,
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    fn serialize_internal(&self, skip_last_miniblock: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.miniblocks.len() * 68);
        write_varint(&mut out, self.major_version);
        write_varint(&mut out, self.minor_version);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        write_varint(&mut out, self.height);
        out.extend_from_slice(&self.miner_tx.serialize());
        out.extend_from_slice(&self.proof);
        write_varint(&mut out, self.tips.len() as u64);
        for tip in &self.tips {
            out.extend_from_slice(tip);
        }
        let mbl_count = if skip_last_miniblock {
            self.miniblocks.len().saturating_sub(1)
        } else {
            self.miniblocks.len()
        };
        write_varint(&mut out, mbl_count as u64);
        for mbl in self.miniblocks.iter().take(mbl_count) {
            out.extend_from_slice(&mbl.serialize());
        }
        write_varint(&mut out, self.tx_hashes.len() as u64);
        for hash in &self.tx_hashes {
            out.extend_from_slice(hash);
        }
        out
    }

    /// Full wire serialization.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_internal(false)
    }

    /// Serialization omitting the final miniblock; the form the final
    /// miniblock's key hash commits to.
    pub fn serialize_skip_last_miniblock(&self) -> Vec<u8> {
        self.serialize_internal(true)
    }

    /// Identity hash.
    pub fn hash(&self) -> Hash {
        crate::sha3(&self.serialize())
    }

    /// First 16 bytes of the skip-last hash; the final miniblock's required
    /// key hash.
    pub fn header_binding(&self) -> [u8; 16] {
        let digest = crate::sha3(&self.serialize_skip_last_miniblock());
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        out
    }

    /// The positionally-last miniblock, which must carry the header binding
    /// in a complete block.
    pub fn final_miniblock(&self) -> Option<&MiniBlock> {
        self.miniblocks.last()
    }

    /// Whether the miniblock list is complete and its final member binds to
    /// the header.
    pub fn final_miniblock_binds(&self) -> bool {
        self.miniblocks.len() == MINIBLOCKS_PER_BLOCK
            && self
                .final_miniblock()
                .map(|m| m.key_hash == self.header_binding())
                .unwrap_or(false)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.tips.is_empty()
    }

    /// Decode a block; trailing bytes fail.
    pub fn deserialize(bytes: &[u8]) -> Result<Block, DecodeError> {
        let mut r = Reader::new(bytes);
        let major_version = r.read_varint_capped("block.major_version", 9)?;
        let minor_version = r.read_varint_capped("block.minor_version", 9)?;
        let timestamp = r.read_u64_be("block.timestamp")?;
        let height = r.read_varint("block.height")?;
        let miner_tx = Transaction::read_from(&mut r)?;
        let proof = r.read_array::<32>("block.proof")?;
        let tip_count = r.read_varint_capped("block.tip_count", 1)? as usize;
        if tip_count > 1 {
            return Err(DecodeError::InvalidField {
                field: "block.tip_count",
                reason: "a block has at most one tip",
            });
        }
        let mut tips = Vec::with_capacity(tip_count);
        for _ in 0..tip_count {
            tips.push(r.read_array::<32>("block.tip")?);
        }
        let mbl_count = r.read_varint_capped("block.miniblock_count", 2)? as usize;
        let mut miniblocks = Vec::with_capacity(mbl_count.min(MINIBLOCKS_PER_BLOCK));
        for _ in 0..mbl_count {
            let raw = r.read_bytes(crate::constants::MINIBLOCK_SIZE, "block.miniblock")?;
            miniblocks.push(MiniBlock::deserialize(raw)?);
        }
        let tx_count = r.read_varint("block.tx_count")? as usize;
        let mut tx_hashes = Vec::with_capacity(tx_count.min(4096));
        for _ in 0..tx_count {
            tx_hashes.push(r.read_array::<32>("block.tx_hash")?);
        }
        r.expect_end("block")?;
        Ok(Block {
            major_version,
            minor_version,
            timestamp,
            height,
            miner_tx,
            proof,
            tips,
            miniblocks,
            tx_hashes,
        })
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.serialize().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keypair, Scalar};

    fn miner_tx() -> Transaction {
        let kp = Keypair::from_secret(Scalar::from(77u64));
        Transaction::coinbase(kp.address())
    }

    fn sample_miniblock(nonce: u8, genesis: bool) -> MiniBlock {
        MiniBlock {
            version: 1,
            genesis,
            past_count: 1,
            timestamp: 1_000 + nonce as u64,
            past: [nonce as u32, 0],
            key_hash: [nonce; 16],
            check: [0u8; 32],
            nonce: [nonce, 0, 0, 0, 0],
        }
    }

    fn sample_block() -> Block {
        Block {
            major_version: 1,
            minor_version: 1,
            timestamp: 1_700_000_000_000,
            height: 5,
            miner_tx: miner_tx(),
            proof: [0xAB; 32],
            tips: vec![[0xCD; 32]],
            miniblocks: (0..3).map(|i| sample_miniblock(i, i == 0)).collect(),
            tx_hashes: vec![[0x11; 32], [0x22; 32]],
        }
    }

    #[test]
    fn roundtrip_preserves_hash() {
        let block = sample_block();
        let bytes = block.serialize();
        let back = Block::deserialize(&bytes).unwrap();
        assert_eq!(block, back);
        assert_eq!(block.hash(), back.hash());
    }

    #[test]
    fn genesis_roundtrip() {
        let kp = Keypair::from_secret(Scalar::from(1u64));
        let block = Block {
            major_version: 1,
            minor_version: 0,
            timestamp: 0,
            height: 0,
            miner_tx: Transaction::premine(kp.address(), 2_000_000_000_000),
            proof: [0u8; 32],
            tips: vec![],
            miniblocks: vec![],
            tx_hashes: vec![],
        };
        assert!(block.is_genesis());
        let back = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(block.hash(), back.hash());
    }

    #[test]
    fn ten_continuation_bytes_fail_on_major_version() {
        let bytes = hex::decode("80808080808080808080").unwrap();
        match Block::deserialize(&bytes) {
            Err(DecodeError::VarintTooLong { field, .. }) => {
                assert_eq!(field, "block.major_version")
            }
            other => panic!("expected VarintTooLong, got {:?}", other),
        }
    }

    #[test]
    fn truncated_after_versions_fails() {
        let bytes = hex::decode("020280808080808080808080").unwrap();
        assert!(Block::deserialize(&bytes).is_err());
    }

    #[test]
    fn skip_last_serialization_omits_final_miniblock() {
        let block = sample_block();
        let full = block.serialize();
        let skipped = block.serialize_skip_last_miniblock();
        assert_eq!(full.len(), skipped.len() + crate::constants::MINIBLOCK_SIZE);
        assert_ne!(crate::sha3(&full), crate::sha3(&skipped));
    }

    #[test]
    fn hash_depends_on_every_field() {
        let base = sample_block();
        let h = base.hash();

        let mut b = base.clone();
        b.major_version = 2;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.minor_version = 9;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.timestamp += 1;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.height += 1;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.proof[0] ^= 1;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.tips[0][0] ^= 1;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.miniblocks[1].nonce[0] ^= 1;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        b.tx_hashes[0][0] ^= 1;
        assert_ne!(b.hash(), h);

        let mut b = base.clone();
        let other = Keypair::from_secret(Scalar::from(78u64));
        b.miner_tx = Transaction::coinbase(other.address());
        assert_ne!(b.hash(), h);
    }

    #[test]
    fn two_tips_rejected_at_decode() {
        // hand-build: valid prefix then tip_count = 2
        let block = sample_block();
        let mut bytes = Vec::new();
        write_varint(&mut bytes, block.major_version);
        write_varint(&mut bytes, block.minor_version);
        bytes.extend_from_slice(&block.timestamp.to_be_bytes());
        write_varint(&mut bytes, block.height);
        bytes.extend_from_slice(&block.miner_tx.serialize());
        bytes.extend_from_slice(&block.proof);
        write_varint(&mut bytes, 2);
        bytes.extend_from_slice(&[0u8; 64]);
        write_varint(&mut bytes, 0);
        write_varint(&mut bytes, 0);
        assert!(matches!(
            Block::deserialize(&bytes),
            Err(DecodeError::InvalidField {
                field: "block.tip_count",
                ..
            })
        ));
    }
}
