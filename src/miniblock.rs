//! The 68-byte miniblock: the proof-of-work unit of the chain.
//!
//! Wire layout, byte-exact:
//!
//! ```text
//! byte 0      : (version & 0x1F) | (genesis << 5) | (past_count << 6)
//! bytes 1..7  : timestamp in milliseconds, big-endian, low 6 bytes
//! bytes 7..15 : past[0] ∥ past[1], 4 bytes each, big-endian
//! bytes 15..31: key hash prefix (miner key, or header binding for the
//!               final miniblock)
//! bytes 31..63: check field (genesis: 8-byte height ∥ two 12-byte tip
//!               prefixes)
//! bytes 63..68: nonce
//! ```
//!
//! A genesis miniblock opens the DAG for a block interval: its past
//! pointers are 4-byte prefixes of the referenced block tips and its check
//! field pins the height. Distance, expanded parents and assigned height
//! are DAG metadata, never serialized. The final miniblock is the
//! positionally-last member of a block's list, recognized by the header
//! binding constraint on its key hash.

use crate::codec::{DecodeError, Reader};
use crate::constants::{MINIBLOCK_SIZE, MINIBLOCK_TIMESTAMP_MAX};
use crate::Hash;

/// A 32-bit miniblock identifier: the first 4 bytes of the SHA3-256 of the
/// 68-byte serialization.
pub type MiniBlockId = u32;

/// A miniblock record; wire fields only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MiniBlock {
    /// Format version; must be 1.
    pub version: u8,
    /// Set on the miniblocks that open a block interval.
    pub genesis: bool,
    /// Number of parents: 1 or 2, never 0.
    pub past_count: u8,
    /// Milliseconds, 48-bit.
    pub timestamp: u64,
    /// Parent miniblock IDs (genesis: truncated block-tip hashes).
    pub past: [MiniBlockId; 2],
    /// Short miner-key hash, or the header binding on the final miniblock.
    pub key_hash: [u8; 16],
    /// Genesis: packed height and tip prefixes; otherwise protocol state.
    pub check: [u8; 32],
    /// Proof-of-work nonce.
    pub nonce: [u8; 5],
}

impl MiniBlock {
    /// Serialize to the fixed 68-byte wire form.
    pub fn serialize(&self) -> [u8; MINIBLOCK_SIZE] {
        debug_assert!(self.timestamp <= MINIBLOCK_TIMESTAMP_MAX);
        let mut out = [0u8; MINIBLOCK_SIZE];
        out[0] = (self.version & 0x1F)
            | (u8::from(self.genesis) << 5)
            | ((self.past_count & 0x03) << 6);
        out[1..7].copy_from_slice(&self.timestamp.to_be_bytes()[2..8]);
        out[7..11].copy_from_slice(&self.past[0].to_be_bytes());
        out[11..15].copy_from_slice(&self.past[1].to_be_bytes());
        out[15..31].copy_from_slice(&self.key_hash);
        out[31..63].copy_from_slice(&self.check);
        out[63..68].copy_from_slice(&self.nonce);
        out
    }

    /// Decode a 68-byte miniblock.
    ///
    /// Rejects a version other than 1, a past count of 0 or 3, any other
    /// length, and a record that lists its own ID as a parent.
    pub fn deserialize(bytes: &[u8]) -> Result<MiniBlock, DecodeError> {
        if bytes.len() != MINIBLOCK_SIZE {
            return Err(DecodeError::InvalidField {
                field: "miniblock",
                reason: "length is not 68 bytes",
            });
        }
        let mut r = Reader::new(bytes);
        let flags = r.read_u8("miniblock.flags")?;
        let version = flags & 0x1F;
        let genesis = flags & 0x20 != 0;
        let past_count = flags >> 6;
        if version != 1 {
            return Err(DecodeError::InvalidField {
                field: "miniblock.version",
                reason: "unsupported version",
            });
        }
        if past_count == 0 || past_count > 2 {
            return Err(DecodeError::InvalidField {
                field: "miniblock.past_count",
                reason: "past count must be 1 or 2",
            });
        }
        let ts_high = r.read_bytes(6, "miniblock.timestamp")?;
        let mut ts_bytes = [0u8; 8];
        ts_bytes[2..8].copy_from_slice(ts_high);
        let timestamp = u64::from_be_bytes(ts_bytes);
        let past = [
            r.read_u32_be("miniblock.past0")?,
            r.read_u32_be("miniblock.past1")?,
        ];
        let key_hash = r.read_array::<16>("miniblock.key_hash")?;
        let check = r.read_array::<32>("miniblock.check")?;
        let nonce = r.read_array::<5>("miniblock.nonce")?;
        r.expect_end("miniblock")?;

        let mbl = MiniBlock {
            version,
            genesis,
            past_count,
            timestamp,
            past,
            key_hash,
            check,
            nonce,
        };
        let id = mbl.id();
        for i in 0..past_count as usize {
            if mbl.past[i] == id {
                return Err(DecodeError::InvalidField {
                    field: "miniblock.past",
                    reason: "miniblock lists itself as a parent",
                });
            }
        }
        Ok(mbl)
    }

    /// The 32-bit miniblock ID.
    pub fn id(&self) -> MiniBlockId {
        let digest = crate::sha3(&self.serialize());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Full SHA3 of the serialization.
    pub fn full_hash(&self) -> Hash {
        crate::sha3(&self.serialize())
    }

    /// Proof-of-work hash of the serialization.
    pub fn pow_hash(&self) -> Hash {
        crate::crypto::pow_hash(&self.serialize())
    }

    /// Parent IDs actually in use.
    pub fn past_ids(&self) -> &[MiniBlockId] {
        &self.past[..self.past_count as usize]
    }

    /// Pack a genesis check field: 8-byte height plus up to two 12-byte
    /// tip prefixes.
    pub fn genesis_check(height: u64, tips: &[Hash]) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..8].copy_from_slice(&height.to_be_bytes());
        for (i, tip) in tips.iter().take(2).enumerate() {
            out[8 + i * 12..8 + (i + 1) * 12].copy_from_slice(&tip[..12]);
        }
        out
    }

    /// Height packed into a genesis check field.
    pub fn genesis_height(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.check[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Truncated tip hash at `index` from a genesis check field.
    pub fn genesis_tip_prefix(&self, index: usize) -> [u8; 12] {
        let mut out = [0u8; 12];
        out.copy_from_slice(&self.check[8 + index * 12..8 + (index + 1) * 12]);
        out
    }

    /// Whether this miniblock references the given block tips: the past
    /// pointers must be the 4-byte prefixes and the check field the 12-byte
    /// prefixes of every tip, in order.
    pub fn references_tips(&self, tips: &[Hash]) -> bool {
        if !self.genesis || self.past_count as usize != tips.len() {
            return false;
        }
        for (i, tip) in tips.iter().enumerate() {
            let prefix = u32::from_be_bytes([tip[0], tip[1], tip[2], tip[3]]);
            if self.past[i] != prefix || self.genesis_tip_prefix(i) != tip[..12] {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample(nonce: u8) -> MiniBlock {
        MiniBlock {
            version: 1,
            genesis: false,
            past_count: 2,
            timestamp: 1_700_000_000_123,
            past: [0xAABBCCDD, 0x11223344],
            key_hash: [7u8; 16],
            check: [9u8; 32],
            nonce: [nonce, 0, 0, 0, 1],
        }
    }

    #[test]
    fn roundtrip_is_68_bytes() {
        let mbl = sample(1);
        let bytes = mbl.serialize();
        assert_eq!(bytes.len(), MINIBLOCK_SIZE);
        let back = MiniBlock::deserialize(&bytes).unwrap();
        assert_eq!(mbl, back);
        assert_eq!(mbl.id(), back.id());
    }

    #[test]
    fn timestamp_max_reaches_year_2121() {
        let mut mbl = sample(2);
        mbl.timestamp = MINIBLOCK_TIMESTAMP_MAX;
        let back = MiniBlock::deserialize(&mbl.serialize()).unwrap();
        assert_eq!(back.timestamp, 0xFFFF_FFFF_FFFF);
        // 2121-01-01T00:00:00Z in milliseconds since the epoch
        let ms_2121: u64 = 4_765_132_800_000;
        assert!(back.timestamp > ms_2121);
    }

    #[test]
    fn wrong_length_rejected() {
        let mbl = sample(3);
        let bytes = mbl.serialize();
        assert!(MiniBlock::deserialize(&bytes[..67]).is_err());
        let mut long = bytes.to_vec();
        long.push(0);
        assert!(MiniBlock::deserialize(&long).is_err());
    }

    #[test]
    fn bad_version_rejected() {
        let mbl = sample(4);
        let mut bytes = mbl.serialize();
        bytes[0] = (bytes[0] & !0x1F) | 2; // version 2
        assert!(MiniBlock::deserialize(&bytes).is_err());
    }

    #[test]
    fn zero_past_count_rejected() {
        let mbl = sample(5);
        let mut bytes = mbl.serialize();
        bytes[0] &= 0x3F; // past_count = 0
        assert!(MiniBlock::deserialize(&bytes).is_err());
    }

    #[test]
    fn flags_pack_and_unpack() {
        let mut mbl = sample(7);
        mbl.genesis = true;
        mbl.past_count = 1;
        mbl.check = MiniBlock::genesis_check(42, &[[0xEE; 32]]);
        let back = MiniBlock::deserialize(&mbl.serialize()).unwrap();
        assert!(back.genesis);
        assert_eq!(back.past_count, 1);
        assert_eq!(back.genesis_height(), 42);
        assert_eq!(back.genesis_tip_prefix(0), [0xEE; 12]);
        assert_eq!(back.genesis_tip_prefix(1), [0u8; 12]);
    }

    #[test]
    fn references_tips_matches_prefixes() {
        let tip = [0x5Au8; 32];
        let prefix = u32::from_be_bytes([tip[0], tip[1], tip[2], tip[3]]);
        let mbl = MiniBlock {
            version: 1,
            genesis: true,
            past_count: 1,
            timestamp: 1,
            past: [prefix, 0],
            key_hash: [0u8; 16],
            check: MiniBlock::genesis_check(9, &[tip]),
            nonce: [0u8; 5],
        };
        assert!(mbl.references_tips(&[tip]));
        assert!(!mbl.references_tips(&[[0u8; 32]]));
        assert!(!mbl.references_tips(&[tip, tip]));
    }

    #[test]
    fn id_changes_with_any_field() {
        let base = sample(8);
        let id = base.id();
        let mut t = base;
        t.timestamp += 1;
        assert_ne!(t.id(), id);
        let mut n = base;
        n.nonce[4] = 0xFF;
        assert_ne!(n.id(), id);
    }
}
