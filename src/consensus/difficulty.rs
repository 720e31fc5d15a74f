//! Per-miniblock difficulty retargeting against the target block time.
//!
//! Difficulty moves in steps of 1% of the parent difficulty: up one step
//! when the parent interval ran at least a second fast, down two steps when
//! it ran at least a second slow, floored at the configured minimum. A
//! miniblock is admitted when its PoW hash, read as a 256-bit integer, is
//! at most `2^256 / difficulty`.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::One;

use crate::constants::BLOCK_TIME;
use crate::Hash;

/// Slack around the target interval before difficulty reacts, in ms.
const RETARGET_WINDOW_MS: u64 = 1_000;

/// Difficulty for a block whose parent interval was
/// `parent_ts − grandparent_ts`.
pub fn next_difficulty(
    parent_diff: u64,
    parent_ts: u64,
    grandparent_ts: u64,
    minimum_difficulty: u64,
) -> u64 {
    let block_time_ms = BLOCK_TIME * 1_000;
    let interval = parent_ts.saturating_sub(grandparent_ts);
    let step = parent_diff / 100;
    let adjusted = if interval <= block_time_ms - RETARGET_WINDOW_MS {
        parent_diff.saturating_add(step)
    } else if interval >= block_time_ms + RETARGET_WINDOW_MS {
        parent_diff.saturating_sub(2 * step)
    } else {
        parent_diff
    };
    adjusted.max(minimum_difficulty)
}

/// Whether a PoW hash meets the difficulty: `hash ≤ 2^256 / difficulty`.
pub fn check_pow_target(pow: &Hash, difficulty: u64) -> bool {
    if difficulty <= 1 {
        return true;
    }
    let value = BigUint::from_bytes_be(pow);
    let target = (BigUint::one() << 256u32) / BigUint::from(difficulty);
    value <= target
}

/// Advisory cache of difficulty keyed by the tip set.
///
/// The key is the concatenation of the tip hashes in hex; any change to the
/// tip set (including a flip) must clear the cache.
#[derive(Default)]
pub struct DifficultyCache {
    map: HashMap<String, u64>,
}

impl DifficultyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(tips: &[Hash]) -> String {
        let mut key = String::with_capacity(tips.len() * 64);
        for tip in tips {
            key.push_str(&hex::encode(tip));
        }
        key
    }

    pub fn get(&self, tips: &[Hash]) -> Option<u64> {
        self.map.get(&Self::key(tips)).copied()
    }

    pub fn insert(&mut self, tips: &[Hash], difficulty: u64) {
        self.map.insert(Self::key(tips), difficulty);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 1_000;

    #[test]
    fn fast_interval_raises_difficulty() {
        // parent interval 16.9s, one second under the 18s target
        let d = next_difficulty(100_000, 116_900, 100_000, MIN);
        assert_eq!(d, 101_000);
    }

    #[test]
    fn slow_interval_drops_two_steps() {
        let d = next_difficulty(100_000, 119_000, 100_000, MIN);
        assert_eq!(d, 98_000);
    }

    #[test]
    fn on_target_interval_holds() {
        let d = next_difficulty(100_000, 118_000, 100_000, MIN);
        assert_eq!(d, 100_000);
        // edges of the dead zone
        assert_eq!(next_difficulty(100_000, 117_001, 100_000, MIN), 100_000);
        assert_eq!(next_difficulty(100_000, 118_999, 100_000, MIN), 100_000);
    }

    #[test]
    fn floors_at_minimum() {
        let d = next_difficulty(MIN, 200_000, 100_000, MIN);
        assert_eq!(d, MIN);
        let d = next_difficulty(0, 0, 0, MIN);
        assert_eq!(d, MIN);
    }

    #[test]
    fn pow_target_accepts_easy_difficulty() {
        assert!(check_pow_target(&[0xFF; 32], 1));
        assert!(check_pow_target(&[0x00; 32], u64::MAX));
    }

    #[test]
    fn pow_target_scales_with_difficulty() {
        // 2^256 / 2 has top bit 0x80…; anything below passes, above fails
        let mut just_under = [0xFFu8; 32];
        just_under[0] = 0x7F;
        assert!(check_pow_target(&just_under, 2));
        let over = [0xFFu8; 32];
        assert!(!check_pow_target(&over, 2));
    }

    #[test]
    fn cache_keys_on_tip_set_and_clears() {
        let mut cache = DifficultyCache::new();
        let tips_a = vec![[1u8; 32]];
        let tips_b = vec![[1u8; 32], [2u8; 32]];
        cache.insert(&tips_a, 5);
        cache.insert(&tips_b, 7);
        assert_eq!(cache.get(&tips_a), Some(5));
        assert_eq!(cache.get(&tips_b), Some(7));
        cache.clear();
        assert_eq!(cache.get(&tips_a), None);
    }
}
