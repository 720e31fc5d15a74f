//! The miniblock DAG collection.
//!
//! Miniblocks mined inside a block interval form a small DAG: genesis
//! miniblocks anchor on the block tips (their parent slots hold truncated
//! block hashes, not miniblock IDs), and every other miniblock points at
//! one or two earlier miniblocks. The collection tracks the derived
//! metadata the wire format omits: longest-path distance from genesis and
//! the assigned block height. Records index by their 32-bit ID; an arena of
//! values, no shared references.

use std::collections::{HashMap, HashSet};

use crate::miniblock::{MiniBlock, MiniBlockId};
use crate::Hash;

/// Errors from DAG insertion.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    #[error("miniblock {0:08x} already inserted")]
    Collision(MiniBlockId),
    #[error("miniblock {0:08x} has unresolved parents")]
    Disconnected(MiniBlockId),
    #[error("miniblock timestamp precedes a parent")]
    TimestampOrder,
    #[error("miniblock parents disagree on height")]
    HeightMismatch,
}

/// A stored miniblock with its derived metadata.
#[derive(Clone, Debug)]
pub struct MiniEntry {
    pub mbl: MiniBlock,
    /// Longest path to a genesis miniblock.
    pub distance: u32,
    /// Block height this miniblock races for.
    pub height: u64,
}

/// The concurrent-map-backed miniblock collection. Callers hold it behind
/// the chain coordinator's lock; the structure itself is single-writer.
#[derive(Default)]
pub struct MiniBlockCollection {
    entries: HashMap<MiniBlockId, MiniEntry>,
}

impl MiniBlockCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: MiniBlockId) -> Option<&MiniEntry> {
        self.entries.get(&id)
    }

    /// True iff a miniblock with the same ID is already present.
    pub fn is_collision(&self, mbl: &MiniBlock) -> bool {
        self.entries.contains_key(&mbl.id())
    }

    /// Alias of [`Self::is_collision`]; reads better at call sites that ask
    /// about the same record rather than a conflicting one.
    pub fn is_already_inserted(&self, mbl: &MiniBlock) -> bool {
        self.is_collision(mbl)
    }

    /// Genesis miniblocks are always connected; others need every parent
    /// present.
    pub fn is_connected(&self, mbl: &MiniBlock) -> bool {
        if mbl.genesis {
            return true;
        }
        mbl.past_ids().iter().all(|id| self.entries.contains_key(id))
    }

    /// Longest-path distance from genesis: 0 for genesis, otherwise
    /// `1 + max(parent distance)`.
    ///
    /// Panics if a parent is missing; callers must check connectivity
    /// first. The panic is a deliberate tripwire for lock misuse.
    pub fn calculate_distance(&self, mbl: &MiniBlock) -> u32 {
        if mbl.genesis {
            return 0;
        }
        1 + mbl
            .past_ids()
            .iter()
            .map(|id| {
                self.entries
                    .get(id)
                    .expect("distance requested for disconnected miniblock")
                    .distance
            })
            .max()
            .unwrap_or(0)
    }

    /// Insert a miniblock, deriving its distance and height.
    pub fn insert(&mut self, mbl: MiniBlock) -> Result<&MiniEntry, DagError> {
        let id = mbl.id();
        if self.is_collision(&mbl) {
            return Err(DagError::Collision(id));
        }
        if !self.is_connected(&mbl) {
            return Err(DagError::Disconnected(id));
        }

        let height = if mbl.genesis {
            mbl.genesis_height()
        } else {
            let mut parent_height = None;
            for pid in mbl.past_ids() {
                let parent = &self.entries[pid];
                if parent.mbl.timestamp > mbl.timestamp {
                    return Err(DagError::TimestampOrder);
                }
                match parent_height {
                    None => parent_height = Some(parent.height),
                    Some(h) if h != parent.height => return Err(DagError::HeightMismatch),
                    Some(_) => {}
                }
            }
            parent_height.unwrap_or(0)
        };
        let distance = self.calculate_distance(&mbl);

        self.entries.insert(
            id,
            MiniEntry {
                mbl,
                distance,
                height,
            },
        );
        Ok(&self.entries[&id])
    }

    /// Delete every miniblock at height ≤ `h`. Returns how many went.
    pub fn purge_height(&mut self, h: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.height > h);
        before - self.entries.len()
    }

    /// IDs referenced as a parent by any non-genesis record.
    fn referenced_parents(&self) -> HashSet<MiniBlockId> {
        let mut set = HashSet::new();
        for entry in self.entries.values() {
            if !entry.mbl.genesis {
                set.extend(entry.mbl.past_ids());
            }
        }
        set
    }

    /// Miniblocks at height `h` that are no other miniblock's parent,
    /// sorted by descending distance, ties by descending ID.
    pub fn get_tips_at_height(&self, h: u64) -> Vec<MiniEntry> {
        let referenced = self.referenced_parents();
        let mut tips: Vec<MiniEntry> = self
            .entries
            .iter()
            .filter(|(id, e)| e.height == h && !referenced.contains(id))
            .map(|(_, e)| e.clone())
            .collect();
        sort_by_distance_desc(&mut tips);
        tips
    }

    /// Tips over the whole collection, same ordering.
    pub fn get_all_tips(&self) -> Vec<MiniEntry> {
        let referenced = self.referenced_parents();
        let mut tips: Vec<MiniEntry> = self
            .entries
            .iter()
            .filter(|(id, _)| !referenced.contains(id))
            .map(|(_, e)| e.clone())
            .collect();
        sort_by_distance_desc(&mut tips);
        tips
    }

    /// Topologically sorted ancestors of `mbl`, including `mbl` itself,
    /// deduplicated. If a parent is missing the history is truncated;
    /// callers validate connectivity when completeness matters.
    pub fn get_all_history(&self, mbl: &MiniBlock) -> Vec<MiniBlock> {
        let mut seen: HashSet<MiniBlockId> = HashSet::new();
        let mut collected: Vec<(u32, MiniBlockId, MiniBlock)> = Vec::new();
        let mut stack: Vec<MiniBlock> = vec![*mbl];
        let self_distance = if self.is_connected(mbl) {
            self.calculate_distance(mbl)
        } else {
            u32::MAX
        };
        while let Some(current) = stack.pop() {
            let id = current.id();
            if !seen.insert(id) {
                continue;
            }
            let distance = if id == mbl.id() {
                self_distance
            } else {
                self.entries.get(&id).map(|e| e.distance).unwrap_or(0)
            };
            collected.push((distance, id, current));
            if current.genesis {
                continue;
            }
            for pid in current.past_ids() {
                if let Some(parent) = self.entries.get(pid) {
                    stack.push(parent.mbl);
                }
            }
        }
        collected.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        collected.into_iter().map(|(_, _, m)| m).collect()
    }
}

/// The subset of `mbls` that are genesis miniblocks anchored on exactly the
/// given tips: the past count matches and every parent slot holds the
/// 4-byte prefix of the corresponding tip.
pub fn filter_only_genesis(mbls: &[MiniBlock], tips: &[Hash]) -> Vec<MiniBlock> {
    mbls.iter()
        .filter(|m| {
            m.genesis
                && m.past_count as usize == tips.len()
                && tips.iter().enumerate().all(|(i, tip)| {
                    m.past[i] == u32::from_be_bytes([tip[0], tip[1], tip[2], tip[3]])
                })
        })
        .copied()
        .collect()
}

/// Primary key distance descending, secondary key ID descending.
pub fn sort_by_distance_desc(entries: &mut [MiniEntry]) {
    entries.sort_by(|a, b| {
        b.distance
            .cmp(&a.distance)
            .then_with(|| b.mbl.id().cmp(&a.mbl.id()))
    });
}

/// Primary key timestamp ascending, secondary key ID ascending.
pub fn sort_by_time_asc(mbls: &mut [MiniBlock]) {
    mbls.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id().cmp(&b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis_at(height: u64, salt: u8) -> MiniBlock {
        let tip = [salt; 32];
        MiniBlock {
            version: 1,
            genesis: true,
            past_count: 1,
            timestamp: 100 + height,
            past: [u32::from_be_bytes([tip[0], tip[1], tip[2], tip[3]]), 0],
            key_hash: [salt; 16],
            check: MiniBlock::genesis_check(height, &[tip]),
            nonce: [salt, 0, 0, 0, 0],
        }
    }

    fn child_of(parents: &[&MiniBlock], timestamp: u64, salt: u8) -> MiniBlock {
        let mut past = [0u32; 2];
        for (i, p) in parents.iter().take(2).enumerate() {
            past[i] = p.id();
        }
        MiniBlock {
            version: 1,
            genesis: false,
            past_count: parents.len() as u8,
            timestamp,
            past,
            key_hash: [salt; 16],
            check: [0u8; 32],
            nonce: [salt, 1, 0, 0, 0],
        }
    }

    #[test]
    fn insert_then_collision() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(0, 1);
        assert!(!dag.is_collision(&g));
        dag.insert(g).unwrap();
        assert!(dag.is_collision(&g));
        assert!(dag.is_already_inserted(&g));
        assert!(matches!(dag.insert(g), Err(DagError::Collision(_))));
    }

    #[test]
    fn genesis_is_always_connected() {
        let dag = MiniBlockCollection::new();
        assert!(dag.is_connected(&genesis_at(3, 2)));
    }

    #[test]
    fn distance_follows_longest_path() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(1, 3);
        dag.insert(g).unwrap();
        let a = child_of(&[&g], 110, 4);
        dag.insert(a).unwrap();
        let b = child_of(&[&g], 111, 5);
        dag.insert(b).unwrap();
        let c = child_of(&[&a, &b], 112, 6);
        dag.insert(c).unwrap();

        assert_eq!(dag.get(g.id()).unwrap().distance, 0);
        assert_eq!(dag.get(a.id()).unwrap().distance, 1);
        assert_eq!(dag.get(c.id()).unwrap().distance, 2);
        // all share the genesis height
        assert_eq!(dag.get(c.id()).unwrap().height, 1);
    }

    #[test]
    fn disconnected_insert_rejected() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(0, 7);
        let orphan = child_of(&[&g], 200, 8);
        assert!(matches!(
            dag.insert(orphan),
            Err(DagError::Disconnected(_))
        ));
    }

    #[test]
    #[should_panic(expected = "disconnected miniblock")]
    fn distance_panics_on_missing_parent() {
        let dag = MiniBlockCollection::new();
        let g = genesis_at(0, 9);
        let orphan = child_of(&[&g], 200, 10);
        dag.calculate_distance(&orphan);
    }

    #[test]
    fn timestamp_regression_rejected() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(0, 11);
        dag.insert(g).unwrap();
        let early = child_of(&[&g], 50, 12); // before parent's 100
        assert!(matches!(dag.insert(early), Err(DagError::TimestampOrder)));
    }

    #[test]
    fn parent_height_disagreement_rejected() {
        let mut dag = MiniBlockCollection::new();
        let g1 = genesis_at(1, 13);
        let g2 = genesis_at(2, 14);
        dag.insert(g1).unwrap();
        dag.insert(g2).unwrap();
        let straddler = child_of(&[&g1, &g2], 300, 15);
        assert!(matches!(
            dag.insert(straddler),
            Err(DagError::HeightMismatch)
        ));
    }

    #[test]
    fn purge_removes_heights_at_or_below() {
        let mut dag = MiniBlockCollection::new();
        for h in 0..10u64 {
            dag.insert(genesis_at(h, 20 + h as u8)).unwrap();
        }
        assert_eq!(dag.len(), 10);
        let removed = dag.purge_height(5);
        assert_eq!(removed, 6);
        assert_eq!(dag.len(), 4);
        for e in (0..10u64).filter_map(|h| dag.get(genesis_at(h, 20 + h as u8).id())) {
            assert!(e.height > 5);
        }
    }

    #[test]
    fn tips_exclude_referenced_parents() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(4, 31);
        dag.insert(g).unwrap();
        let a = child_of(&[&g], 110, 32);
        dag.insert(a).unwrap();
        let b = child_of(&[&a], 120, 33);
        dag.insert(b).unwrap();

        let tips = dag.get_tips_at_height(4);
        assert_eq!(tips.len(), 1);
        assert_eq!(tips[0].mbl.id(), b.id());

        let all = dag.get_all_tips();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn tips_sorted_distance_desc_id_desc() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(6, 40);
        dag.insert(g).unwrap();
        // two competing children, both tips at distance 1
        let a = child_of(&[&g], 110, 41);
        let b = child_of(&[&g], 111, 42);
        dag.insert(a).unwrap();
        dag.insert(b).unwrap();
        let tips = dag.get_tips_at_height(6);
        assert_eq!(tips.len(), 2);
        assert!(tips[0].mbl.id() > tips[1].mbl.id());
    }

    #[test]
    fn history_is_topological_and_deduplicated() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(2, 50);
        dag.insert(g).unwrap();
        let a = child_of(&[&g], 110, 51);
        let b = child_of(&[&g], 111, 52);
        dag.insert(a).unwrap();
        dag.insert(b).unwrap();
        let c = child_of(&[&a, &b], 112, 53);
        dag.insert(c).unwrap();

        let history = dag.get_all_history(&c);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].id(), g.id());
        assert_eq!(history[3].id(), c.id());
        let pos = |m: &MiniBlock| history.iter().position(|x| x.id() == m.id()).unwrap();
        assert!(pos(&a) < pos(&c));
        assert!(pos(&b) < pos(&c));
    }

    #[test]
    fn history_truncates_on_missing_parent() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(2, 54);
        let a = child_of(&[&g], 110, 55);
        dag.insert(g).unwrap();
        dag.insert(a).unwrap();
        let phantom = genesis_at(2, 56); // never inserted
        let c = child_of(&[&a, &phantom], 120, 57);
        let history = dag.get_all_history(&c);
        // phantom parent is skipped, not fabricated
        assert!(history.iter().all(|m| m.id() != phantom.id()));
        assert!(history.iter().any(|m| m.id() == c.id()));
    }

    #[test]
    fn filter_only_genesis_matches_tip_prefixes() {
        let tip = [0x77u8; 32];
        let other_tip = [0x99u8; 32];
        let matching = MiniBlock {
            version: 1,
            genesis: true,
            past_count: 1,
            timestamp: 5,
            past: [u32::from_be_bytes([0x77, 0x77, 0x77, 0x77]), 0],
            key_hash: [0u8; 16],
            check: MiniBlock::genesis_check(1, &[tip]),
            nonce: [1, 0, 0, 0, 0],
        };
        let wrong = MiniBlock {
            past: [u32::from_be_bytes([0x99, 0x99, 0x99, 0x99]), 0],
            check: MiniBlock::genesis_check(1, &[other_tip]),
            ..matching
        };
        let non_genesis = MiniBlock {
            genesis: false,
            ..matching
        };
        let out = filter_only_genesis(&[matching, wrong, non_genesis], &[tip]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), matching.id());
    }

    #[test]
    fn sort_by_time_asc_with_id_tiebreak() {
        // eleven distinct timestamps 256 down to 246, plus one extra at 254
        let mut mbls: Vec<MiniBlock> = (0..11u64)
            .map(|i| {
                let mut m = genesis_at(0, 60 + i as u8);
                m.timestamp = 256 - i;
                m
            })
            .collect();
        let mut dup = genesis_at(0, 90);
        dup.timestamp = 254;
        mbls.push(dup);

        sort_by_time_asc(&mut mbls);
        for pair in mbls.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        // the two records at 254 sit adjacent, ascending by ID
        let at_254: Vec<&MiniBlock> = mbls.iter().filter(|m| m.timestamp == 254).collect();
        assert_eq!(at_254.len(), 2);
        assert!(at_254[0].id() < at_254[1].id());
    }

    #[test]
    fn sort_by_distance_desc_is_deterministic_under_permutation() {
        let mut dag = MiniBlockCollection::new();
        let g = genesis_at(3, 70);
        dag.insert(g).unwrap();
        let a = child_of(&[&g], 110, 71);
        let b = child_of(&[&g], 111, 72);
        let c = child_of(&[&a], 120, 73);
        dag.insert(a).unwrap();
        dag.insert(b).unwrap();
        dag.insert(c).unwrap();

        let mut forward: Vec<MiniEntry> = [g, a, b, c]
            .iter()
            .map(|m| dag.get(m.id()).unwrap().clone())
            .collect();
        let mut backward: Vec<MiniEntry> = forward.clone();
        backward.reverse();
        sort_by_distance_desc(&mut forward);
        sort_by_distance_desc(&mut backward);
        let f_ids: Vec<MiniBlockId> = forward.iter().map(|e| e.mbl.id()).collect();
        let b_ids: Vec<MiniBlockId> = backward.iter().map(|e| e.mbl.id()).collect();
        assert_eq!(f_ids, b_ids);
    }
}
