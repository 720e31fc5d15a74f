//! Storage interfaces and the in-memory reference backend.
//!
//! The persistent key-value store is an external collaborator: the node
//! sees versioned, immutable tree-set snapshots (`snapshot(version)`),
//! per-tree get/put/cursor, and an atomic `commit` that returns the next
//! monotonic version. [`MemoryStore`] implements the contract with
//! copy-on-write `Arc` sharing and backs every test.
//!
//! The topo index and the block/transaction record stores are the chain's
//! own fixtures: the topo index is an array of 48-byte records mapping
//! topological height to `(block hash, state version, height)`; block
//! records carry difficulty, version, and height next to the content so
//! each is readable without touching the block bytes, mirroring the
//! `hash.block_diff_version_height` file naming of the production backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::Hash;

/// Errors from storage operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("snapshot version {0} does not exist")]
    VersionMissing(u64),
    #[error("record not found")]
    NotFound,
    #[error("storage corrupt: {0}")]
    Corrupt(String),
}

/// One balance tree: ordered key-value pairs with a Merkle root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    name: Vec<u8>,
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Tree {
    pub fn new(name: &[u8]) -> Self {
        Tree {
            name: name.to_vec(),
            map: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_slice())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.map.insert(key.to_vec(), value.to_vec());
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.map.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Ordered iteration over the pairs.
    pub fn cursor(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.map.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Merkle root over the sorted pairs; the empty tree roots to zero.
    pub fn root(&self) -> Hash {
        if self.map.is_empty() {
            return crate::ZERO_HASH;
        }
        let mut level: Vec<Hash> = self
            .map
            .iter()
            .map(|(k, v)| {
                let mut leaf = Vec::with_capacity(16 + k.len() + v.len());
                leaf.extend_from_slice(&(k.len() as u64).to_be_bytes());
                leaf.extend_from_slice(k);
                leaf.extend_from_slice(&(v.len() as u64).to_be_bytes());
                leaf.extend_from_slice(v);
                crate::sha3_domain(b"strata.tree.leaf", &leaf)
            })
            .collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| {
                    let mut buf = [0u8; 64];
                    buf[..32].copy_from_slice(&pair[0]);
                    buf[32..].copy_from_slice(if pair.len() == 2 { &pair[1] } else { &pair[0] });
                    crate::sha3_domain(b"strata.tree.node", &buf)
                })
                .collect();
        }
        level[0]
    }
}

/// An immutable tree-set snapshot at a fixed version.
#[derive(Clone, Default)]
pub struct Snapshot {
    version: u64,
    trees: HashMap<Vec<u8>, Arc<Tree>>,
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Borrow a tree if it exists at this version.
    pub fn tree(&self, name: &[u8]) -> Option<&Arc<Tree>> {
        self.trees.get(name)
    }

    /// Clone a tree for mutation, creating it empty when absent.
    pub fn tree_for_write(&self, name: &[u8]) -> Tree {
        self.trees
            .get(name)
            .map(|t| (**t).clone())
            .unwrap_or_else(|| Tree::new(name))
    }

    pub fn tree_names(&self) -> impl Iterator<Item = &[u8]> {
        self.trees.keys().map(|k| k.as_slice())
    }
}

/// The store contract the node codes against.
pub trait Store: Send + Sync {
    /// Read-only snapshot at `version`.
    fn snapshot(&self, version: u64) -> Result<Snapshot, StorageError>;

    /// Commit dirty trees on top of `base`, producing the next version.
    fn commit(&self, base: u64, trees: Vec<Tree>) -> Result<u64, StorageError>;

    /// Highest committed version.
    fn latest_version(&self) -> u64;
}

/// Copy-on-write in-memory store. Version 0 is the empty tree set.
#[derive(Default)]
pub struct MemoryStore {
    versions: RwLock<Vec<HashMap<Vec<u8>, Arc<Tree>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            versions: RwLock::new(vec![HashMap::new()]),
        }
    }
}

impl Store for MemoryStore {
    fn snapshot(&self, version: u64) -> Result<Snapshot, StorageError> {
        let versions = self.versions.read().expect("store lock poisoned");
        let trees = versions
            .get(version as usize)
            .ok_or(StorageError::VersionMissing(version))?
            .clone();
        Ok(Snapshot { version, trees })
    }

    fn commit(&self, base: u64, trees: Vec<Tree>) -> Result<u64, StorageError> {
        let mut versions = self.versions.write().expect("store lock poisoned");
        let mut next = versions
            .get(base as usize)
            .ok_or(StorageError::VersionMissing(base))?
            .clone();
        for tree in trees {
            next.insert(tree.name.clone(), Arc::new(tree));
        }
        versions.push(next);
        Ok(versions.len() as u64 - 1)
    }

    fn latest_version(&self) -> u64 {
        let versions = self.versions.read().expect("store lock poisoned");
        versions.len() as u64 - 1
    }
}

/// One topo-index record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopoRecord {
    pub block_hash: Hash,
    pub state_version: u64,
    pub height: u64,
}

impl TopoRecord {
    pub fn to_bytes(&self) -> [u8; 48] {
        let mut out = [0u8; 48];
        out[..32].copy_from_slice(&self.block_hash);
        out[32..40].copy_from_slice(&self.state_version.to_le_bytes());
        out[40..48].copy_from_slice(&self.height.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 48]) -> TopoRecord {
        let mut block_hash = [0u8; 32];
        block_hash.copy_from_slice(&bytes[..32]);
        let state_version = u64::from_le_bytes(bytes[32..40].try_into().expect("8 bytes"));
        let height = u64::from_le_bytes(bytes[40..48].try_into().expect("8 bytes"));
        TopoRecord {
            block_hash,
            state_version,
            height,
        }
    }
}

/// The topological index: an array of 48-byte records. A record is clean
/// (empty) iff all 48 bytes are zero.
#[derive(Default)]
pub struct TopoIndex {
    records: Vec<[u8; 48]>,
}

impl TopoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_clean(bytes: &[u8; 48]) -> bool {
        bytes.iter().all(|&b| b == 0)
    }

    /// Index of the highest non-clean record, plus one.
    pub fn count(&self) -> u64 {
        self.records
            .iter()
            .rposition(|r| !Self::is_clean(r))
            .map(|i| i as u64 + 1)
            .unwrap_or(0)
    }

    pub fn get(&self, topoheight: u64) -> Option<TopoRecord> {
        let bytes = self.records.get(topoheight as usize)?;
        if Self::is_clean(bytes) {
            return None;
        }
        Some(TopoRecord::from_bytes(bytes))
    }

    /// Write (or overwrite, for a flip) the record at `topoheight`.
    pub fn set(&mut self, topoheight: u64, record: TopoRecord) {
        let idx = topoheight as usize;
        if idx >= self.records.len() {
            self.records.resize(idx + 1, [0u8; 48]);
        }
        self.records[idx] = record.to_bytes();
    }

    /// Find the topoheight of a block hash, scanning from the top.
    pub fn topoheight_of(&self, hash: &Hash) -> Option<u64> {
        (0..self.count())
            .rev()
            .find(|&t| self.get(t).map(|r| r.block_hash == *hash).unwrap_or(false))
    }
}

/// A stored block with the sidecar fields the lookup API must serve
/// without decoding the content.
#[derive(Clone, Debug)]
pub struct BlockRecord {
    pub bytes: Vec<u8>,
    pub difficulty: u64,
    pub state_version: u64,
    pub height: u64,
}

/// Append-only block store keyed by hash.
#[derive(Default)]
pub struct BlockStore {
    records: HashMap<Hash, BlockRecord>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, hash: Hash, record: BlockRecord) {
        self.records.insert(hash, record);
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.records.contains_key(hash)
    }

    pub fn read(&self, hash: &Hash) -> Result<&BlockRecord, StorageError> {
        self.records.get(hash).ok_or(StorageError::NotFound)
    }

    pub fn read_difficulty(&self, hash: &Hash) -> Result<u64, StorageError> {
        Ok(self.read(hash)?.difficulty)
    }

    pub fn read_version(&self, hash: &Hash) -> Result<u64, StorageError> {
        Ok(self.read(hash)?.state_version)
    }

    pub fn read_height(&self, hash: &Hash) -> Result<u64, StorageError> {
        Ok(self.read(hash)?.height)
    }

    pub fn delete(&mut self, hash: &Hash) -> bool {
        self.records.remove(hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Append-only transaction store keyed by hash.
#[derive(Default)]
pub struct TxStore {
    records: HashMap<Hash, Vec<u8>>,
}

impl TxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, hash: Hash, bytes: Vec<u8>) {
        self.records.insert(hash, bytes);
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.records.contains_key(hash)
    }

    pub fn read(&self, hash: &Hash) -> Result<&[u8], StorageError> {
        self.records
            .get(hash)
            .map(|v| v.as_slice())
            .ok_or(StorageError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_get_put_cursor() {
        let mut tree = Tree::new(b"base");
        tree.put(b"b", b"2");
        tree.put(b"a", b"1");
        assert_eq!(tree.get(b"a"), Some(&b"1"[..]));
        let keys: Vec<&[u8]> = tree.cursor().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"b"[..]]); // ordered
    }

    #[test]
    fn tree_root_tracks_content() {
        let mut tree = Tree::new(b"base");
        assert_eq!(tree.root(), crate::ZERO_HASH);
        tree.put(b"a", b"1");
        let r1 = tree.root();
        tree.put(b"b", b"2");
        let r2 = tree.root();
        assert_ne!(r1, r2);
        tree.delete(b"b");
        assert_eq!(tree.root(), r1);
    }

    #[test]
    fn memory_store_versions_are_immutable() {
        let store = MemoryStore::new();
        let mut tree = store.snapshot(0).unwrap().tree_for_write(b"base");
        tree.put(b"k", b"v1");
        let v1 = store.commit(0, vec![tree]).unwrap();
        assert_eq!(v1, 1);

        let mut tree = store.snapshot(v1).unwrap().tree_for_write(b"base");
        tree.put(b"k", b"v2");
        let v2 = store.commit(v1, vec![tree]).unwrap();
        assert_eq!(v2, 2);

        // old snapshot still sees the old value
        let old = store.snapshot(v1).unwrap();
        assert_eq!(old.tree(b"base").unwrap().get(b"k"), Some(&b"v1"[..]));
        let new = store.snapshot(v2).unwrap();
        assert_eq!(new.tree(b"base").unwrap().get(b"k"), Some(&b"v2"[..]));
        assert_eq!(store.latest_version(), 2);
    }

    #[test]
    fn missing_version_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.snapshot(9),
            Err(StorageError::VersionMissing(9))
        ));
    }

    #[test]
    fn topo_record_roundtrip() {
        let rec = TopoRecord {
            block_hash: [7u8; 32],
            state_version: 0x0102030405060708,
            height: 42,
        };
        let bytes = rec.to_bytes();
        // little-endian sidecar fields
        assert_eq!(bytes[32], 0x08);
        assert_eq!(bytes[40], 42);
        assert_eq!(TopoRecord::from_bytes(&bytes), rec);
    }

    #[test]
    fn topo_count_skips_clean_records() {
        let mut index = TopoIndex::new();
        assert_eq!(index.count(), 0);
        index.set(
            2,
            TopoRecord {
                block_hash: [1u8; 32],
                state_version: 1,
                height: 2,
            },
        );
        // records 0 and 1 are clean
        assert_eq!(index.count(), 3);
        assert!(index.get(0).is_none());
        assert!(index.get(2).is_some());
    }

    #[test]
    fn topo_overwrite_flips_record() {
        let mut index = TopoIndex::new();
        let a = TopoRecord {
            block_hash: [1u8; 32],
            state_version: 1,
            height: 1,
        };
        let b = TopoRecord {
            block_hash: [2u8; 32],
            state_version: 2,
            height: 1,
        };
        index.set(1, a);
        index.set(1, b);
        assert_eq!(index.get(1), Some(b));
        assert_eq!(index.topoheight_of(&[2u8; 32]), Some(1));
        assert_eq!(index.topoheight_of(&[1u8; 32]), None);
    }

    #[test]
    fn block_record_lookups_are_independent() {
        let mut store = BlockStore::new();
        let hash = [9u8; 32];
        store.put(
            hash,
            BlockRecord {
                bytes: vec![1, 2, 3],
                difficulty: 77,
                state_version: 5,
                height: 11,
            },
        );
        assert_eq!(store.read_difficulty(&hash).unwrap(), 77);
        assert_eq!(store.read_version(&hash).unwrap(), 5);
        assert_eq!(store.read_height(&hash).unwrap(), 11);
        assert_eq!(store.read(&hash).unwrap().bytes, vec![1, 2, 3]);
        assert!(store.delete(&hash));
        assert!(matches!(store.read(&hash), Err(StorageError::NotFound)));
    }
}
