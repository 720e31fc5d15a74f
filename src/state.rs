//! Account state and the block state-transition executor.
//!
//! One balance tree per asset: the base asset's tree is named by the zero
//! hash, each contract by its SCID; a contract's mutable data lives in a
//! sibling tree. A leaf is `varint(nonce_height) ∥ 65-byte left ∥ 65-byte
//! right` (uncompressed ElGamal halves), keyed by the 33-byte compressed
//! address. Transactions apply homomorphically: every ring member absorbs
//! its `(C[i], D)` pair, so decoys change ciphertext but not value, and
//! every parity-selected member's nonce height advances to the block
//! height.

use std::collections::HashMap;

use crate::codec::{write_varint, DecodeError, Reader};
use crate::constants::{COINBASE_CONSTANT_REWARD, REGISTRATION_INITIAL_BALANCE};
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::Address;
use crate::storage::{Snapshot, Tree};
use crate::transaction::{Transaction, TxType};
use crate::Hash;

/// Name of the tree holding contract metadata (SCID → balance-tree root).
pub const SC_META_TREE: &[u8] = b"sc_meta";

/// Tree name of an asset's balance tree.
pub fn balance_tree_name(scid: &Hash) -> Vec<u8> {
    scid.to_vec()
}

/// Tree name of a contract's data tree.
pub fn data_tree_name(scid: &Hash) -> Vec<u8> {
    let mut name = scid.to_vec();
    name.extend_from_slice(b".data");
    name
}

/// Errors from state application.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("account {0} is not registered")]
    NotRegistered(Address),
    #[error("corrupt account leaf: {0}")]
    Leaf(#[from] DecodeError),
    #[error("transaction type cannot be applied here")]
    WrongType,
    #[error("ring member missing from statement")]
    RingMismatch,
}

/// A balance-tree leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    /// Height of the last outgoing spend touching this account.
    pub nonce_height: u64,
    pub balance: Ciphertext,
}

impl Account {
    /// A freshly registered account: encrypted initial credit, nonce 0.
    pub fn registered() -> Self {
        Account {
            nonce_height: 0,
            balance: Ciphertext::encrypt_plain(REGISTRATION_INITIAL_BALANCE),
        }
    }

    /// A zero-balance account, used when an address first touches an asset
    /// tree it was absent from.
    pub fn empty() -> Self {
        Account {
            nonce_height: 0,
            balance: Ciphertext::zero(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(140);
        write_varint(&mut out, self.nonce_height);
        out.extend_from_slice(&self.balance.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Account, DecodeError> {
        let mut r = Reader::new(bytes);
        let nonce_height = r.read_varint("account.nonce_height")?;
        let cipher = r.read_array::<130>("account.balance")?;
        r.expect_end("account")?;
        Ok(Account {
            nonce_height,
            balance: Ciphertext::from_bytes(&cipher)?,
        })
    }
}

/// Result of a contract execution.
#[derive(Clone, Debug, Default)]
pub struct VmResult {
    pub success: bool,
    pub gas_used: u64,
    /// Key-value writes against the contract's data tree.
    pub side_effects: Vec<(Vec<u8>, Vec<u8>)>,
}

/// One contract invocation.
pub struct VmCall<'a> {
    pub code: &'a [u8],
    pub entrypoint: &'a [u8],
    pub gas_limit: u64,
}

/// The opaque smart-contract service.
pub trait ContractVm: Send + Sync {
    fn execute(&self, call: &VmCall<'_>, state: &Tree) -> VmResult;
}

/// A VM that accepts every call and writes nothing; stands in when no
/// contract service is wired up.
pub struct NullVm;

impl ContractVm for NullVm {
    fn execute(&self, _call: &VmCall<'_>, _state: &Tree) -> VmResult {
        VmResult {
            success: true,
            gas_used: 0,
            side_effects: Vec::new(),
        }
    }
}

/// Mutable overlay on a snapshot: trees are cloned on first write and
/// handed to the store in one commit.
pub struct StateBatch {
    snapshot: Snapshot,
    dirty: HashMap<Vec<u8>, Tree>,
}

impl StateBatch {
    pub fn new(snapshot: Snapshot) -> Self {
        StateBatch {
            snapshot,
            dirty: HashMap::new(),
        }
    }

    /// Read through the overlay.
    pub fn get(&self, tree: &[u8], key: &[u8]) -> Option<Vec<u8>> {
        if let Some(t) = self.dirty.get(tree) {
            return t.get(key).map(|v| v.to_vec());
        }
        self.snapshot
            .tree(tree)
            .and_then(|t| t.get(key))
            .map(|v| v.to_vec())
    }

    pub fn tree_mut(&mut self, name: &[u8]) -> &mut Tree {
        if !self.dirty.contains_key(name) {
            let tree = self.snapshot.tree_for_write(name);
            self.dirty.insert(name.to_vec(), tree);
        }
        self.dirty.get_mut(name).expect("just inserted")
    }

    /// Read an account from a balance tree.
    pub fn account(&self, tree: &[u8], address: &Address) -> Result<Option<Account>, StateError> {
        match self.get(tree, address.as_bytes()) {
            Some(bytes) => Ok(Some(Account::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_account(&mut self, tree: &[u8], address: &Address, account: &Account) {
        let name = tree.to_vec();
        self.tree_mut(&name)
            .put(address.as_bytes(), &account.to_bytes());
    }

    /// Dirty trees for the store commit. Mutated SCID balance trees get
    /// their Merkle roots recorded in the SC-metadata tree first.
    pub fn into_trees(mut self) -> Vec<Tree> {
        let sc_roots: Vec<(Hash, Hash)> = self
            .dirty
            .iter()
            .filter_map(|(name, tree)| {
                if name.len() == 32 && name[..] != crate::ZERO_HASH {
                    let mut scid = [0u8; 32];
                    scid.copy_from_slice(name);
                    Some((scid, tree.root()))
                } else {
                    None
                }
            })
            .collect();
        if !sc_roots.is_empty() {
            let meta = self.tree_mut(SC_META_TREE);
            for (scid, root) in sc_roots {
                meta.put(&scid, &root);
            }
        }
        self.dirty.into_values().collect()
    }
}

/// Read an account straight from a snapshot.
pub fn account_at(
    snapshot: &Snapshot,
    tree: &[u8],
    address: &Address,
) -> Result<Option<Account>, StateError> {
    match snapshot.tree(tree).and_then(|t| t.get(address.as_bytes())) {
        Some(bytes) => Ok(Some(Account::from_bytes(bytes)?)),
        None => Ok(None),
    }
}

/// Whether an address exists in the base balance tree.
pub fn is_registered(snapshot: &Snapshot, address: &Address) -> bool {
    snapshot
        .tree(&crate::ZERO_HASH)
        .map(|t| t.get(address.as_bytes()).is_some())
        .unwrap_or(false)
}

/// Whether any registered key's short hash matches the miniblock key hash.
pub fn key_hash_registered(snapshot: &Snapshot, key_hash: &[u8; 16]) -> bool {
    let Some(tree) = snapshot.tree(&crate::ZERO_HASH) else {
        return false;
    };
    tree.cursor()
        .any(|(k, _)| crate::sha3(k)[..16] == key_hash[..])
}

/// Apply one non-miner transaction.
pub fn apply_transaction(
    batch: &mut StateBatch,
    tx: &Transaction,
    block_height: u64,
    vm: &dyn ContractVm,
) -> Result<(), StateError> {
    match tx.tx_type {
        TxType::Registration => {
            let address = tx.miner_address.ok_or(StateError::WrongType)?;
            let base = balance_tree_name(&crate::ZERO_HASH);
            if batch.account(&base, &address)?.is_none() {
                batch.put_account(&base, &address, &Account::registered());
            }
            Ok(())
        }
        TxType::Normal | TxType::Burn | TxType::ScCall => {
            for payload in &tx.payloads {
                apply_payload(batch, payload, block_height)?;
            }
            if tx.tx_type == TxType::ScCall {
                apply_contract_call(batch, tx, vm);
            }
            Ok(())
        }
        TxType::Premine | TxType::Coinbase => Err(StateError::WrongType),
    }
}

fn apply_payload(
    batch: &mut StateBatch,
    payload: &crate::transaction::Payload,
    block_height: u64,
) -> Result<(), StateError> {
    let tree = balance_tree_name(&payload.scid);
    let base = balance_tree_name(&crate::ZERO_HASH);
    let parity_even = payload.proof.sender_parity_even();

    for (i, member) in payload.statement.ring.iter().enumerate() {
        let address = Address::from_point(member);
        let mut account = match batch.account(&tree, &address)? {
            Some(acc) => acc,
            None => {
                // first touch of this asset: a registered address starts
                // from zero, anything else cannot appear in a ring
                if batch.account(&base, &address)?.is_none() {
                    return Err(StateError::NotRegistered(address));
                }
                Account::empty()
            }
        };
        let delta = Ciphertext {
            left: payload.statement.c[i],
            right: payload.statement.d,
        };
        account.balance = account.balance.add(&delta);
        if (i % 2 == 0) == parity_even {
            account.nonce_height = block_height;
        }
        batch.put_account(&tree, &address, &account);
    }
    Ok(())
}

fn apply_contract_call(batch: &mut StateBatch, tx: &Transaction, vm: &dyn ContractVm) {
    let scid: Hash = if tx.is_contract_install() {
        tx.hash()
    } else {
        tx.payloads.first().map(|p| p.scid).unwrap_or(crate::ZERO_HASH)
    };
    let gas = tx.burned();
    let data_name = data_tree_name(&scid);
    let state = batch
        .dirty
        .get(&data_name)
        .cloned()
        .unwrap_or_else(|| batch.snapshot.tree_for_write(&data_name));
    let call = VmCall {
        code: &tx.code,
        entrypoint: b"",
        gas_limit: gas,
    };
    let result = vm.execute(&call, &state);
    if result.success {
        let tree = batch.tree_mut(&data_name);
        for (key, value) in result.side_effects {
            tree.put(&key, &value);
        }
    } else {
        // gas is already gone with the burn; discard the write set
        tracing::debug!(gas_used = result.gas_used, "contract call failed, changes discarded");
    }
}

/// Apply the block's embedded miner transaction: premine at height 0,
/// coinbase otherwise. Coinbase credit is collected fees plus the constant
/// integrator reward.
pub fn apply_miner_tx(
    batch: &mut StateBatch,
    tx: &Transaction,
    fees_collected: u64,
    block_height: u64,
) -> Result<(), StateError> {
    let base = balance_tree_name(&crate::ZERO_HASH);
    let address = tx.miner_address.ok_or(StateError::WrongType)?;
    match tx.tx_type {
        TxType::Premine => {
            let mut account = batch.account(&base, &address)?.unwrap_or_else(Account::empty);
            account.balance = account.balance.add_plain(tx.value);
            batch.put_account(&base, &address, &account);
            Ok(())
        }
        TxType::Coinbase => {
            let mut account = batch
                .account(&base, &address)?
                .ok_or(StateError::NotRegistered(address))?;
            let reward = fees_collected.saturating_add(COINBASE_CONSTANT_REWARD);
            account.balance = account.balance.add_plain(reward);
            batch.put_account(&base, &address, &account);
            let _ = block_height;
            Ok(())
        }
        _ => Err(StateError::WrongType),
    }
}
