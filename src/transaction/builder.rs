//! Transfer transaction construction.
//!
//! Builds a single-payload confidential transfer: picks the shared
//! randomness, derives the per-ring-member commitments, computes the prefix
//! hash the proof must bind, and generates the proof. The node uses this
//! for its own tests and the mining simulator; wallets carry their own
//! richer builders.

use crate::codec::write_varint;
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::proof::{Proof, TransferContext, TransferStatement, TransferWitness};
use crate::crypto::{generator, Keypair, Point, Scalar};
use crate::Hash;

use super::{Payload, Statement, Transaction, TxError, TxType};

/// Everything needed to build one confidential transfer.
pub struct TransferSpec<'a> {
    pub sender: &'a Keypair,
    pub sender_index: usize,
    pub receiver_index: usize,
    /// Ring public keys; sender and receiver sit at the indices above.
    pub ring: Vec<Point>,
    /// Current ElGamal balance of every ring member, read from the state
    /// the transfer references.
    pub accounts: Vec<Ciphertext>,
    /// Sender's plaintext balance at that state.
    pub sender_balance: u64,
    pub amount: u64,
    pub fees: u64,
    pub burn: u64,
    pub scid: Hash,
    /// Merkle root of the referenced balance tree.
    pub roothash: Hash,
    /// Reference height of that state.
    pub height: u64,
    /// Block id of that state.
    pub blid: Hash,
}

/// Build a transfer of the given kind (`Normal`, `Burn`, or `ScCall` with
/// `code`).
pub fn build_transfer<R: rand::Rng>(
    spec: &TransferSpec<'_>,
    tx_type: TxType,
    code: Vec<u8>,
    rng: &mut R,
) -> Result<Transaction, TxError> {
    assert!(tx_type.has_payloads(), "builder only makes transfer kinds");
    let n = spec.ring.len();
    let spend = spec
        .amount
        .saturating_add(spec.fees)
        .saturating_add(spec.burn);

    // shared randomness and per-member commitments
    let r = random_scalar(rng);
    let d = generator() * r;
    let c: Vec<Point> = (0..n)
        .map(|i| {
            let blind = spec.ring[i] * r;
            if i == spec.sender_index {
                blind - generator() * Scalar::from(spend)
            } else if i == spec.receiver_index {
                blind + generator() * Scalar::from(spec.amount)
            } else {
                blind
            }
        })
        .collect();

    let statement = Statement {
        ring: spec.ring.clone(),
        c,
        d,
        fees: spec.fees,
        roothash: spec.roothash,
    };
    statement.validate()?;

    // prefix serialization: the tx without its proof
    let mut prefix = Vec::new();
    write_varint(&mut prefix, 1); // version
    prefix.push(tx_type as u8);
    write_varint(&mut prefix, spec.height);
    prefix.extend_from_slice(&spec.blid);
    if tx_type == TxType::ScCall {
        write_varint(&mut prefix, code.len() as u64);
        prefix.extend_from_slice(&code);
    }
    write_varint(&mut prefix, 1); // payload count
    prefix.extend_from_slice(&spec.scid);
    write_varint(&mut prefix, spec.burn);
    statement.write_to(&mut prefix);
    let prefix_hash = crate::sha3(&prefix);

    // expanded ciphertexts after this transfer
    let cln: Vec<Point> = spec
        .accounts
        .iter()
        .zip(&statement.c)
        .map(|(acc, ci)| acc.left + *ci)
        .collect();
    let crn: Vec<Point> = spec.accounts.iter().map(|acc| acc.right + d).collect();

    let stmt = TransferStatement {
        ring: &statement.ring,
        c: &statement.c,
        d,
        cln: &cln,
        crn: &crn,
        fees: spec.fees,
        burn: spec.burn,
        roothash: spec.roothash,
    };
    let ctx = TransferContext {
        tx_hash: &prefix_hash,
        scid: &spec.scid,
        payload_index: 0,
        height: spec.height,
    };
    let witness = TransferWitness {
        secret: *spec.sender.secret.expose(),
        sender_index: spec.sender_index,
        receiver_index: spec.receiver_index,
        amount: spec.amount,
        balance: spec.sender_balance,
        r,
    };
    let proof = Proof::generate(&stmt, &ctx, &witness, rng)?;

    Ok(Transaction {
        version: 1,
        tx_type,
        height: spec.height,
        blid: spec.blid,
        miner_address: None,
        value: 0,
        signature: None,
        code,
        payloads: vec![Payload {
            scid: spec.scid,
            burn_value: spec.burn,
            statement,
            proof,
        }],
    })
}

fn random_scalar<R: rand::Rng>(rng: &mut R) -> Scalar {
    use ark_ff::PrimeField;
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    Scalar::from_be_bytes_mod_order(&bytes)
}
