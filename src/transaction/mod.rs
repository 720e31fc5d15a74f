//! Transaction model: a tagged variant over six kinds.
//!
//! *Premine* seeds the genesis block. *Registration* introduces a new
//! account (signed by the registrant, hash-ground against a proof-of-work
//! floor). *Coinbase* credits the block integrator. *Normal*, *burn*, and
//! *contract-call* transactions carry confidential payloads: each payload
//! names an asset (SCID), a public burn value, a statement (the ring with
//! its commitments), and the transfer proof.
//!
//! Two hashes matter: the identity hash covers the full serialization and
//! keys every pool and block; the *prefix hash* covers the serialization
//! with proofs omitted and is what each payload proof signs, breaking the
//! circularity between proof and hash.

pub mod builder;

use crate::codec::{write_varint, DecodeError, Reader};
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::proof::{Proof, TransferContext, TransferStatement};
use crate::crypto::{
    point_from_compressed, point_to_compressed, scalar_from_bytes, scalar_to_bytes, Address,
    Point, Signature,
};
use crate::Hash;

/// Transaction kind tags; wire values are fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxType {
    Premine = 0,
    Registration = 1,
    Coinbase = 2,
    Normal = 3,
    Burn = 4,
    ScCall = 5,
}

impl TxType {
    fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        Ok(match tag {
            0 => TxType::Premine,
            1 => TxType::Registration,
            2 => TxType::Coinbase,
            3 => TxType::Normal,
            4 => TxType::Burn,
            5 => TxType::ScCall,
            _ => {
                return Err(DecodeError::InvalidField {
                    field: "tx.type",
                    reason: "unknown transaction type",
                })
            }
        })
    }

    /// Whether this kind carries confidential payloads.
    pub fn has_payloads(&self) -> bool {
        matches!(self, TxType::Normal | TxType::Burn | TxType::ScCall)
    }
}

/// Errors from transaction-level validation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("ring size {0} is not a power of two within [2, 128]")]
    RingSize(usize),
    #[error("statement commitment count does not match the ring")]
    CommitmentCount,
    #[error("duplicate ring member in statement")]
    DuplicateRingMember,
    #[error("transaction type carries no such field")]
    MissingField,
    #[error("registration signature invalid")]
    BadSignature,
    #[error("proof rejected: {0}")]
    Proof(#[from] crate::crypto::proof::ProofError),
}

/// The public statement of one confidential payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    /// Ring public keys; length is a power of two in [2, 128].
    pub ring: Vec<Point>,
    /// Per-member amount commitments.
    pub c: Vec<Point>,
    /// Shared randomness point.
    pub d: Point,
    /// Fees, public, paid to the block integrator.
    pub fees: u64,
    /// Merkle root of the balance tree this payload was built against.
    pub roothash: Hash,
}

impl Statement {
    pub fn ring_size(&self) -> usize {
        self.ring.len()
    }

    pub fn validate(&self) -> Result<(), TxError> {
        use crate::constants::{MAX_RING_SIZE, MIN_RING_SIZE};
        let n = self.ring.len();
        if n < MIN_RING_SIZE || n > MAX_RING_SIZE || !n.is_power_of_two() {
            return Err(TxError::RingSize(n));
        }
        if self.c.len() != n {
            return Err(TxError::CommitmentCount);
        }
        let mut seen = std::collections::HashSet::new();
        for member in &self.ring {
            if !seen.insert(point_to_compressed(member)) {
                return Err(TxError::DuplicateRingMember);
            }
        }
        Ok(())
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.ring.len().trailing_zeros() as u8);
        for p in &self.ring {
            out.extend_from_slice(&point_to_compressed(p));
        }
        for p in &self.c {
            out.extend_from_slice(&point_to_compressed(p));
        }
        out.extend_from_slice(&point_to_compressed(&self.d));
        write_varint(out, self.fees);
        out.extend_from_slice(&self.roothash);
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Statement, DecodeError> {
        let power = r.read_u8("statement.ring_power")?;
        if power == 0 || power > 7 {
            return Err(DecodeError::InvalidField {
                field: "statement.ring_power",
                reason: "ring size out of range",
            });
        }
        let n = 1usize << power;
        let mut ring = Vec::with_capacity(n);
        for _ in 0..n {
            ring.push(point_from_compressed(
                &r.read_array("statement.ring")?,
                "statement.ring",
            )?);
        }
        let mut c = Vec::with_capacity(n);
        for _ in 0..n {
            c.push(point_from_compressed(
                &r.read_array("statement.C")?,
                "statement.C",
            )?);
        }
        let d = point_from_compressed(&r.read_array("statement.D")?, "statement.D")?;
        let fees = r.read_varint("statement.fees")?;
        let roothash = r.read_array::<32>("statement.roothash")?;
        Ok(Statement {
            ring,
            c,
            d,
            fees,
            roothash,
        })
    }
}

/// One confidential payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    /// Asset identifier; the zero hash is the base asset.
    pub scid: Hash,
    /// Publicly burned value (contract gas for SC calls).
    pub burn_value: u64,
    pub statement: Statement,
    pub proof: Proof,
}

impl Payload {
    /// Expand the ring's ElGamal ciphertexts into the verifier's CLn/CRn
    /// vectors and run the proof.
    pub fn verify_proof(
        &self,
        accounts: &[Ciphertext],
        prefix_hash: &Hash,
        payload_index: u32,
        height: u64,
    ) -> Result<(), TxError> {
        let cln: Vec<Point> = accounts
            .iter()
            .zip(&self.statement.c)
            .map(|(acc, c)| acc.left + *c)
            .collect();
        let crn: Vec<Point> = accounts
            .iter()
            .map(|acc| acc.right + self.statement.d)
            .collect();
        let stmt = TransferStatement {
            ring: &self.statement.ring,
            c: &self.statement.c,
            d: self.statement.d,
            cln: &cln,
            crn: &crn,
            fees: self.statement.fees,
            burn: self.burn_value,
            roothash: self.statement.roothash,
        };
        let ctx = TransferContext {
            tx_hash: prefix_hash,
            scid: &self.scid,
            payload_index,
            height,
        };
        self.proof.verify(&stmt, &ctx)?;
        Ok(())
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>, include_proof: bool) {
        out.extend_from_slice(&self.scid);
        write_varint(out, self.burn_value);
        self.statement.write_to(out);
        if include_proof {
            self.proof.write_to(out);
        }
    }

    fn read_from(r: &mut Reader<'_>) -> Result<Payload, DecodeError> {
        let scid = r.read_array::<32>("payload.scid")?;
        let burn_value = r.read_varint("payload.burn")?;
        let statement = Statement::read_from(r)?;
        let proof = Proof::read_from(r, statement.ring.len())?;
        Ok(Payload {
            scid,
            burn_value,
            statement,
            proof,
        })
    }
}

/// A transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Format version; currently 1.
    pub version: u64,
    pub tx_type: TxType,
    /// Height of the state this tx was built against (transfers only).
    pub height: u64,
    /// Block id of that state (transfers only).
    pub blid: Hash,
    /// Miner or registrant address.
    pub miner_address: Option<Address>,
    /// Premined amount (premine only).
    pub value: u64,
    /// Registrant's signature over the address.
    pub signature: Option<Signature>,
    /// Contract invocation blob (contract calls; installs when the
    /// payload's SCID is zero).
    pub code: Vec<u8>,
    pub payloads: Vec<Payload>,
}

impl Transaction {
    pub fn premine(address: Address, value: u64) -> Self {
        Transaction {
            version: 1,
            tx_type: TxType::Premine,
            height: 0,
            blid: crate::ZERO_HASH,
            miner_address: Some(address),
            value,
            signature: None,
            code: Vec::new(),
            payloads: Vec::new(),
        }
    }

    pub fn coinbase(address: Address) -> Self {
        Transaction {
            version: 1,
            tx_type: TxType::Coinbase,
            height: 0,
            blid: crate::ZERO_HASH,
            miner_address: Some(address),
            value: 0,
            signature: None,
            code: Vec::new(),
            payloads: Vec::new(),
        }
    }

    pub fn registration(address: Address, signature: Signature) -> Self {
        Transaction {
            version: 1,
            tx_type: TxType::Registration,
            height: 0,
            blid: crate::ZERO_HASH,
            miner_address: Some(address),
            value: 0,
            signature: Some(signature),
            code: Vec::new(),
            payloads: Vec::new(),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>, include_proofs: bool) {
        write_varint(out, self.version);
        out.push(self.tx_type as u8);
        match self.tx_type {
            TxType::Premine => {
                let addr = self.miner_address.expect("premine carries an address");
                out.extend_from_slice(addr.as_bytes());
                write_varint(out, self.value);
            }
            TxType::Registration => {
                let addr = self.miner_address.expect("registration carries an address");
                out.extend_from_slice(addr.as_bytes());
                let sig = self.signature.expect("registration carries a signature");
                out.extend_from_slice(&scalar_to_bytes(&sig.c));
                out.extend_from_slice(&scalar_to_bytes(&sig.s));
            }
            TxType::Coinbase => {
                let addr = self.miner_address.expect("coinbase carries an address");
                out.extend_from_slice(addr.as_bytes());
            }
            TxType::Normal | TxType::Burn | TxType::ScCall => {
                write_varint(out, self.height);
                out.extend_from_slice(&self.blid);
                if self.tx_type == TxType::ScCall {
                    write_varint(out, self.code.len() as u64);
                    out.extend_from_slice(&self.code);
                }
                write_varint(out, self.payloads.len() as u64);
                for payload in &self.payloads {
                    payload.write_to(out, include_proofs);
                }
            }
        }
    }

    /// Full wire serialization.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out, true);
        out
    }

    /// Decode a transaction from a reader (self-delimiting).
    pub fn read_from(r: &mut Reader<'_>) -> Result<Transaction, DecodeError> {
        let version = r.read_varint_capped("tx.version", 9)?;
        if version != 1 {
            return Err(DecodeError::InvalidField {
                field: "tx.version",
                reason: "unsupported version",
            });
        }
        let tx_type = TxType::from_tag(r.read_u8("tx.type")?)?;
        let mut tx = Transaction {
            version,
            tx_type,
            height: 0,
            blid: crate::ZERO_HASH,
            miner_address: None,
            value: 0,
            signature: None,
            code: Vec::new(),
            payloads: Vec::new(),
        };
        match tx_type {
            TxType::Premine => {
                tx.miner_address = Some(Address(r.read_array("tx.address")?));
                tx.value = r.read_varint("tx.value")?;
            }
            TxType::Registration => {
                tx.miner_address = Some(Address(r.read_array("tx.address")?));
                let c = scalar_from_bytes(&r.read_array("tx.sig.c")?, "tx.sig.c")?;
                let s = scalar_from_bytes(&r.read_array("tx.sig.s")?, "tx.sig.s")?;
                tx.signature = Some(Signature { c, s });
            }
            TxType::Coinbase => {
                tx.miner_address = Some(Address(r.read_array("tx.address")?));
            }
            TxType::Normal | TxType::Burn | TxType::ScCall => {
                tx.height = r.read_varint("tx.height")?;
                tx.blid = r.read_array::<32>("tx.blid")?;
                if tx_type == TxType::ScCall {
                    let code_len = r.read_varint_capped("tx.code_len", 4)? as usize;
                    tx.code = r.read_bytes(code_len, "tx.code")?.to_vec();
                }
                let count = r.read_varint_capped("tx.payload_count", 2)? as usize;
                for _ in 0..count {
                    tx.payloads.push(Payload::read_from(r)?);
                }
            }
        }
        Ok(tx)
    }

    /// Decode a complete transaction; trailing bytes fail.
    pub fn deserialize(bytes: &[u8]) -> Result<Transaction, DecodeError> {
        let mut r = Reader::new(bytes);
        let tx = Self::read_from(&mut r)?;
        r.expect_end("transaction")?;
        Ok(tx)
    }

    /// Identity hash over the full serialization.
    pub fn hash(&self) -> Hash {
        crate::sha3(&self.serialize())
    }

    /// Hash over the serialization with proofs omitted; the value each
    /// payload proof binds.
    pub fn prefix_hash(&self) -> Hash {
        let mut out = Vec::new();
        self.write_to(&mut out, false);
        crate::sha3(&out)
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    /// Total fees over all payloads.
    pub fn fees(&self) -> u64 {
        self.payloads
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.statement.fees))
    }

    /// Total burned value over all payloads.
    pub fn burned(&self) -> u64 {
        self.payloads
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.burn_value))
    }

    /// Nonce points of every payload, in order.
    pub fn nonces(&self) -> Vec<Point> {
        self.payloads.iter().map(|p| p.proof.u).collect()
    }

    /// Whether this is a contract install: a contract call whose first
    /// payload targets the zero SCID with a non-empty code blob.
    pub fn is_contract_install(&self) -> bool {
        self.tx_type == TxType::ScCall
            && !self.code.is_empty()
            && self.payloads.first().map(|p| p.scid == crate::ZERO_HASH) == Some(true)
    }

    /// Structural validation of every payload statement.
    pub fn validate_statements(&self) -> Result<(), TxError> {
        for payload in &self.payloads {
            payload.statement.validate()?;
        }
        Ok(())
    }

    /// Verify a registration's signature against its address.
    pub fn verify_registration(&self) -> Result<(), TxError> {
        let (Some(addr), Some(sig)) = (self.miner_address, self.signature) else {
            return Err(TxError::MissingField);
        };
        if !crate::crypto::verify_address(&addr, &sig) {
            return Err(TxError::BadSignature);
        }
        Ok(())
    }
}

/// Number of leading zero bytes of a hash; the registration PoW floor.
pub fn leading_zero_bytes(hash: &Hash) -> usize {
    hash.iter().take_while(|&&b| b == 0).count()
}
