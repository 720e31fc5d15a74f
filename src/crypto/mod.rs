//! Cryptographic primitives over the BN256 pairing-friendly curve.
//!
//! Everything consensus-critical lives on the curve's G1 group and scalar
//! field: account keys, ElGamal balance ciphertexts, Pedersen commitments,
//! and the transfer proofs. Points serialize to 33 bytes compressed
//! (`0x02`/`0x03` ∥ x) or 65 bytes uncompressed (`0x04` ∥ x ∥ y), both
//! big-endian; the identity encodes as all zeroes. Hash-to-scalar reduces
//! SHA3-256 mod the group order; hash-to-point is try-and-increment on the
//! curve equation `y² = x³ + 3`.

pub mod elgamal;
pub mod inner_product;
pub mod pedersen;
pub mod proof;
pub mod vectors;

use ark_ec::{AffineRepr, CurveGroup, Group};
use ark_ff::{BigInteger, Field, One, PrimeField, Zero};

use crate::codec::DecodeError;
use crate::Hash;

/// Scalar of the BN256 group order `q`.
pub type Scalar = ark_bn254::Fr;
/// Base-field element of BN256.
pub type Fq = ark_bn254::Fq;
/// A point on BN256 G1 in projective form.
pub type Point = ark_bn254::G1Projective;

/// Compressed point size in bytes.
pub const POINT_COMPRESSED_SIZE: usize = 33;
/// Uncompressed point size in bytes.
pub const POINT_UNCOMPRESSED_SIZE: usize = 65;

/// The fixed group generator.
pub fn generator() -> Point {
    Point::generator()
}

/// Serialize a scalar to 32 big-endian bytes.
pub fn scalar_to_bytes(s: &Scalar) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&s.into_bigint().to_bytes_be());
    out
}

/// Deserialize a canonical 32-byte big-endian scalar.
pub fn scalar_from_bytes(bytes: &[u8; 32], field: &'static str) -> Result<Scalar, DecodeError> {
    let s = Scalar::from_be_bytes_mod_order(bytes);
    if scalar_to_bytes(&s) != *bytes {
        return Err(DecodeError::InvalidField {
            field,
            reason: "scalar not canonical",
        });
    }
    Ok(s)
}

fn fq_to_bytes(v: &Fq) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&v.into_bigint().to_bytes_be());
    out
}

fn fq_from_bytes(bytes: &[u8], field: &'static str) -> Result<Fq, DecodeError> {
    let v = Fq::from_be_bytes_mod_order(bytes);
    if fq_to_bytes(&v)[..] != *bytes {
        return Err(DecodeError::InvalidField {
            field,
            reason: "coordinate not canonical",
        });
    }
    Ok(v)
}

/// Serialize a point to 33 compressed bytes.
pub fn point_to_compressed(p: &Point) -> [u8; POINT_COMPRESSED_SIZE] {
    let mut out = [0u8; POINT_COMPRESSED_SIZE];
    if p.is_zero() {
        return out;
    }
    let affine = p.into_affine();
    let (x, y) = (affine.x, affine.y);
    out[0] = if y.into_bigint().is_odd() { 0x03 } else { 0x02 };
    out[1..].copy_from_slice(&fq_to_bytes(&x));
    out
}

/// Deserialize a 33-byte compressed point, validating the curve equation.
pub fn point_from_compressed(
    bytes: &[u8; POINT_COMPRESSED_SIZE],
    field: &'static str,
) -> Result<Point, DecodeError> {
    if bytes.iter().all(|&b| b == 0) {
        return Ok(Point::zero());
    }
    let tag = bytes[0];
    if tag != 0x02 && tag != 0x03 {
        return Err(DecodeError::InvalidPoint(field));
    }
    let x = fq_from_bytes(&bytes[1..], field)?;
    let rhs = x * x * x + Fq::from(3u64);
    let mut y = rhs.sqrt().ok_or(DecodeError::InvalidPoint(field))?;
    if y.into_bigint().is_odd() != (tag == 0x03) {
        y = -y;
    }
    let affine = ark_bn254::G1Affine::new_unchecked(x, y);
    if !affine.is_on_curve() {
        return Err(DecodeError::InvalidPoint(field));
    }
    Ok(affine.into_group())
}

/// Serialize a point to 65 uncompressed bytes (`0x04` ∥ x ∥ y).
pub fn point_to_uncompressed(p: &Point) -> [u8; POINT_UNCOMPRESSED_SIZE] {
    let mut out = [0u8; POINT_UNCOMPRESSED_SIZE];
    if p.is_zero() {
        return out;
    }
    let affine = p.into_affine();
    out[0] = 0x04;
    out[1..33].copy_from_slice(&fq_to_bytes(&affine.x));
    out[33..].copy_from_slice(&fq_to_bytes(&affine.y));
    out
}

/// Deserialize a 65-byte uncompressed point, validating the curve equation.
pub fn point_from_uncompressed(
    bytes: &[u8; POINT_UNCOMPRESSED_SIZE],
    field: &'static str,
) -> Result<Point, DecodeError> {
    if bytes.iter().all(|&b| b == 0) {
        return Ok(Point::zero());
    }
    if bytes[0] != 0x04 {
        return Err(DecodeError::InvalidPoint(field));
    }
    let x = fq_from_bytes(&bytes[1..33], field)?;
    let y = fq_from_bytes(&bytes[33..], field)?;
    let affine = ark_bn254::G1Affine::new_unchecked(x, y);
    if !affine.is_on_curve() {
        return Err(DecodeError::InvalidPoint(field));
    }
    Ok(affine.into_group())
}

/// Reduce a domain-separated SHA3-256 digest into the scalar field.
pub fn hash_to_scalar(domain: &[u8], parts: &[&[u8]]) -> Scalar {
    use sha3::{Digest, Sha3_256};
    let mut hasher = Sha3_256::new();
    hasher.update((domain.len() as u64).to_be_bytes());
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let digest: Hash = hasher.finalize().into();
    Scalar::from_be_bytes_mod_order(&digest)
}

/// Map bytes onto the curve by try-and-increment.
///
/// The candidate x-coordinate is the reduced digest; x is incremented until
/// `x³ + 3` is a quadratic residue. The even root is taken so both sides of
/// the wire derive the same point. BN256 G1 has cofactor 1, so every curve
/// point is in the prime-order group.
pub fn hash_to_point(domain: &[u8], data: &[u8]) -> Point {
    let digest = crate::sha3_domain(domain, data);
    let mut x = Fq::from_be_bytes_mod_order(&digest);
    loop {
        let rhs = x * x * x + Fq::from(3u64);
        if let Some(mut y) = rhs.sqrt() {
            if y.into_bigint().is_odd() {
                y = -y;
            }
            let affine = ark_bn254::G1Affine::new_unchecked(x, y);
            debug_assert!(affine.is_on_curve());
            return affine.into_group();
        }
        x += Fq::one();
    }
}

/// Proof-of-work hash oracle for miniblocks.
///
/// The network treats the PoW function as opaque; this implementation is
/// the SHA3 placeholder and is swapped wholesale for the production hash.
pub fn pow_hash(data: &[u8]) -> Hash {
    crate::sha3_domain(b"strata.pow", data)
}

/// A public account address: a compressed G1 point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; POINT_COMPRESSED_SIZE]);

impl Address {
    pub fn from_point(p: &Point) -> Self {
        Address(point_to_compressed(p))
    }

    pub fn to_point(&self) -> Result<Point, DecodeError> {
        point_from_compressed(&self.0, "address")
    }

    /// First 16 bytes of the address hash; the miniblock key-hash field.
    pub fn short_hash(&self) -> [u8; 16] {
        let digest = crate::sha3(&self.0);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        out
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A secret scalar; zeroed on drop, redacted in debug output.
#[derive(Clone)]
pub struct SecretKey(pub(crate) Scalar);

impl SecretKey {
    pub fn expose(&self) -> &Scalar {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0 = Scalar::zero();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// A Schnorr signature `(c, s)` over the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub c: Scalar,
    pub s: Scalar,
}

/// An account keypair.
#[derive(Clone, Debug)]
pub struct Keypair {
    pub secret: SecretKey,
    pub public: Point,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate<R: rand::Rng>(rng: &mut R) -> Self {
        let mut bytes = zeroize::Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *bytes);
        // rejection-free: reduce mod q
        let secret = Scalar::from_be_bytes_mod_order(&*bytes);
        Self::from_secret(secret)
    }

    /// Build a keypair from a known secret scalar.
    pub fn from_secret(secret: Scalar) -> Self {
        let public = generator() * secret;
        Keypair {
            secret: SecretKey(secret),
            public,
        }
    }

    pub fn address(&self) -> Address {
        Address::from_point(&self.public)
    }

    /// Sign this keypair's own address; used by registration transactions.
    pub fn sign_address<R: rand::Rng>(&self, rng: &mut R) -> Signature {
        let mut kb = zeroize::Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *kb);
        let k = Scalar::from_be_bytes_mod_order(&*kb);
        let r = generator() * k;
        let c = hash_to_scalar(
            b"strata.register",
            &[self.address().as_bytes(), &point_to_compressed(&r)],
        );
        let s = k + c * self.secret.0;
        Signature { c, s }
    }
}

/// Verify a registration signature against the claimed address.
pub fn verify_address(address: &Address, sig: &Signature) -> bool {
    let Ok(public) = address.to_point() else {
        return false;
    };
    if public.is_zero() {
        return false;
    }
    let r = generator() * sig.s - public * sig.c;
    let c = hash_to_scalar(
        b"strata.register",
        &[address.as_bytes(), &point_to_compressed(&r)],
    );
    c == sig.c
}
