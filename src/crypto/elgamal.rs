//! ElGamal ciphertexts over G1: the homomorphically encrypted account
//! balance representation.
//!
//! A balance `b` encrypted to public key `y` with randomness `r` is
//! `(left, right) = (b·G + r·y, r·G)`. Ciphertexts add componentwise, so a
//! transfer payload's per-ring-member `(C[i], D)` pair is applied to an
//! account by plain addition. Plaintext amounts (registration credit,
//! coinbase reward) are added with `r = 0`, which keeps state transitions
//! deterministic across nodes.

use ark_ff::Zero;

use super::{
    generator, point_from_uncompressed, point_to_uncompressed, Point, Scalar,
    POINT_UNCOMPRESSED_SIZE,
};
use crate::codec::DecodeError;

/// Serialized ciphertext size: two uncompressed points.
pub const CIPHERTEXT_SIZE: usize = 2 * POINT_UNCOMPRESSED_SIZE;

/// An ElGamal ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub left: Point,
    pub right: Point,
}

impl Ciphertext {
    /// The encryption of zero with zero randomness; a fresh account balance.
    pub fn zero() -> Self {
        Ciphertext {
            left: Point::zero(),
            right: Point::zero(),
        }
    }

    /// Encrypt `value` to `pubkey` with randomness `r`.
    pub fn encrypt(value: u64, pubkey: &Point, r: Scalar) -> Self {
        Ciphertext {
            left: generator() * Scalar::from(value) + *pubkey * r,
            right: generator() * r,
        }
    }

    /// Encrypt `value` with zero randomness; publicly decodable, used for
    /// registration credits and coinbase rewards.
    pub fn encrypt_plain(value: u64) -> Self {
        Ciphertext {
            left: generator() * Scalar::from(value),
            right: Point::zero(),
        }
    }

    /// Homomorphic addition.
    pub fn add(&self, other: &Ciphertext) -> Self {
        Ciphertext {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }

    /// Add a plaintext amount: `left += value·G`.
    pub fn add_plain(&self, value: u64) -> Self {
        Ciphertext {
            left: self.left + generator() * Scalar::from(value),
            right: self.right,
        }
    }

    /// Recover `b·G` with the secret key. The discrete log is the caller's
    /// problem; consensus only ever compares the group element.
    pub fn decrypt_point(&self, secret: &Scalar) -> Point {
        self.left - self.right * *secret
    }

    pub fn to_bytes(&self) -> [u8; CIPHERTEXT_SIZE] {
        let mut out = [0u8; CIPHERTEXT_SIZE];
        out[..POINT_UNCOMPRESSED_SIZE].copy_from_slice(&point_to_uncompressed(&self.left));
        out[POINT_UNCOMPRESSED_SIZE..].copy_from_slice(&point_to_uncompressed(&self.right));
        out
    }

    pub fn from_bytes(bytes: &[u8; CIPHERTEXT_SIZE]) -> Result<Self, DecodeError> {
        let mut left = [0u8; POINT_UNCOMPRESSED_SIZE];
        let mut right = [0u8; POINT_UNCOMPRESSED_SIZE];
        left.copy_from_slice(&bytes[..POINT_UNCOMPRESSED_SIZE]);
        right.copy_from_slice(&bytes[POINT_UNCOMPRESSED_SIZE..]);
        Ok(Ciphertext {
            left: point_from_uncompressed(&left, "ciphertext.left")?,
            right: point_from_uncompressed(&right, "ciphertext.right")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn encrypt_decrypt_point() {
        let kp = Keypair::from_secret(Scalar::from(11u64));
        let ct = Ciphertext::encrypt(500, &kp.public, Scalar::from(77u64));
        assert_eq!(
            ct.decrypt_point(kp.secret.expose()),
            generator() * Scalar::from(500u64)
        );
    }

    #[test]
    fn homomorphic_addition() {
        let kp = Keypair::from_secret(Scalar::from(13u64));
        let a = Ciphertext::encrypt(100, &kp.public, Scalar::from(5u64));
        let b = Ciphertext::encrypt(250, &kp.public, Scalar::from(9u64));
        let sum = a.add(&b);
        assert_eq!(
            sum.decrypt_point(kp.secret.expose()),
            generator() * Scalar::from(350u64)
        );
    }

    #[test]
    fn plain_addition_needs_no_key() {
        let start = Ciphertext::zero().add_plain(800_000);
        assert_eq!(
            start.left,
            generator() * Scalar::from(800_000u64)
        );
        assert_eq!(start.right, Point::zero());
    }

    #[test]
    fn bytes_roundtrip() {
        let kp = Keypair::from_secret(Scalar::from(17u64));
        let ct = Ciphertext::encrypt(42, &kp.public, Scalar::from(3u64));
        let back = Ciphertext::from_bytes(&ct.to_bytes()).unwrap();
        assert_eq!(ct, back);

        let zero = Ciphertext::zero();
        assert_eq!(Ciphertext::from_bytes(&zero.to_bytes()).unwrap(), zero);
    }
}
