//! Process-wide Pedersen generator table.
//!
//! The base points are derived once at first use via deterministic
//! hash-to-point and are immutable for the life of the process. Every node
//! derives the identical table, so commitments are network-portable. The
//! vector bases are sized for the widest supported range proof
//! (`RANGE_PROOF_BITS` = 128) and the widest ring (`MAX_RING_SIZE` = 128).

use std::sync::LazyLock;

use super::vectors::{FieldVector, PointVector};
use super::{generator, hash_to_point, Point, Scalar};
use crate::constants::RANGE_PROOF_BITS;

/// The generator table.
pub struct PedersenParams {
    /// The group generator; value base of commitments.
    pub g: Point,
    /// Blinding base, independent of `g` by hash-to-point.
    pub h: Point,
    /// 128-wide vector bases for bit commitments.
    pub gs: PointVector,
    /// 128-wide vector bases for the blinded side.
    pub hs: PointVector,
    /// Base point for the inner-product term.
    pub u: Point,
}

static PARAMS: LazyLock<PedersenParams> = LazyLock::new(|| {
    let mut gs = Vec::with_capacity(RANGE_PROOF_BITS);
    let mut hs = Vec::with_capacity(RANGE_PROOF_BITS);
    for i in 0..RANGE_PROOF_BITS as u32 {
        gs.push(hash_to_point(b"strata.pedersen.g", &i.to_be_bytes()));
        hs.push(hash_to_point(b"strata.pedersen.h", &i.to_be_bytes()));
    }
    PedersenParams {
        g: generator(),
        h: hash_to_point(b"strata.pedersen.blind", b""),
        gs: PointVector(gs),
        hs: PointVector(hs),
        u: hash_to_point(b"strata.pedersen.u", b""),
    }
});

/// The process-wide parameter table.
pub fn params() -> &'static PedersenParams {
    &PARAMS
}

/// `value · G + blind · H`
pub fn commit(value: Scalar, blind: Scalar) -> Point {
    let p = params();
    p.g * value + p.h * blind
}

/// Vector commitment over the `gs` bases: `Σ scalars[i] · Gᵢ + blind · H`.
pub fn vector_commit(scalars: &FieldVector, blind: Scalar) -> Point {
    let p = params();
    PointVector(p.gs.0[..scalars.len()].to_vec()).multiexp(scalars) + p.h * blind
}
