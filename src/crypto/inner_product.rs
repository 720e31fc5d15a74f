//! Recursive inner-product argument: the folding sub-proof of the range
//! proof.
//!
//! Proves knowledge of vectors `l`, `r` such that
//! `P = ⟨l,G⃗⟩ + ⟨r,H⃗⟩ + ⟨l,r⟩·U` for public bases, halving the vectors
//! each round. The 128-bit range proof always folds log2(128) = 7 times.

use ark_ff::Field;

use super::proof::Transcript;
use super::vectors::{FieldVector, PointVector};
use super::{point_from_compressed, point_to_compressed, scalar_from_bytes, scalar_to_bytes, Point, Scalar};
use crate::codec::{DecodeError, Reader};

/// The folding argument: one (L, R) pair per round plus the two final
/// scalars.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerProductProof {
    pub l: Vec<Point>,
    pub r: Vec<Point>,
    pub a: Scalar,
    pub b: Scalar,
}

impl InnerProductProof {
    /// Number of folding rounds for vectors of length `n`.
    pub fn rounds(n: usize) -> usize {
        n.trailing_zeros() as usize
    }

    /// Prove `⟨l,r⟩` against the given bases, consuming the transcript.
    ///
    /// `l` and `r` must have equal power-of-two length matching the bases.
    pub fn generate(
        transcript: &mut Transcript,
        gs: &PointVector,
        hs: &PointVector,
        u: Point,
        mut l: FieldVector,
        mut r: FieldVector,
    ) -> Self {
        assert_eq!(l.len(), r.len());
        assert_eq!(gs.len(), l.len());
        assert_eq!(hs.len(), l.len());
        assert!(l.len().is_power_of_two());

        let mut gs = gs.clone();
        let mut hs = hs.clone();
        let rounds = Self::rounds(l.len());
        let mut ls = Vec::with_capacity(rounds);
        let mut rs = Vec::with_capacity(rounds);

        while l.len() > 1 {
            let (l_lo, l_hi) = (l.lo(), l.hi());
            let (r_lo, r_hi) = (r.lo(), r.hi());
            let (g_lo, g_hi) = (gs.lo(), gs.hi());
            let (h_lo, h_hi) = (hs.lo(), hs.hi());

            let cl = l_lo.inner_product(&r_hi);
            let cr = l_hi.inner_product(&r_lo);
            let big_l = g_hi.multiexp(&l_lo) + h_lo.multiexp(&r_hi) + u * cl;
            let big_r = g_lo.multiexp(&l_hi) + h_hi.multiexp(&r_lo) + u * cr;

            transcript.absorb_point(b"ip.L", &big_l);
            transcript.absorb_point(b"ip.R", &big_r);
            let x = transcript.challenge(b"ip.x");
            let x_inv = x.inverse().expect("challenge is nonzero");

            l = l_lo.scale(x).add(&l_hi.scale(x_inv));
            r = r_lo.scale(x_inv).add(&r_hi.scale(x));
            gs = gs.fold(x_inv, x);
            hs = hs.fold(x, x_inv);

            ls.push(big_l);
            rs.push(big_r);
        }

        InnerProductProof {
            l: ls,
            r: rs,
            a: l.0[0],
            b: r.0[0],
        }
    }

    /// Verify against commitment `p`, consuming the transcript in the same
    /// order the prover did.
    pub fn verify(
        &self,
        transcript: &mut Transcript,
        gs: &PointVector,
        hs: &PointVector,
        u: Point,
        mut p: Point,
    ) -> bool {
        let rounds = Self::rounds(gs.len());
        if self.l.len() != rounds || self.r.len() != rounds {
            return false;
        }

        let mut gs = gs.clone();
        let mut hs = hs.clone();
        for (big_l, big_r) in self.l.iter().zip(&self.r) {
            transcript.absorb_point(b"ip.L", big_l);
            transcript.absorb_point(b"ip.R", big_r);
            let x = transcript.challenge(b"ip.x");
            let Some(x_inv) = x.inverse() else {
                return false;
            };

            p = p + *big_l * (x * x) + *big_r * (x_inv * x_inv);
            gs = gs.fold(x_inv, x);
            hs = hs.fold(x, x_inv);
        }

        p == gs.0[0] * self.a + hs.0[0] * self.b + u * (self.a * self.b)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (l, r) in self.l.iter().zip(&self.r) {
            out.extend_from_slice(&point_to_compressed(l));
            out.extend_from_slice(&point_to_compressed(r));
        }
        out.extend_from_slice(&scalar_to_bytes(&self.a));
        out.extend_from_slice(&scalar_to_bytes(&self.b));
    }

    pub fn read_from(reader: &mut Reader<'_>, rounds: usize) -> Result<Self, DecodeError> {
        let mut ls = Vec::with_capacity(rounds);
        let mut rs = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            ls.push(point_from_compressed(&reader.read_array("ip.L")?, "ip.L")?);
            rs.push(point_from_compressed(&reader.read_array("ip.R")?, "ip.R")?);
        }
        let a = scalar_from_bytes(&reader.read_array("ip.a")?, "ip.a")?;
        let b = scalar_from_bytes(&reader.read_array("ip.b")?, "ip.b")?;
        Ok(InnerProductProof { l: ls, r: rs, a, b })
    }
}
