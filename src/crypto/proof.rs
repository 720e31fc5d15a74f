//! The confidential-transfer proof: a 128-bit Bulletproofs-style range
//! proof combined with a one-out-of-many ring proof and a Schnorr layer
//! binding both to the ring's ElGamal ciphertexts.
//!
//! A payload proves, without revealing sender, recipient, or amount, that:
//! 1. the transferred amount and the sender's post-transfer balance are
//!    both non-negative 64-bit values (the two halves of the 128-bit range
//!    proof);
//! 2. the prover knows the secret key of exactly one ring position;
//! 3. the payload's commitments subtract the amount (plus fees and burn)
//!    at one position and add it at one position of opposite parity;
//! 4. the nonce point `u = sk·H(salt ∥ SCID ∥ index)` identifies the
//!    sender-payload pair for double-spend detection without identifying
//!    the sender.
//!
//! Verification is deterministic and side-effect-free. The prover lives in
//! the same module and shares the transcript implementation, so the two
//! sides cannot drift.

use ark_ff::{One, Zero};

use super::inner_product::InnerProductProof;
use super::pedersen;
use super::vectors::{FieldVector, PointVector};
use super::{
    generator, hash_to_point, hash_to_scalar, point_from_compressed, point_to_compressed,
    scalar_from_bytes, scalar_to_bytes, Point, Scalar,
};
use crate::codec::{DecodeError, Reader};
use crate::constants::{RANGE_PROOF_BITS, TX_VALIDITY_HEIGHT, VALUE_BITS};
use crate::Hash;

/// Reasons a proof fails verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("proof shape does not match the ring size")]
    Shape,
    #[error("ring size is not a supported power of two")]
    RingSize,
    #[error("sender/receiver parity markers are inconsistent")]
    Parity,
    #[error("bit commitment does not bind the f vector")]
    BitBinding,
    #[error("ring aggregation structure check failed")]
    RingStructure,
    #[error("sigma challenge mismatch")]
    Challenge,
    #[error("inner-product argument rejected")]
    InnerProduct,
    #[error("witness is inconsistent with the statement")]
    Witness,
}

/// Fiat–Shamir transcript: chained domain-separated SHA3.
pub struct Transcript {
    state: Hash,
}

impl Transcript {
    pub fn new(domain: &[u8]) -> Self {
        Transcript {
            state: crate::sha3_domain(domain, b""),
        }
    }

    pub fn absorb(&mut self, label: &[u8], data: &[u8]) {
        use sha3::{Digest, Sha3_256};
        let mut hasher = Sha3_256::new();
        hasher.update(self.state);
        hasher.update((label.len() as u64).to_be_bytes());
        hasher.update(label);
        hasher.update((data.len() as u64).to_be_bytes());
        hasher.update(data);
        self.state = hasher.finalize().into();
    }

    pub fn absorb_point(&mut self, label: &[u8], p: &Point) {
        self.absorb(label, &point_to_compressed(p));
    }

    pub fn absorb_scalar(&mut self, label: &[u8], s: &Scalar) {
        self.absorb(label, &scalar_to_bytes(s));
    }

    pub fn absorb_u64(&mut self, label: &[u8], v: u64) {
        self.absorb(label, &v.to_be_bytes());
    }

    /// Draw a nonzero challenge scalar and fold it back into the state.
    pub fn challenge(&mut self, label: &[u8]) -> Scalar {
        let mut counter = 0u64;
        loop {
            let c = hash_to_scalar(
                b"strata.challenge",
                &[&self.state, label, &counter.to_be_bytes()],
            );
            if !c.is_zero() {
                self.absorb(label, &scalar_to_bytes(&c));
                return c;
            }
            counter += 1;
        }
    }
}

/// The public half of a transfer payload, with the per-ring-member ElGamal
/// expansions already resolved from the snapshot balance tree.
pub struct TransferStatement<'a> {
    /// Ring public keys.
    pub ring: &'a [Point],
    /// Per-ring-member amount commitments.
    pub c: &'a [Point],
    /// Shared randomness point `r·G`.
    pub d: Point,
    /// `CLn[i] = CL[i] + C[i]` for each ring member.
    pub cln: &'a [Point],
    /// `CRn[i] = CR[i] + D` for each ring member.
    pub crn: &'a [Point],
    /// Fees, public.
    pub fees: u64,
    /// Burned value, public.
    pub burn: u64,
    /// Merkle root of the referenced state.
    pub roothash: Hash,
}

/// Verification context identifying the payload.
#[derive(Clone, Copy)]
pub struct TransferContext<'a> {
    pub tx_hash: &'a Hash,
    pub scid: &'a Hash,
    pub payload_index: u32,
    pub height: u64,
}

/// The secret half of a transfer payload.
pub struct TransferWitness {
    pub secret: Scalar,
    pub sender_index: usize,
    pub receiver_index: usize,
    pub amount: u64,
    /// Sender balance before this transfer.
    pub balance: u64,
    /// Shared encryption randomness (`D = r·G`).
    pub r: Scalar,
}

/// The proof bundle, in wire order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub ba: Point,
    pub bs: Point,
    pub a: Point,
    pub b: Point,
    pub cln_g: Vec<Point>,
    pub crn_g: Vec<Point>,
    pub c0_g: Vec<Point>,
    pub d_g: Vec<Point>,
    pub y0_g: Vec<Point>,
    pub g_g: Vec<Point>,
    pub cx_g: Vec<Point>,
    pub yx_g: Vec<Point>,
    pub u: Point,
    pub f: Vec<Scalar>,
    pub z_a: Scalar,
    pub t1: Point,
    pub t2: Point,
    pub that: Scalar,
    pub mu: Scalar,
    pub c: Scalar,
    pub s_sk: Scalar,
    pub s_r: Scalar,
    pub s_b: Scalar,
    pub s_tau: Scalar,
    pub ip: InnerProductProof,
}

/// Base point for the payload nonce. The salt is the validity window the
/// transaction was built in, so replays expire with the window.
pub fn nonce_base(scid: &Hash, payload_index: u32, height: u64) -> Point {
    let salt = height / TX_VALIDITY_HEIGHT;
    let mut data = Vec::with_capacity(8 + 32 + 4);
    data.extend_from_slice(&salt.to_be_bytes());
    data.extend_from_slice(scid);
    data.extend_from_slice(&payload_index.to_be_bytes());
    hash_to_point(b"strata.nonce", &data)
}

fn random_scalar<R: rand::Rng>(rng: &mut R) -> Scalar {
    use ark_ff::PrimeField;
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    Scalar::from_be_bytes_mod_order(&bytes)
}

fn ring_bits(ring_size: usize) -> Option<usize> {
    use crate::constants::{MAX_RING_SIZE, MIN_RING_SIZE};
    if ring_size < MIN_RING_SIZE || ring_size > MAX_RING_SIZE || !ring_size.is_power_of_two() {
        return None;
    }
    Some(ring_size.trailing_zeros() as usize)
}

/// Coefficients of `p_i(X) = Π_j (bit_j(i) ? b_j·X + a_j : (1-b_j)·X - a_j)`
/// for every ring index `i`, degrees 0..=m.
fn index_polynomials(m: usize, bits: &[Scalar], blinds: &[Scalar]) -> Vec<Vec<Scalar>> {
    let n = 1usize << m;
    (0..n)
        .map(|i| {
            let mut coeffs = vec![Scalar::zero(); m + 1];
            coeffs[0] = Scalar::one();
            let mut degree = 0;
            for j in 0..m {
                // linear factor c1·X + c0 for this bit position
                let (c1, c0) = if (i >> j) & 1 == 1 {
                    (bits[j], blinds[j])
                } else {
                    (Scalar::one() - bits[j], -blinds[j])
                };
                for k in (0..=degree).rev() {
                    let prev = coeffs[k];
                    coeffs[k + 1] += prev * c1;
                    coeffs[k] = prev * c0;
                }
                degree += 1;
            }
            coeffs
        })
        .collect()
}

/// Evaluate `p_i(x)` for every ring index from the response vector `f`.
fn index_evaluations(m: usize, f: &[Scalar], x: Scalar) -> Vec<Scalar> {
    let n = 1usize << m;
    (0..n)
        .map(|i| {
            let mut acc = Scalar::one();
            for (j, fj) in f.iter().enumerate().take(m) {
                acc *= if (i >> j) & 1 == 1 { *fj } else { x - *fj };
            }
            acc
        })
        .collect()
}

/// `δ(y, z)` for the two-value aggregated 128-bit range proof.
fn delta(y_vec: &FieldVector, z: Scalar) -> Scalar {
    let z2 = z * z;
    let z3 = z2 * z;
    let z4 = z3 * z;
    let max = Scalar::from(u64::MAX); // ⟨1, 2^64⟩ = 2^64 − 1
    (z - z2) * y_vec.sum() - z3 * max - z4 * max
}

/// Per-slot coefficient on the h′ side: `z·yⁱ + z^{2+⌊i/64⌋}·2^{i mod 64}`.
fn hprime_coefficients(y_vec: &FieldVector, z: Scalar) -> FieldVector {
    let z2 = z * z;
    let z3 = z2 * z;
    FieldVector(
        (0..RANGE_PROOF_BITS)
            .map(|i| {
                let seg = if i < VALUE_BITS { z2 } else { z3 };
                let two_pow = Scalar::from(1u128 << (i % VALUE_BITS));
                z * y_vec.0[i] + seg * two_pow
            })
            .collect(),
    )
}

fn base_transcript(stmt: &TransferStatement<'_>, ctx: &TransferContext<'_>) -> Transcript {
    let mut t = Transcript::new(b"strata.transfer");
    t.absorb(b"txhash", ctx.tx_hash);
    t.absorb(b"scid", ctx.scid);
    t.absorb(b"index", &ctx.payload_index.to_be_bytes());
    t.absorb_u64(b"height", ctx.height);
    t.absorb_u64(b"fees", stmt.fees);
    t.absorb_u64(b"burn", stmt.burn);
    t.absorb(b"roothash", &stmt.roothash);
    for (y, c) in stmt.ring.iter().zip(stmt.c) {
        t.absorb_point(b"ring.y", y);
        t.absorb_point(b"ring.C", c);
    }
    t.absorb_point(b"ring.D", &stmt.d);
    t
}

impl Proof {
    /// Sender parity revealed by the proof: true when the sender hides among
    /// the even ring indices.
    pub fn sender_parity_even(&self) -> bool {
        self.f.first().map(|f0| f0.is_zero()).unwrap_or(false)
    }

    /// Prove a transfer. The statement must carry the post-transfer
    /// `CLn`/`CRn` expansions for the ring.
    pub fn generate<R: rand::Rng>(
        stmt: &TransferStatement<'_>,
        ctx: &TransferContext<'_>,
        witness: &TransferWitness,
        rng: &mut R,
    ) -> Result<Proof, ProofError> {
        let n_ring = stmt.ring.len();
        let m = ring_bits(n_ring).ok_or(ProofError::RingSize)?;
        if stmt.c.len() != n_ring || stmt.cln.len() != n_ring || stmt.crn.len() != n_ring {
            return Err(ProofError::Shape);
        }
        if witness.sender_index >= n_ring
            || witness.receiver_index >= n_ring
            || witness.sender_index % 2 == witness.receiver_index % 2
        {
            return Err(ProofError::Parity);
        }
        let spend = (witness.amount as u128)
            + (stmt.fees as u128)
            + (stmt.burn as u128);
        let balance_after = (witness.balance as u128)
            .checked_sub(spend)
            .ok_or(ProofError::Witness)?;
        let balance_after = u64::try_from(balance_after).map_err(|_| ProofError::Witness)?;

        let params = pedersen::params();
        let g = generator();
        let mut transcript = base_transcript(stmt, ctx);

        // ── range proof commitments over amount ∥ post-balance ──
        let value = (witness.amount as u128) | ((balance_after as u128) << VALUE_BITS);
        let a_l = FieldVector::bits(value, RANGE_PROOF_BITS);
        let a_r = a_l.sub(&FieldVector::constant(Scalar::one(), RANGE_PROOF_BITS));
        let alpha = random_scalar(rng);
        let rho = random_scalar(rng);
        let s_l = FieldVector((0..RANGE_PROOF_BITS).map(|_| random_scalar(rng)).collect());
        let s_r = FieldVector((0..RANGE_PROOF_BITS).map(|_| random_scalar(rng)).collect());
        let ba = params.gs.multiexp(&a_l) + params.hs.multiexp(&a_r) + params.h * alpha;
        let bs = params.gs.multiexp(&s_l) + params.hs.multiexp(&s_r) + params.h * rho;
        transcript.absorb_point(b"BA", &ba);
        transcript.absorb_point(b"BS", &bs);
        let y = transcript.challenge(b"y");
        let z = transcript.challenge(b"z");

        // ── one-out-of-many commitments ──
        let sender_bits: Vec<Scalar> = (0..m)
            .map(|j| Scalar::from(((witness.sender_index >> j) & 1) as u64))
            .collect();
        let receiver_bits: Vec<Scalar> = (0..m)
            .map(|j| Scalar::from(((witness.receiver_index >> j) & 1) as u64))
            .collect();
        // blind every bit except the parity markers at f[0] and f[m]
        let sender_blinds: Vec<Scalar> = (0..m)
            .map(|j| if j == 0 { Scalar::zero() } else { random_scalar(rng) })
            .collect();
        let receiver_blinds: Vec<Scalar> = (0..m)
            .map(|j| if j == 0 { Scalar::zero() } else { random_scalar(rng) })
            .collect();
        let mut bit_vec = sender_bits.clone();
        bit_vec.extend_from_slice(&receiver_bits);
        let mut blind_vec = sender_blinds.clone();
        blind_vec.extend_from_slice(&receiver_blinds);
        let r_b = random_scalar(rng);
        let r_a = random_scalar(rng);
        let b_commit = pedersen::vector_commit(&FieldVector(bit_vec.clone()), r_b);
        let a_commit = pedersen::vector_commit(&FieldVector(blind_vec.clone()), r_a);

        let p_coeffs = index_polynomials(m, &sender_bits, &sender_blinds);
        let q_coeffs = index_polynomials(m, &receiver_bits, &receiver_blinds);
        let mut cln_g = Vec::with_capacity(m);
        let mut crn_g = Vec::with_capacity(m);
        let mut c0_g = Vec::with_capacity(m);
        let mut d_g = Vec::with_capacity(m);
        let mut y0_g = Vec::with_capacity(m);
        let mut g_g = Vec::with_capacity(m);
        let mut cx_g = Vec::with_capacity(m);
        let mut yx_g = Vec::with_capacity(m);
        for k in 0..m {
            let mut cln_k = Point::zero();
            let mut crn_k = Point::zero();
            let mut c0_k = Point::zero();
            let mut y0_k = Point::zero();
            let mut cx_k = Point::zero();
            let mut yx_k = Point::zero();
            let mut p_sum = Scalar::zero();
            for i in 0..n_ring {
                let pik = p_coeffs[i][k];
                let qik = q_coeffs[i][k];
                cln_k += stmt.cln[i] * pik;
                crn_k += stmt.crn[i] * pik;
                c0_k += stmt.c[i] * pik;
                y0_k += stmt.ring[i] * pik;
                cx_k += stmt.c[i] * qik;
                yx_k += stmt.ring[i] * qik;
                p_sum += pik;
            }
            cln_g.push(cln_k);
            crn_g.push(crn_k);
            c0_g.push(c0_k);
            d_g.push(stmt.d * p_sum);
            y0_g.push(y0_k);
            g_g.push(g * p_sum);
            cx_g.push(cx_k);
            yx_g.push(yx_k);
        }

        let hp = nonce_base(ctx.scid, ctx.payload_index, ctx.height);
        let u = hp * witness.secret;

        transcript.absorb_point(b"A", &a_commit);
        transcript.absorb_point(b"B", &b_commit);
        for k in 0..m {
            transcript.absorb_point(b"CLnG", &cln_g[k]);
            transcript.absorb_point(b"CRnG", &crn_g[k]);
            transcript.absorb_point(b"C_0G", &c0_g[k]);
            transcript.absorb_point(b"DG", &d_g[k]);
            transcript.absorb_point(b"y_0G", &y0_g[k]);
            transcript.absorb_point(b"gG", &g_g[k]);
            transcript.absorb_point(b"C_XG", &cx_g[k]);
            transcript.absorb_point(b"y_XG", &yx_g[k]);
        }
        transcript.absorb_point(b"u", &u);
        let x = transcript.challenge(b"x");

        let f: Vec<Scalar> = bit_vec
            .iter()
            .zip(&blind_vec)
            .map(|(b, a)| *b * x + *a)
            .collect();
        let z_a = r_b * x + r_a;
        for fj in &f {
            transcript.absorb_scalar(b"f", fj);
        }
        transcript.absorb_scalar(b"z_A", &z_a);

        // ── range polynomial ──
        let y_vec = FieldVector::powers(y, RANGE_PROOF_BITS);
        let ones = FieldVector::constant(Scalar::one(), RANGE_PROOF_BITS);
        let zeta = hprime_coefficients(&y_vec, z)
            .sub(&y_vec.scale(z)); // zeta[i] = z^{2+seg}·2^(i mod 64)
        let l0 = a_l.sub(&ones.scale(z));
        let r0 = y_vec.hadamard(&a_r.add(&ones.scale(z))).add(&zeta);
        let r1 = y_vec.hadamard(&s_r);
        let t1_scalar = l0.inner_product(&r1) + s_l.inner_product(&r0);
        let t2_scalar = s_l.inner_product(&r1);
        let tau1 = random_scalar(rng);
        let tau2 = random_scalar(rng);
        let t1 = g * t1_scalar + params.h * tau1;
        let t2 = g * t2_scalar + params.h * tau2;
        transcript.absorb_point(b"T_1", &t1);
        transcript.absorb_point(b"T_2", &t2);
        let x_r = transcript.challenge(b"x_r");

        let l_vec = l0.add(&s_l.scale(x_r));
        let r_vec = r0.add(&r1.scale(x_r));
        let that = l_vec.inner_product(&r_vec);
        let s_tau = tau1 * x_r + tau2 * x_r * x_r;
        let mu = alpha + rho * x_r;
        transcript.absorb_scalar(b"that", &that);
        transcript.absorb_scalar(b"s_tau", &s_tau);
        transcript.absorb_scalar(b"mu", &mu);

        // ── sigma layer ──
        let w = {
            let mut acc = Scalar::one();
            for _ in 0..m {
                acc *= x;
            }
            acc
        };
        let z2 = z * z;
        let z3 = z2 * z;
        let y_bar = stmt.ring[witness.sender_index] * w;
        let yx_bar = stmt.ring[witness.receiver_index] * w;
        let crn_bar = stmt.crn[witness.sender_index] * w;
        let vb = z2 * Scalar::from(witness.amount) + z3 * Scalar::from(balance_after);

        let k_sk = random_scalar(rng);
        let k_r = random_scalar(rng);
        let k_b = random_scalar(rng);
        let a_y = g * (w * k_sk);
        let a_u = hp * k_sk;
        let a_r_pt = g * k_r;
        let a_s = (y_bar + yx_bar) * k_r;
        let a_t = g * k_b;
        let a_v = g * (w * k_b) + (crn_bar * z3 - stmt.d * (z2 * w)) * k_sk;
        transcript.absorb_point(b"A_y", &a_y);
        transcript.absorb_point(b"A_u", &a_u);
        transcript.absorb_point(b"A_r", &a_r_pt);
        transcript.absorb_point(b"A_s", &a_s);
        transcript.absorb_point(b"A_t", &a_t);
        transcript.absorb_point(b"A_v", &a_v);
        let c = transcript.challenge(b"c");

        let s_sk = k_sk + c * witness.secret;
        let s_r = k_r + c * witness.r;
        let s_b = k_b + c * vb;

        // ── inner-product argument ──
        let y_inv_pows = y_vec.invert();
        let hprime = params.hs.hadamard_scale(&y_inv_pows);
        let ip = InnerProductProof::generate(
            &mut transcript,
            &params.gs,
            &hprime,
            params.u,
            l_vec,
            r_vec,
        );

        Ok(Proof {
            ba,
            bs,
            a: a_commit,
            b: b_commit,
            cln_g,
            crn_g,
            c0_g,
            d_g,
            y0_g,
            g_g,
            cx_g,
            yx_g,
            u,
            f,
            z_a,
            t1,
            t2,
            that,
            mu,
            c,
            s_sk,
            s_r,
            s_b,
            s_tau,
            ip,
        })
    }

    /// Verify the proof against the statement. Deterministic and
    /// side-effect-free; every failure carries a category tag.
    pub fn verify(
        &self,
        stmt: &TransferStatement<'_>,
        ctx: &TransferContext<'_>,
    ) -> Result<(), ProofError> {
        let n_ring = stmt.ring.len();
        let m = ring_bits(n_ring).ok_or(ProofError::RingSize)?;
        if stmt.c.len() != n_ring || stmt.cln.len() != n_ring || stmt.crn.len() != n_ring {
            return Err(ProofError::Shape);
        }
        if self.f.len() != 2 * m
            || self.cln_g.len() != m
            || self.crn_g.len() != m
            || self.c0_g.len() != m
            || self.d_g.len() != m
            || self.y0_g.len() != m
            || self.g_g.len() != m
            || self.cx_g.len() != m
            || self.yx_g.len() != m
        {
            return Err(ProofError::Shape);
        }

        let params = pedersen::params();
        let g = generator();
        let mut transcript = base_transcript(stmt, ctx);

        transcript.absorb_point(b"BA", &self.ba);
        transcript.absorb_point(b"BS", &self.bs);
        let y = transcript.challenge(b"y");
        let z = transcript.challenge(b"z");

        transcript.absorb_point(b"A", &self.a);
        transcript.absorb_point(b"B", &self.b);
        for k in 0..m {
            transcript.absorb_point(b"CLnG", &self.cln_g[k]);
            transcript.absorb_point(b"CRnG", &self.crn_g[k]);
            transcript.absorb_point(b"C_0G", &self.c0_g[k]);
            transcript.absorb_point(b"DG", &self.d_g[k]);
            transcript.absorb_point(b"y_0G", &self.y0_g[k]);
            transcript.absorb_point(b"gG", &self.g_g[k]);
            transcript.absorb_point(b"C_XG", &self.cx_g[k]);
            transcript.absorb_point(b"y_XG", &self.yx_g[k]);
        }
        transcript.absorb_point(b"u", &self.u);
        let x = transcript.challenge(b"x");

        // parity markers: exactly one of f[0], f[m] is zero
        let sender_even = self.f[0].is_zero();
        let receiver_even = self.f[m].is_zero();
        if sender_even == receiver_even {
            return Err(ProofError::Parity);
        }
        // the non-zero marker must be the challenge itself (an unblinded set bit)
        if !sender_even && self.f[0] != x {
            return Err(ProofError::Parity);
        }
        if !receiver_even && self.f[m] != x {
            return Err(ProofError::Parity);
        }

        for fj in &self.f {
            transcript.absorb_scalar(b"f", fj);
        }
        transcript.absorb_scalar(b"z_A", &self.z_a);

        // bit-commitment binding: x·B + A == ⟨f, G⃗⟩ + z_A·H
        let f_vec = FieldVector(self.f.clone());
        let lhs = self.b * x + self.a;
        let rhs = PointVector(params.gs.0[..2 * m].to_vec()).multiexp(&f_vec) + params.h * self.z_a;
        if lhs != rhs {
            return Err(ProofError::BitBinding);
        }

        transcript.absorb_point(b"T_1", &self.t1);
        transcript.absorb_point(b"T_2", &self.t2);
        let x_r = transcript.challenge(b"x_r");
        transcript.absorb_scalar(b"that", &self.that);
        transcript.absorb_scalar(b"s_tau", &self.s_tau);
        transcript.absorb_scalar(b"mu", &self.mu);

        // ── ring aggregation ──
        let p_evals = index_evaluations(m, &self.f[..m], x);
        let q_evals = index_evaluations(m, &self.f[m..], x);
        let x_pows = FieldVector::powers(x, m);
        let w = {
            let mut acc = Scalar::one();
            for _ in 0..m {
                acc *= x;
            }
            acc
        };

        let correct = |points: &[Point], corrections: &[Point], evals: &[Scalar]| -> Point {
            let mut acc = Point::zero();
            for (p, e) in points.iter().zip(evals) {
                acc += *p * *e;
            }
            for (corr, xp) in corrections.iter().zip(&x_pows.0) {
                acc -= *corr * *xp;
            }
            acc
        };

        let y_bar = correct(stmt.ring, &self.y0_g, &p_evals);
        let cln_bar = correct(stmt.cln, &self.cln_g, &p_evals);
        let crn_bar = correct(stmt.crn, &self.crn_g, &p_evals);
        let c_bar = correct(stmt.c, &self.c0_g, &p_evals);
        let cx_bar = correct(stmt.c, &self.cx_g, &q_evals);
        let yx_bar = correct(stmt.ring, &self.yx_g, &q_evals);

        let p_sum: Scalar = p_evals.iter().sum();
        let d_bar = {
            let mut acc = stmt.d * p_sum;
            for (corr, xp) in self.d_g.iter().zip(&x_pows.0) {
                acc -= *corr * *xp;
            }
            acc
        };
        let g_bar = {
            let mut acc = g * p_sum;
            for (corr, xp) in self.g_g.iter().zip(&x_pows.0) {
                acc -= *corr * *xp;
            }
            acc
        };
        if d_bar != stmt.d * w || g_bar != g * w {
            return Err(ProofError::RingStructure);
        }

        // ── sigma layer: recompute announcements and re-derive c ──
        let y_vec = FieldVector::powers(y, RANGE_PROOF_BITS);
        let z2 = z * z;
        let z3 = z2 * z;
        let fee_burn = Scalar::from(stmt.fees) + Scalar::from(stmt.burn);
        let hp = nonce_base(ctx.scid, ctx.payload_index, ctx.height);

        let p_t = g * (self.that - delta(&y_vec, z)) + params.h * self.s_tau
            - self.t1 * x_r
            - self.t2 * (x_r * x_r);
        let v_bar = (-c_bar - g * (w * fee_burn)) * z2 + cln_bar * z3;

        let a_y = g * (w * self.s_sk) - y_bar * self.c;
        let a_u = hp * self.s_sk - self.u * self.c;
        let a_r_pt = g * self.s_r - stmt.d * self.c;
        let a_s = (y_bar + yx_bar) * self.s_r
            - (c_bar + cx_bar + g * (w * fee_burn)) * self.c;
        let a_t = g * self.s_b - p_t * self.c;
        let a_v = g * (w * self.s_b) + (crn_bar * z3 - stmt.d * (z2 * w)) * self.s_sk
            - v_bar * self.c;
        transcript.absorb_point(b"A_y", &a_y);
        transcript.absorb_point(b"A_u", &a_u);
        transcript.absorb_point(b"A_r", &a_r_pt);
        transcript.absorb_point(b"A_s", &a_s);
        transcript.absorb_point(b"A_t", &a_t);
        transcript.absorb_point(b"A_v", &a_v);
        let c = transcript.challenge(b"c");
        if c != self.c {
            return Err(ProofError::Challenge);
        }

        // ── inner-product argument over the range commitment ──
        let y_inv_pows = y_vec.invert();
        let hprime = params.hs.hadamard_scale(&y_inv_pows);
        let hp_coeffs = hprime_coefficients(&y_vec, z);
        let p_commit = self.ba + self.bs * x_r
            + params.gs.multiexp(&FieldVector::constant(-z, RANGE_PROOF_BITS))
            + hprime.multiexp(&hp_coeffs)
            - params.h * self.mu
            + params.u * self.that;
        if !self
            .ip
            .verify(&mut transcript, &params.gs, &hprime, params.u, p_commit)
        {
            return Err(ProofError::InnerProduct);
        }

        Ok(())
    }

    /// Serialize in wire order. The ring size fixes every vector length, so
    /// no counts are emitted.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for p in [&self.ba, &self.bs, &self.a, &self.b] {
            out.extend_from_slice(&point_to_compressed(p));
        }
        for vec in [
            &self.cln_g,
            &self.crn_g,
            &self.c0_g,
            &self.d_g,
            &self.y0_g,
            &self.g_g,
            &self.cx_g,
            &self.yx_g,
        ] {
            for p in vec.iter() {
                out.extend_from_slice(&point_to_compressed(p));
            }
        }
        out.extend_from_slice(&point_to_compressed(&self.u));
        for fj in &self.f {
            out.extend_from_slice(&scalar_to_bytes(fj));
        }
        out.extend_from_slice(&scalar_to_bytes(&self.z_a));
        out.extend_from_slice(&point_to_compressed(&self.t1));
        out.extend_from_slice(&point_to_compressed(&self.t2));
        for s in [
            &self.that, &self.mu, &self.c, &self.s_sk, &self.s_r, &self.s_b, &self.s_tau,
        ] {
            out.extend_from_slice(&scalar_to_bytes(s));
        }
        self.ip.write_to(out);
    }

    /// Deserialize a proof for a ring of `ring_size` members.
    pub fn read_from(reader: &mut Reader<'_>, ring_size: usize) -> Result<Proof, DecodeError> {
        let m = ring_bits(ring_size).ok_or(DecodeError::InvalidField {
            field: "proof.ring_size",
            reason: "not a supported power of two",
        })?;
        let ba = point_from_compressed(&reader.read_array("proof.BA")?, "proof.BA")?;
        let bs = point_from_compressed(&reader.read_array("proof.BS")?, "proof.BS")?;
        let a = point_from_compressed(&reader.read_array("proof.A")?, "proof.A")?;
        let b = point_from_compressed(&reader.read_array("proof.B")?, "proof.B")?;
        let mut cln_g = Vec::with_capacity(m);
        let mut crn_g = Vec::with_capacity(m);
        let mut c0_g = Vec::with_capacity(m);
        let mut d_g = Vec::with_capacity(m);
        let mut y0_g = Vec::with_capacity(m);
        let mut g_g = Vec::with_capacity(m);
        let mut cx_g = Vec::with_capacity(m);
        let mut yx_g = Vec::with_capacity(m);
        for _ in 0..m {
            cln_g.push(point_from_compressed(&reader.read_array("proof.CLnG")?, "proof.CLnG")?);
        }
        for _ in 0..m {
            crn_g.push(point_from_compressed(&reader.read_array("proof.CRnG")?, "proof.CRnG")?);
        }
        for _ in 0..m {
            c0_g.push(point_from_compressed(&reader.read_array("proof.C_0G")?, "proof.C_0G")?);
        }
        for _ in 0..m {
            d_g.push(point_from_compressed(&reader.read_array("proof.DG")?, "proof.DG")?);
        }
        for _ in 0..m {
            y0_g.push(point_from_compressed(&reader.read_array("proof.y_0G")?, "proof.y_0G")?);
        }
        for _ in 0..m {
            g_g.push(point_from_compressed(&reader.read_array("proof.gG")?, "proof.gG")?);
        }
        for _ in 0..m {
            cx_g.push(point_from_compressed(&reader.read_array("proof.C_XG")?, "proof.C_XG")?);
        }
        for _ in 0..m {
            yx_g.push(point_from_compressed(&reader.read_array("proof.y_XG")?, "proof.y_XG")?);
        }
        let u = point_from_compressed(&reader.read_array("proof.u")?, "proof.u")?;
        let mut f = Vec::with_capacity(2 * m);
        for _ in 0..2 * m {
            f.push(scalar_from_bytes(&reader.read_array("proof.f")?, "proof.f")?);
        }
        let z_a = scalar_from_bytes(&reader.read_array("proof.z_A")?, "proof.z_A")?;
        let t1 = point_from_compressed(&reader.read_array("proof.T_1")?, "proof.T_1")?;
        let t2 = point_from_compressed(&reader.read_array("proof.T_2")?, "proof.T_2")?;
        let that = scalar_from_bytes(&reader.read_array("proof.that")?, "proof.that")?;
        let mu = scalar_from_bytes(&reader.read_array("proof.mu")?, "proof.mu")?;
        let c = scalar_from_bytes(&reader.read_array("proof.c")?, "proof.c")?;
        let s_sk = scalar_from_bytes(&reader.read_array("proof.s_sk")?, "proof.s_sk")?;
        let s_r = scalar_from_bytes(&reader.read_array("proof.s_r")?, "proof.s_r")?;
        let s_b = scalar_from_bytes(&reader.read_array("proof.s_b")?, "proof.s_b")?;
        let s_tau = scalar_from_bytes(&reader.read_array("proof.s_tau")?, "proof.s_tau")?;
        let rounds = InnerProductProof::rounds(RANGE_PROOF_BITS);
        let ip = InnerProductProof::read_from(reader, rounds)?;
        Ok(Proof {
            ba,
            bs,
            a,
            b,
            cln_g,
            crn_g,
            c0_g,
            d_g,
            y0_g,
            g_g,
            cx_g,
            yx_g,
            u,
            f,
            z_a,
            t1,
            t2,
            that,
            mu,
            c,
            s_sk,
            s_r,
            s_b,
            s_tau,
            ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::Ciphertext;
    use crate::crypto::Keypair;
    use rand::SeedableRng;

    struct TestRing {
        ring: Vec<Point>,
        c: Vec<Point>,
        d: Point,
        cln: Vec<Point>,
        crn: Vec<Point>,
    }

    /// Build a 1-in-N ring: sender at `sender`, receiver at `receiver`,
    /// every account pre-funded with `balance` at zero randomness.
    fn build_ring(
        n: usize,
        sender: usize,
        receiver: usize,
        balance: u64,
        amount: u64,
        fees: u64,
        burn: u64,
        rng: &mut impl rand::Rng,
    ) -> (TestRing, TransferWitness) {
        let keys: Vec<Keypair> = (0..n).map(|_| Keypair::generate(rng)).collect();
        let ring: Vec<Point> = keys.iter().map(|k| k.public).collect();
        let r = Scalar::from(987_654_321u64);
        let d = generator() * r;
        let spend = amount + fees + burn;
        let c: Vec<Point> = (0..n)
            .map(|i| {
                let blind = ring[i] * r;
                if i == sender {
                    blind - generator() * Scalar::from(spend)
                } else if i == receiver {
                    blind + generator() * Scalar::from(amount)
                } else {
                    blind
                }
            })
            .collect();
        let accounts: Vec<Ciphertext> = (0..n).map(|_| Ciphertext::encrypt_plain(balance)).collect();
        let cln: Vec<Point> = (0..n).map(|i| accounts[i].left + c[i]).collect();
        let crn: Vec<Point> = (0..n).map(|i| accounts[i].right + d).collect();
        let witness = TransferWitness {
            secret: *keys[sender].secret.expose(),
            sender_index: sender,
            receiver_index: receiver,
            amount,
            balance,
            r,
        };
        (
            TestRing {
                ring,
                c,
                d,
                cln,
                crn,
            },
            witness,
        )
    }

    fn ctx<'a>(tx_hash: &'a Hash, scid: &'a Hash) -> TransferContext<'a> {
        TransferContext {
            tx_hash,
            scid,
            payload_index: 0,
            height: 5,
        }
    }

    #[test]
    fn proof_roundtrip_ring_of_four() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let (tr, witness) = build_ring(4, 2, 1, 100_000, 5_000, 100, 0, &mut rng);
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 100,
            burn: 0,
            roothash: [9u8; 32],
        };
        let tx_hash = [1u8; 32];
        let scid = crate::ZERO_HASH;
        let proof = Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng).unwrap();
        assert!(proof.verify(&stmt, &ctx(&tx_hash, &scid)).is_ok());
        // sender index 2 is even
        assert!(proof.sender_parity_even());
    }

    #[test]
    fn proof_roundtrip_ring_of_two_with_burn() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(43);
        let (tr, witness) = build_ring(2, 1, 0, 50_000, 1_000, 50, 25, &mut rng);
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 50,
            burn: 25,
            roothash: [0u8; 32],
        };
        let tx_hash = [2u8; 32];
        let scid = crate::ZERO_HASH;
        let proof = Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng).unwrap();
        assert!(proof.verify(&stmt, &ctx(&tx_hash, &scid)).is_ok());
        assert!(!proof.sender_parity_even());
    }

    #[test]
    fn proof_verification_is_idempotent() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(44);
        let (tr, witness) = build_ring(4, 0, 1, 10_000, 10, 1, 0, &mut rng);
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 1,
            burn: 0,
            roothash: [0u8; 32],
        };
        let tx_hash = [3u8; 32];
        let scid = crate::ZERO_HASH;
        let proof = Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng).unwrap();
        assert_eq!(
            proof.verify(&stmt, &ctx(&tx_hash, &scid)).is_ok(),
            proof.verify(&stmt, &ctx(&tx_hash, &scid)).is_ok(),
        );
    }

    #[test]
    fn tampered_context_rejected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(45);
        let (tr, witness) = build_ring(4, 0, 3, 10_000, 10, 1, 0, &mut rng);
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 1,
            burn: 0,
            roothash: [0u8; 32],
        };
        let tx_hash = [4u8; 32];
        let other_hash = [5u8; 32];
        let scid = crate::ZERO_HASH;
        let proof = Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng).unwrap();
        assert!(proof.verify(&stmt, &ctx(&other_hash, &scid)).is_err());
    }

    #[test]
    fn tampered_scalar_rejected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(46);
        let (tr, witness) = build_ring(2, 0, 1, 10_000, 10, 1, 0, &mut rng);
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 1,
            burn: 0,
            roothash: [0u8; 32],
        };
        let tx_hash = [6u8; 32];
        let scid = crate::ZERO_HASH;
        let mut proof = Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng).unwrap();
        proof.s_b += Scalar::one();
        assert!(proof.verify(&stmt, &ctx(&tx_hash, &scid)).is_err());
    }

    #[test]
    fn overdraft_witness_rejected_at_generation() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(47);
        let (tr, mut witness) = build_ring(2, 0, 1, 1_000, 10, 1, 0, &mut rng);
        witness.amount = 2_000; // exceeds balance
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 1,
            burn: 0,
            roothash: [0u8; 32],
        };
        let tx_hash = [7u8; 32];
        let scid = crate::ZERO_HASH;
        assert!(matches!(
            Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng),
            Err(ProofError::Witness)
        ));
    }

    #[test]
    fn serialization_roundtrip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(48);
        let (tr, witness) = build_ring(8, 3, 4, 10_000, 10, 1, 0, &mut rng);
        let stmt = TransferStatement {
            ring: &tr.ring,
            c: &tr.c,
            d: tr.d,
            cln: &tr.cln,
            crn: &tr.crn,
            fees: 1,
            burn: 0,
            roothash: [0u8; 32],
        };
        let tx_hash = [8u8; 32];
        let scid = crate::ZERO_HASH;
        let proof = Proof::generate(&stmt, &ctx(&tx_hash, &scid), &witness, &mut rng).unwrap();
        let mut bytes = Vec::new();
        proof.write_to(&mut bytes);
        let mut reader = Reader::new(&bytes);
        let back = Proof::read_from(&mut reader, 8).unwrap();
        assert!(reader.is_empty());
        assert_eq!(proof, back);
        assert!(back.verify(&stmt, &ctx(&tx_hash, &scid)).is_ok());
    }

    #[test]
    fn nonce_base_changes_per_validity_window() {
        let scid = crate::ZERO_HASH;
        let a = nonce_base(&scid, 0, 0);
        let b = nonce_base(&scid, 0, TX_VALIDITY_HEIGHT);
        let same_window = nonce_base(&scid, 0, 1);
        assert_eq!(a, same_window);
        assert_ne!(a, b);
    }
}
