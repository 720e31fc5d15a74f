//! Scalar and point vector algebra backing the transfer proofs.
//!
//! Thin newtypes over `Vec` with the handful of operations the range proof
//! and ring proof need: powers, Hadamard products, inner products, and the
//! half-splits used by the folding argument. All operations panic on length
//! mismatch; proof code always works with power-of-two lengths.

use ark_ff::{Field, One, Zero};

use super::{Point, Scalar};

/// A vector of scalars.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldVector(pub Vec<Scalar>);

impl FieldVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `[1, x, x², …, x^{n-1}]`
    pub fn powers(x: Scalar, n: usize) -> Self {
        let mut out = Vec::with_capacity(n);
        let mut acc = Scalar::one();
        for _ in 0..n {
            out.push(acc);
            acc *= x;
        }
        FieldVector(out)
    }

    /// `[c, c, …, c]` of length n.
    pub fn constant(c: Scalar, n: usize) -> Self {
        FieldVector(vec![c; n])
    }

    /// Little-endian bit decomposition of `value` padded to `n` bits.
    pub fn bits(value: u128, n: usize) -> Self {
        FieldVector(
            (0..n)
                .map(|i| {
                    if i < 128 && (value >> i) & 1 == 1 {
                        Scalar::one()
                    } else {
                        Scalar::zero()
                    }
                })
                .collect(),
        )
    }

    pub fn sum(&self) -> Scalar {
        self.0.iter().sum()
    }

    pub fn add(&self, other: &Self) -> Self {
        assert_eq!(self.len(), other.len());
        FieldVector(self.0.iter().zip(&other.0).map(|(a, b)| *a + *b).collect())
    }

    pub fn sub(&self, other: &Self) -> Self {
        assert_eq!(self.len(), other.len());
        FieldVector(self.0.iter().zip(&other.0).map(|(a, b)| *a - *b).collect())
    }

    pub fn scale(&self, x: Scalar) -> Self {
        FieldVector(self.0.iter().map(|a| *a * x).collect())
    }

    pub fn hadamard(&self, other: &Self) -> Self {
        assert_eq!(self.len(), other.len());
        FieldVector(self.0.iter().zip(&other.0).map(|(a, b)| *a * *b).collect())
    }

    pub fn inner_product(&self, other: &Self) -> Scalar {
        assert_eq!(self.len(), other.len());
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| *a * *b)
            .sum()
    }

    pub fn lo(&self) -> Self {
        FieldVector(self.0[..self.len() / 2].to_vec())
    }

    pub fn hi(&self) -> Self {
        FieldVector(self.0[self.len() / 2..].to_vec())
    }

    /// Elementwise inversion; panics on a zero element.
    pub fn invert(&self) -> Self {
        FieldVector(
            self.0
                .iter()
                .map(|a| a.inverse().expect("inverting zero scalar"))
                .collect(),
        )
    }
}

/// A vector of curve points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointVector(pub Vec<Point>);

impl PointVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Σ scalars[i] · points[i]`
    pub fn multiexp(&self, scalars: &FieldVector) -> Point {
        assert_eq!(self.len(), scalars.len());
        self.0
            .iter()
            .zip(&scalars.0)
            .fold(Point::zero(), |acc, (p, s)| acc + *p * *s)
    }

    pub fn add(&self, other: &Self) -> Self {
        assert_eq!(self.len(), other.len());
        PointVector(self.0.iter().zip(&other.0).map(|(a, b)| *a + *b).collect())
    }

    pub fn scale(&self, x: Scalar) -> Self {
        PointVector(self.0.iter().map(|p| *p * x).collect())
    }

    /// Elementwise scale: `points[i] · scalars[i]`.
    pub fn hadamard_scale(&self, scalars: &FieldVector) -> Self {
        assert_eq!(self.len(), scalars.len());
        PointVector(
            self.0
                .iter()
                .zip(&scalars.0)
                .map(|(p, s)| *p * *s)
                .collect(),
        )
    }

    pub fn lo(&self) -> Self {
        PointVector(self.0[..self.len() / 2].to_vec())
    }

    pub fn hi(&self) -> Self {
        PointVector(self.0[self.len() / 2..].to_vec())
    }

    /// One folding step of the inner-product argument's bases:
    /// `lo · a + hi · b`.
    pub fn fold(&self, a: Scalar, b: Scalar) -> Self {
        let half = self.len() / 2;
        PointVector(
            (0..half)
                .map(|i| self.0[i] * a + self.0[half + i] * b)
                .collect(),
        )
    }
}
