//! CKKS ciphertext structure.
//!
//! A ciphertext is a pair (c0, c1) of RNS polynomials in the NTT domain with
//! c0 + c1·s ≈ Δ·m. Its level is the number of data primes it still carries
//! minus one.

use crate::rns::RnsPoly;

/// A CKKS ciphertext: pair of RNS polynomials (c0, c1) in NTT domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Ciphertext {
    /// First component c0 (in NTT domain).
    pub c0: RnsPoly,
    /// Second component c1 (in NTT domain).
    pub c1: RnsPoly,
    /// Current scale factor.
    pub scale: f64,
}

impl Ciphertext {
    /// Remaining rescales: number of limbs minus one.
    pub fn level(&self) -> usize {
        self.c0.num_limbs().saturating_sub(1)
    }

    /// Polynomial degree N.
    pub fn poly_degree(&self) -> usize {
        self.c0.n
    }

    /// Drop limbs down to `level` without changing the encrypted value.
    pub fn drop_to_level(&mut self, level: usize) {
        self.c0.truncate(level + 1);
        self.c1.truncate(level + 1);
    }

    /// Copy of this ciphertext holding only the limbs up to `level`.
    pub fn at_level(&self, level: usize) -> Self {
        let keep = |poly: &RnsPoly| RnsPoly {
            limbs: poly.limbs.iter().take(level + 1).cloned().collect(),
            n: poly.n,
        };
        Self {
            c0: keep(&self.c0),
            c1: keep(&self.c1),
            scale: self.scale,
        }
    }
}
