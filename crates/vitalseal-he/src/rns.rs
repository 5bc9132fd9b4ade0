//! RNS (Residue Number System) modular arithmetic.
//!
//! Every CKKS operation decomposes into independent sub-operations on 64-bit
//! residues, one per prime. This module provides the scalar primitives, the
//! [`RnsPoly`] container, and CRT reconstruction back to signed integers.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

use crate::params::Modulus;

/// Modular addition: (a + b) mod q.
/// Assumes a, b < q < 2^63.
#[inline(always)]
pub fn mod_add(a: u64, b: u64, q: u64) -> u64 {
    let sum = a + b;
    if sum >= q {
        sum - q
    } else {
        sum
    }
}

/// Modular subtraction: (a - b) mod q.
/// Assumes a, b < q.
#[inline(always)]
pub fn mod_sub(a: u64, b: u64, q: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        q - b + a
    }
}

/// Modular multiplication: (a * b) mod q using 128-bit intermediate.
#[inline(always)]
pub fn mod_mul(a: u64, b: u64, q: u64) -> u64 {
    ((a as u128 * b as u128) % q as u128) as u64
}

/// Barrett reduction of a < q^2 to [0, q).
///
/// Estimates floor(a / q) as the top 128 bits of a · floor(2^128 / q); the
/// estimate is low by at most 2.
#[inline(always)]
pub fn barrett_reduce(a: u128, m: &Modulus) -> u64 {
    const LO: u128 = u64::MAX as u128;
    let a_hi = a >> 64;
    let a_lo = a & LO;
    let k_hi = m.barrett_hi as u128;
    let k_lo = m.barrett_lo as u128;

    let lo_lo = (a_lo * k_lo) >> 64;
    let lo_hi = a_lo * k_hi;
    let hi_lo = a_hi * k_lo;
    let mid = (lo_hi & LO) + (hi_lo & LO) + lo_lo;
    let quot = a_hi * k_hi + (lo_hi >> 64) + (hi_lo >> 64) + (mid >> 64);

    let q = m.value as u128;
    let mut r = a - quot * q;
    while r >= q {
        r -= q;
    }
    r as u64
}

/// Modular multiplication using Barrett reduction.
#[inline(always)]
pub fn mod_mul_barrett(a: u64, b: u64, m: &Modulus) -> u64 {
    barrett_reduce(a as u128 * b as u128, m)
}

/// Shoup companion of a fixed multiplicand w: floor(w · 2^64 / q).
#[inline]
pub fn shoup_precompute(w: u64, q: u64) -> u64 {
    (((w as u128) << 64) / q as u128) as u64
}

/// (a · w) mod q for a fixed w with pre-computed Shoup companion.
/// Requires q < 2^63.
#[inline(always)]
pub fn mod_mul_shoup(a: u64, w: u64, w_shoup: u64, q: u64) -> u64 {
    let quot = ((a as u128 * w_shoup as u128) >> 64) as u64;
    let r = a.wrapping_mul(w).wrapping_sub(quot.wrapping_mul(q));
    if r >= q {
        r - q
    } else {
        r
    }
}

/// Modular exponentiation: a^exp mod q.
pub fn mod_pow(mut base: u64, mut exp: u64, q: u64) -> u64 {
    let mut result: u64 = 1;
    base %= q;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_mul(result, base, q);
        }
        exp >>= 1;
        base = mod_mul(base, base, q);
    }
    result
}

/// Modular inverse via Fermat: a^{q-2} mod q. Requires q prime.
pub fn mod_inv(a: u64, q: u64) -> u64 {
    assert!(a % q != 0, "Cannot invert zero");
    mod_pow(a, q - 2, q)
}

/// Map a signed integer to its residue in [0, q).
#[inline]
pub fn reduce_i64(x: i64, q: u64) -> u64 {
    x.rem_euclid(q as i64) as u64
}

/// Residue mod q of the centered lift of x ∈ [0, p), i.e. of x or x - p.
#[inline]
pub fn reduce_centered(x: u64, p: u64, q: u64) -> u64 {
    if x > p / 2 {
        let r = (p - x) % q;
        if r == 0 {
            0
        } else {
            q - r
        }
    } else {
        x % q
    }
}

/// Find a primitive 2N-th root of unity modulo q.
///
/// ψ^{2N} ≡ 1 and ψ^N ≡ -1 (mod q). Requires q ≡ 1 (mod 2N).
pub fn find_primitive_root(n: usize, q: u64) -> u64 {
    let two_n = (2 * n) as u64;
    assert_eq!(
        q % two_n,
        1,
        "q={q} is not NTT-friendly: q mod 2N = {} (expected 1)",
        q % two_n
    );

    // A generator g of Z_q* gives ψ = g^((q-1)/2N).
    let exponent = (q - 1) / two_n;
    for g in 2..q {
        let psi = mod_pow(g, exponent, q);
        if mod_pow(psi, n as u64, q) == q - 1 {
            return psi;
        }
    }
    panic!("No primitive 2N-th root of unity found for q={q}, N={n}");
}

/// Powers of ψ in bit-reversed order: twiddles[k] = ψ^{brv(k)}.
pub fn compute_twiddle_factors(n: usize, psi: u64, q: u64) -> Vec<u64> {
    let log_n = n.trailing_zeros();
    let mut twiddles = vec![0u64; n];
    let mut power = 1u64;
    for i in 0..n {
        twiddles[bit_reverse(i as u32, log_n) as usize] = power;
        power = mod_mul(power, psi, q);
    }
    twiddles
}

/// Bit-reverse an integer of given bit width.
#[inline]
pub fn bit_reverse(mut x: u32, bits: u32) -> u32 {
    let mut result = 0u32;
    for _ in 0..bits {
        result = (result << 1) | (x & 1);
        x >>= 1;
    }
    result
}

/// An RNS polynomial: one coefficient (or evaluation) vector per prime.
///
/// The number of limbs is the ciphertext level plus one; operations index
/// `moduli[l]` for limb `l`, so a longer moduli slice is always accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RnsPoly {
    /// limbs[l][i] = coefficient i mod q_l.
    pub limbs: Vec<Vec<u64>>,
    /// Polynomial degree N.
    pub n: usize,
}

impl RnsPoly {
    /// Create a zero polynomial with L limbs of N coefficients each.
    pub fn zero(n: usize, num_limbs: usize) -> Self {
        Self {
            limbs: vec![vec![0u64; n]; num_limbs],
            n,
        }
    }

    /// Lift signed small coefficients (secret, error) into every limb.
    pub fn from_signed(coeffs: &[i64], moduli: &[Modulus]) -> Self {
        Self {
            limbs: moduli
                .iter()
                .map(|m| coeffs.iter().map(|&c| reduce_i64(c, m.value)).collect())
                .collect(),
            n: coeffs.len(),
        }
    }

    pub fn num_limbs(&self) -> usize {
        self.limbs.len()
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Self, moduli: &[Modulus]) -> Self {
        let mut result = self.clone();
        result.add_assign(other, moduli);
        result
    }

    /// In-place element-wise addition over the limbs of `self`.
    pub fn add_assign(&mut self, other: &Self, moduli: &[Modulus]) {
        debug_assert_eq!(self.n, other.n);
        for (l, limb) in self.limbs.iter_mut().enumerate() {
            let q = moduli[l].value;
            for (x, &y) in limb.iter_mut().zip(&other.limbs[l]) {
                *x = mod_add(*x, y, q);
            }
        }
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Self, moduli: &[Modulus]) -> Self {
        debug_assert_eq!(self.n, other.n);
        let mut result = self.clone();
        for (l, limb) in result.limbs.iter_mut().enumerate() {
            let q = moduli[l].value;
            for (x, &y) in limb.iter_mut().zip(&other.limbs[l]) {
                *x = mod_sub(*x, y, q);
            }
        }
        result
    }

    /// Element-wise (Hadamard) product, used on NTT-domain operands.
    pub fn hadamard_mul(&self, other: &Self, moduli: &[Modulus]) -> Self {
        debug_assert_eq!(self.n, other.n);
        let mut result = self.clone();
        for (l, limb) in result.limbs.iter_mut().enumerate() {
            let m = &moduli[l];
            for (x, &y) in limb.iter_mut().zip(&other.limbs[l]) {
                *x = mod_mul_barrett(*x, y, m);
            }
        }
        result
    }

    /// self += a ⊙ b on the limbs of `self`.
    pub fn mul_acc(&mut self, a: &Self, b: &Self, moduli: &[Modulus]) {
        for (l, limb) in self.limbs.iter_mut().enumerate() {
            let m = &moduli[l];
            for ((acc, &x), &y) in limb.iter_mut().zip(&a.limbs[l]).zip(&b.limbs[l]) {
                *acc = mod_add(*acc, mod_mul_barrett(x, y, m), m.value);
            }
        }
    }

    /// Multiply limb l by the residue `scalars[l]`.
    pub fn mul_scalar_assign(&mut self, scalars: &[u64], moduli: &[Modulus]) {
        for (l, limb) in self.limbs.iter_mut().enumerate() {
            let q = moduli[l].value;
            let w = scalars[l];
            let w_shoup = shoup_precompute(w, q);
            for x in limb.iter_mut() {
                *x = mod_mul_shoup(*x, w, w_shoup, q);
            }
        }
    }

    /// Negate all coefficients: result[i] = -self[i] mod q.
    pub fn negate(&self, moduli: &[Modulus]) -> Self {
        let mut result = self.clone();
        for (l, limb) in result.limbs.iter_mut().enumerate() {
            let q = moduli[l].value;
            for x in limb.iter_mut() {
                if *x != 0 {
                    *x = q - *x;
                }
            }
        }
        result
    }

    /// Apply an index permutation to every limb: out[i] = self[perm[i]].
    pub fn permute(&self, perm: &[usize]) -> Self {
        Self {
            limbs: self
                .limbs
                .iter()
                .map(|limb| perm.iter().map(|&j| limb[j]).collect())
                .collect(),
            n: self.n,
        }
    }

    /// Keep only the first `num_limbs` limbs.
    pub fn truncate(&mut self, num_limbs: usize) {
        self.limbs.truncate(num_limbs);
    }
}

/// CRT-reconstruct every coefficient of a coefficient-domain polynomial to
/// its centered integer value in (-Q/2, Q/2], returned as f64.
///
/// Q is the product of the first `poly.num_limbs()` moduli.
pub fn crt_reconstruct_centered(poly: &RnsPoly, moduli: &[Modulus]) -> Vec<f64> {
    let k = poly.num_limbs();
    if k == 1 {
        let q = moduli[0].value;
        return poly.limbs[0]
            .iter()
            .map(|&c| {
                if c > q / 2 {
                    -((q - c) as f64)
                } else {
                    c as f64
                }
            })
            .collect();
    }

    // x = Σ_i [x_i · (Q/q_i)^{-1}]_{q_i} · (Q/q_i)  mod Q
    let big_q = moduli[..k]
        .iter()
        .fold(BigUint::one(), |acc, m| acc * m.value);
    let half_q = &big_q >> 1u32;
    let basis: Vec<(BigUint, u64)> = moduli[..k]
        .iter()
        .map(|m| {
            let q_hat = &big_q / m.value;
            let q_hat_mod = (&q_hat % m.value).to_u64().unwrap_or(0);
            (q_hat, mod_inv(q_hat_mod, m.value))
        })
        .collect();

    (0..poly.n)
        .map(|i| {
            let mut acc = BigUint::zero();
            for (l, (q_hat, q_hat_inv)) in basis.iter().enumerate() {
                let q = moduli[l].value;
                acc += q_hat * mod_mul(poly.limbs[l][i], *q_hat_inv, q);
            }
            acc %= &big_q;
            if acc > half_q {
                -(&big_q - acc).to_f64().unwrap_or(f64::INFINITY)
            } else {
                acc.to_f64().unwrap_or(f64::INFINITY)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CkksParams;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_mod_add() {
        let q = 17u64;
        assert_eq!(mod_add(5, 7, q), 12);
        assert_eq!(mod_add(10, 10, q), 3);
        assert_eq!(mod_add(16, 1, q), 0);
    }

    #[test]
    fn test_mod_sub() {
        let q = 17u64;
        assert_eq!(mod_sub(10, 3, q), 7);
        assert_eq!(mod_sub(3, 10, q), 10);
        assert_eq!(mod_sub(0, 0, q), 0);
    }

    #[test]
    fn test_mod_inv() {
        let q = 17u64;
        for a in 1..q {
            let inv = mod_inv(a, q);
            assert_eq!(mod_mul(a, inv, q), 1, "Inverse of {a} mod {q} failed");
        }
    }

    #[test]
    fn test_barrett_matches_naive() {
        let mut rng = StdRng::seed_from_u64(7);
        for m in CkksParams::optimized().key_moduli() {
            for _ in 0..10_000 {
                let a = rng.gen_range(0..m.value);
                let b = rng.gen_range(0..m.value);
                assert_eq!(
                    mod_mul_barrett(a, b, &m),
                    mod_mul(a, b, m.value),
                    "Barrett mismatch for {a} * {b} mod {}",
                    m.value
                );
            }
            let top = m.value - 1;
            assert_eq!(mod_mul_barrett(top, top, &m), 1);
        }
    }

    #[test]
    fn test_shoup_matches_naive() {
        let mut rng = StdRng::seed_from_u64(11);
        for m in CkksParams::baseline().key_moduli() {
            let q = m.value;
            for _ in 0..1000 {
                let w = rng.gen_range(0..q);
                let ws = shoup_precompute(w, q);
                let a = rng.gen_range(0..q);
                assert_eq!(mod_mul_shoup(a, w, ws, q), mod_mul(a, w, q));
            }
        }
    }

    #[test]
    fn test_reduce_centered() {
        let p = 101u64;
        let q = 17u64;
        assert_eq!(reduce_centered(3, p, q), 3);
        // 100 ≡ -1 (mod 101) → -1 mod 17 = 16
        assert_eq!(reduce_centered(100, p, q), 16);
        // 67 ≡ -34 (mod 101) → -34 mod 17 = 0
        assert_eq!(reduce_centered(67, p, q), 0);
        assert_eq!(reduce_i64(-1, q), 16);
        assert_eq!(reduce_i64(-34, q), 0);
    }

    #[test]
    fn test_bit_reverse() {
        assert_eq!(bit_reverse(0b0001, 4), 0b1000);
        assert_eq!(bit_reverse(0b0110, 4), 0b0110);
        assert_eq!(bit_reverse(0b1010, 4), 0b0101);
    }

    #[test]
    fn test_primitive_root() {
        let (n, q) = (4, 17u64);
        let psi = find_primitive_root(n, q);
        assert_eq!(mod_pow(psi, 8, q), 1);
        assert_eq!(mod_pow(psi, 4, q), q - 1);
    }

    #[test]
    fn test_crt_reconstruct_signed_values() {
        let moduli = &CkksParams::optimized().moduli[..3];
        let values: Vec<i64> = vec![0, 1, -1, 1 << 62, -(1 << 62) + 5, 123_456_789];
        let poly = RnsPoly::from_signed(&values, moduli);
        let back = crt_reconstruct_centered(&poly, moduli);
        for (v, b) in values.iter().zip(&back) {
            assert!((*v as f64 - b).abs() <= 1.0, "expected {v}, got {b}");
        }
    }

    #[test]
    fn test_crt_reconstruct_beyond_first_prime() {
        // 2^70 does not fit q_0 alone.
        let moduli = &CkksParams::baseline().moduli[..2];
        let mut poly = RnsPoly::zero(1, 2);
        let target: u128 = 1 << 70;
        for l in 0..2 {
            poly.limbs[l][0] = (target % moduli[l].value as u128) as u64;
        }
        let back = crt_reconstruct_centered(&poly, moduli);
        assert_eq!(back[0], 2f64.powi(70));
    }

    #[test]
    fn test_rns_poly_add_and_negate() {
        let params = CkksParams::baseline();
        let moduli = &params.moduli[..2];
        let mut a = RnsPoly::zero(4, 2);
        let mut b = RnsPoly::zero(4, 2);
        a.limbs[0] = vec![1, 2, 3, 4];
        b.limbs[0] = vec![5, 6, 7, 8];
        a.limbs[1] = vec![10, 20, 30, 40];
        b.limbs[1] = vec![50, 60, 70, 80];

        let c = a.add(&b, moduli);
        assert_eq!(c.limbs[0], vec![6, 8, 10, 12]);
        assert_eq!(c.limbs[1], vec![60, 80, 100, 120]);

        let zero = a.add(&a.negate(moduli), moduli);
        assert_eq!(zero, RnsPoly::zero(4, 2));
    }
}
