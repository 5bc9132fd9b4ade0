//! Number Theoretic Transform (NTT) for negacyclic polynomial arithmetic.
//!
//! All polynomial multiplications in CKKS use NTT:
//!   a · b = iNTT(NTT(a) ⊙ NTT(b))   in Z_q[X]/(X^N+1)
//!
//! The forward transform merges the ψ-twist into the butterflies
//! (Cooley-Tukey with ψ powers in bit-reversed order), so no separate
//! pre/post multiplication is needed. Output slot i holds
//!
//!   A[i] = a(ψ^{2·brv(i)+1})
//!
//! which is what lets Galois automorphisms act as index permutations
//! (see [`galois_permutation`]).
//!
//! Complexity: (N/2) · log₂(N) butterflies per limb.

use crate::rns::{
    bit_reverse, compute_twiddle_factors, find_primitive_root, mod_add, mod_inv, mod_mul_shoup,
    mod_sub, shoup_precompute, RnsPoly,
};

/// Pre-computed NTT tables for a specific (N, q) pair.
#[derive(Debug, Clone)]
pub struct NttTables {
    /// ψ^{brv(k)}.
    forward_twiddles: Vec<u64>,
    forward_shoup: Vec<u64>,
    /// ψ^{-brv(k)}.
    inverse_twiddles: Vec<u64>,
    inverse_shoup: Vec<u64>,
    /// N^{-1} mod q, applied at the end of the inverse transform.
    n_inv: u64,
    n_inv_shoup: u64,
    /// The modulus q.
    pub q: u64,
    /// log₂(N).
    pub log_n: u32,
    /// Polynomial degree N.
    pub n: usize,
}

impl NttTables {
    /// Create NTT tables for a given polynomial degree and modulus.
    pub fn new(n: usize, q: u64) -> Self {
        let log_n = n.trailing_zeros();
        assert_eq!(1 << log_n, n, "N must be a power of 2");

        let psi = find_primitive_root(n, q);
        let forward_twiddles = compute_twiddle_factors(n, psi, q);
        let inverse_twiddles = compute_twiddle_factors(n, mod_inv(psi, q), q);
        let forward_shoup = forward_twiddles.iter().map(|&w| shoup_precompute(w, q)).collect();
        let inverse_shoup = inverse_twiddles.iter().map(|&w| shoup_precompute(w, q)).collect();
        let n_inv = mod_inv(n as u64, q);

        Self {
            forward_twiddles,
            forward_shoup,
            inverse_twiddles,
            inverse_shoup,
            n_inv,
            n_inv_shoup: shoup_precompute(n_inv, q),
            q,
            log_n,
            n,
        }
    }
}

/// In-place forward negacyclic NTT (Cooley-Tukey, decimation-in-time).
///
/// Input in natural coefficient order, output in bit-reversed evaluation order.
pub fn ntt_forward(a: &mut [u64], tables: &NttTables) {
    let n = tables.n;
    let q = tables.q;
    debug_assert_eq!(a.len(), n);

    let mut t = n;
    let mut m = 1;
    while m < n {
        t >>= 1;
        for i in 0..m {
            let w = tables.forward_twiddles[m + i];
            let w_shoup = tables.forward_shoup[m + i];
            let j1 = 2 * i * t;
            for j in j1..j1 + t {
                let u = a[j];
                let v = mod_mul_shoup(a[j + t], w, w_shoup, q);
                a[j] = mod_add(u, v, q);
                a[j + t] = mod_sub(u, v, q);
            }
        }
        m <<= 1;
    }
}

/// In-place inverse negacyclic NTT (Gentleman-Sande, decimation-in-frequency).
///
/// Includes the 1/N normalization factor.
pub fn ntt_inverse(a: &mut [u64], tables: &NttTables) {
    let n = tables.n;
    let q = tables.q;
    debug_assert_eq!(a.len(), n);

    let mut t = 1;
    let mut m = n;
    while m > 1 {
        let h = m >> 1;
        let mut j1 = 0;
        for i in 0..h {
            let w = tables.inverse_twiddles[h + i];
            let w_shoup = tables.inverse_shoup[h + i];
            for j in j1..j1 + t {
                let u = a[j];
                let v = a[j + t];
                a[j] = mod_add(u, v, q);
                a[j + t] = mod_mul_shoup(mod_sub(u, v, q), w, w_shoup, q);
            }
            j1 += 2 * t;
        }
        t <<= 1;
        m = h;
    }

    for coeff in a.iter_mut() {
        *coeff = mod_mul_shoup(*coeff, tables.n_inv, tables.n_inv_shoup, q);
    }
}

/// Forward NTT on every limb; limb l uses `tables[l]`.
pub fn forward_limbs(poly: &mut RnsPoly, tables: &[NttTables]) {
    for (limb, table) in poly.limbs.iter_mut().zip(tables) {
        ntt_forward(limb, table);
    }
}

/// Inverse NTT on every limb; limb l uses `tables[l]`.
pub fn inverse_limbs(poly: &mut RnsPoly, tables: &[NttTables]) {
    for (limb, table) in poly.limbs.iter_mut().zip(tables) {
        ntt_inverse(limb, table);
    }
}

/// Index permutation realising the automorphism X → X^g on NTT-form data.
///
/// σ_g(a) evaluated at ψ^{2·brv(i)+1} equals a at ψ^{(2·brv(i)+1)·g}, so
/// out[i] = in[perm[i]] with brv(perm[i]) = ((2·brv(i)+1)·g mod 2N - 1) / 2.
/// The permutation does not depend on q.
pub fn galois_permutation(n: usize, galois_elt: u64) -> Vec<usize> {
    let log_n = n.trailing_zeros();
    let two_n = 2 * n as u64;
    (0..n)
        .map(|i| {
            let odd = 2 * bit_reverse(i as u32, log_n) as u64 + 1;
            let image = (odd * galois_elt) % two_n;
            bit_reverse(((image - 1) / 2) as u32, log_n) as usize
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CkksParams;
    use crate::rns::{mod_mul, mod_pow};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Schoolbook negacyclic product in Z_q[X]/(X^N+1).
    fn negacyclic_mul(a: &[u64], b: &[u64], q: u64) -> Vec<u64> {
        let n = a.len();
        let mut c = vec![0u64; n];
        for i in 0..n {
            for j in 0..n {
                let p = mod_mul(a[i], b[j], q);
                if i + j < n {
                    c[i + j] = mod_add(c[i + j], p, q);
                } else {
                    c[i + j - n] = mod_sub(c[i + j - n], p, q);
                }
            }
        }
        c
    }

    #[test]
    fn test_ntt_roundtrip() {
        let params = CkksParams::baseline();
        let mut rng = StdRng::seed_from_u64(42);
        for m in params.key_moduli() {
            let tables = NttTables::new(params.poly_degree, m.value);
            let original: Vec<u64> = (0..params.poly_degree)
                .map(|_| rng.gen_range(0..m.value))
                .collect();
            let mut a = original.clone();
            ntt_forward(&mut a, &tables);
            ntt_inverse(&mut a, &tables);
            assert_eq!(a, original, "NTT roundtrip failed for q={}", m.value);
        }
    }

    #[test]
    fn test_ntt_negacyclic_product() {
        let n = 64;
        let q = 1152921504606830593u64;
        let tables = NttTables::new(n, q);
        let mut rng = StdRng::seed_from_u64(3);
        let a: Vec<u64> = (0..n).map(|_| rng.gen_range(0..q)).collect();
        let b: Vec<u64> = (0..n).map(|_| rng.gen_range(0..q)).collect();

        let mut fa = a.clone();
        let mut fb = b.clone();
        ntt_forward(&mut fa, &tables);
        ntt_forward(&mut fb, &tables);
        let mut prod: Vec<u64> = fa.iter().zip(&fb).map(|(&x, &y)| mod_mul(x, y, q)).collect();
        ntt_inverse(&mut prod, &tables);

        assert_eq!(prod, negacyclic_mul(&a, &b, q));
    }

    #[test]
    fn test_ntt_evaluation_order() {
        // A[i] must equal a(ψ^{2·brv(i)+1}).
        let n = 16;
        let q = 97u64; // 97 ≡ 1 mod 32
        let tables = NttTables::new(n, q);
        let psi = find_primitive_root(n, q);
        let a: Vec<u64> = (0..n as u64).map(|i| (i * 7 + 3) % q).collect();
        let mut fa = a.clone();
        ntt_forward(&mut fa, &tables);

        for (i, &value) in fa.iter().enumerate() {
            let root = mod_pow(psi, 2 * bit_reverse(i as u32, 4) as u64 + 1, q);
            let mut eval = 0u64;
            let mut power = 1u64;
            for &c in &a {
                eval = mod_add(eval, mod_mul(c, power, q), q);
                power = mod_mul(power, root, q);
            }
            assert_eq!(value, eval, "NTT slot {i} is not the expected evaluation");
        }
    }

    #[test]
    fn test_galois_permutation_matches_automorphism() {
        let n = 32;
        let q = 1099511590913u64; // ≡ 1 mod 4096
        let tables = NttTables::new(n, q);
        let mut rng = StdRng::seed_from_u64(5);
        let a: Vec<u64> = (0..n).map(|_| rng.gen_range(0..q)).collect();

        for g in [5u64, 25, 2 * n as u64 - 1] {
            // σ_g(a)(X) = a(X^g), reduced mod X^N + 1.
            let mut sigma = vec![0u64; n];
            for (j, &c) in a.iter().enumerate() {
                let k = (j as u64 * g) % (2 * n as u64);
                if (k as usize) < n {
                    sigma[k as usize] = mod_add(sigma[k as usize], c, q);
                } else {
                    let idx = k as usize - n;
                    sigma[idx] = mod_sub(sigma[idx], c, q);
                }
            }
            ntt_forward(&mut sigma, &tables);

            let mut fa = a.clone();
            ntt_forward(&mut fa, &tables);
            let perm = galois_permutation(n, g);
            let permuted: Vec<u64> = perm.iter().map(|&j| fa[j]).collect();
            assert_eq!(permuted, sigma, "permutation mismatch for g={g}");
        }
    }
}
