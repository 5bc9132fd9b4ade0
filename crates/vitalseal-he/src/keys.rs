//! Key material: secret key, public key, and key-switching keys.
//!
//! Key-switching keys switch a component decryptable under s' to one
//! decryptable under s. They use one digit per data prime q_j and the special
//! prime P (hybrid key switching). For digit j, over the basis {q_0..q_{L-1}, P}:
//!
//!   b_j = -a_j·s + e_j + P·g_j·s'      a_j uniform (expanded from a seed)
//!
//! where g_j ≡ 1 (mod q_j) and ≡ 0 modulo every other prime, so P·g_j·s'
//! is (P mod q_j)·s' in limb j and zero elsewhere.
//!
//! - relinearization key: s' = s²
//! - Galois key for X → X^g: s' = σ_g(s)

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};

use crate::ntt::{forward_limbs, galois_permutation, NttTables};
use crate::params::{CkksParams, Modulus};
use crate::rns::{mod_add, mod_mul, RnsPoly};
use crate::sampling::{
    expand_uniform, sample_gaussian, sample_seed, sample_ternary, ERROR_STD_DEV, SEED_BYTES,
};

/// Generator of the rotation group: X → X^{5^r} rotates slots left by r.
pub const ROTATION_GENERATOR: u64 = 5;

/// Ternary secret key, kept both as raw coefficients and in NTT form over
/// the data primes followed by the special prime.
#[derive(Clone)]
pub struct SecretKey {
    coeffs: Vec<i8>,
    pub(crate) s_ntt: RnsPoly,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey").finish_non_exhaustive()
    }
}

impl SecretKey {
    /// Sample a fresh ternary secret.
    pub fn generate<R: RngCore + CryptoRng>(
        params: &CkksParams,
        tables: &[NttTables],
        rng: &mut R,
    ) -> Self {
        let coeffs = sample_ternary(rng, params.poly_degree)
            .into_iter()
            .map(|c| c as i8)
            .collect();
        Self::from_coeffs(coeffs, params, tables)
    }

    /// Rebuild from ternary coefficients (as stored on disk).
    pub fn from_coeffs(coeffs: Vec<i8>, params: &CkksParams, tables: &[NttTables]) -> Self {
        let signed: Vec<i64> = coeffs.iter().map(|&c| c as i64).collect();
        let mut s_ntt = RnsPoly::from_signed(&signed, &params.key_moduli());
        forward_limbs(&mut s_ntt, tables);
        Self { coeffs, s_ntt }
    }

    pub fn coeffs(&self) -> &[i8] {
        &self.coeffs
    }
}

/// Public encryption key (b, a) = (-a·s + e, a) over the data primes.
#[derive(Debug, Clone)]
pub struct PublicKey {
    pub seed: [u8; SEED_BYTES],
    pub a: RnsPoly,
    pub b: RnsPoly,
}

impl PublicKey {
    pub fn generate<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        params: &CkksParams,
        tables: &[NttTables],
        rng: &mut R,
    ) -> Self {
        let seed = sample_seed(rng);
        let a = expand_uniform(&seed, params.poly_degree, &params.moduli);
        let b = rlwe_body(&a, sk, &params.moduli, tables, rng);
        Self { seed, a, b }
    }

    /// Rebuild from the stored seed and body.
    pub fn from_seed(seed: [u8; SEED_BYTES], b: RnsPoly, params: &CkksParams) -> Self {
        let a = expand_uniform(&seed, params.poly_degree, &params.moduli);
        Self { seed, a, b }
    }
}

/// Key-switching key: one (b_j, a_j) pair per data prime, over data primes + P.
#[derive(Debug, Clone)]
pub struct KeySwitchKey {
    pub seeds: Vec<[u8; SEED_BYTES]>,
    pub a: Vec<RnsPoly>,
    pub b: Vec<RnsPoly>,
}

impl KeySwitchKey {
    /// Generate a key switching `target` (NTT form over data primes + P) to `sk`.
    pub fn generate<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        target: &RnsPoly,
        params: &CkksParams,
        tables: &[NttTables],
        rng: &mut R,
    ) -> Self {
        let key_moduli = params.key_moduli();
        let p = params.special.value;

        let mut seeds = Vec::with_capacity(params.num_limbs);
        let mut a_polys = Vec::with_capacity(params.num_limbs);
        let mut b_polys = Vec::with_capacity(params.num_limbs);
        for (j, m) in params.moduli.iter().enumerate() {
            let seed = sample_seed(rng);
            let a = expand_uniform(&seed, params.poly_degree, &key_moduli);
            let mut b = rlwe_body(&a, sk, &key_moduli, tables, rng);

            let q = m.value;
            let factor = p % q;
            for (x, &t) in b.limbs[j].iter_mut().zip(&target.limbs[j]) {
                *x = mod_add(*x, mod_mul(factor, t, q), q);
            }

            seeds.push(seed);
            a_polys.push(a);
            b_polys.push(b);
        }

        Self {
            seeds,
            a: a_polys,
            b: b_polys,
        }
    }

    /// Rebuild from stored seeds and bodies.
    pub fn from_seeds(seeds: Vec<[u8; SEED_BYTES]>, b: Vec<RnsPoly>, params: &CkksParams) -> Self {
        let key_moduli = params.key_moduli();
        let a = seeds
            .iter()
            .map(|seed| expand_uniform(seed, params.poly_degree, &key_moduli))
            .collect();
        Self { seeds, a, b }
    }

    /// Relinearization key: switches s² to s.
    pub fn relinearization<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        params: &CkksParams,
        tables: &[NttTables],
        rng: &mut R,
    ) -> Self {
        let s_squared = sk.s_ntt.hadamard_mul(&sk.s_ntt, &params.key_moduli());
        Self::generate(sk, &s_squared, params, tables, rng)
    }
}

/// Key for one automorphism X → X^g, with its NTT-domain permutation.
#[derive(Debug, Clone)]
pub struct GaloisKey {
    pub galois_elt: u64,
    pub permutation: Vec<usize>,
    pub key: KeySwitchKey,
}

impl GaloisKey {
    pub fn generate<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        galois_elt: u64,
        params: &CkksParams,
        tables: &[NttTables],
        rng: &mut R,
    ) -> Self {
        let permutation = galois_permutation(params.poly_degree, galois_elt);
        let s_rotated = sk.s_ntt.permute(&permutation);
        let key = KeySwitchKey::generate(sk, &s_rotated, params, tables, rng);
        Self {
            galois_elt,
            permutation,
            key,
        }
    }

    pub fn from_key(galois_elt: u64, key: KeySwitchKey, params: &CkksParams) -> Self {
        Self {
            galois_elt,
            permutation: galois_permutation(params.poly_degree, galois_elt),
            key,
        }
    }
}

/// Galois keys indexed by Galois element.
pub type GaloisKeys = BTreeMap<u64, GaloisKey>;

/// Galois element 5^step mod 2N for a left rotation by `step` slots.
pub fn galois_element(step: usize, poly_degree: usize) -> u64 {
    crate::rns::mod_pow(ROTATION_GENERATOR, step as u64, 2 * poly_degree as u64)
}

/// Rotation steps needed for slot summation: 1, 2, 4, ..., slots/2.
pub fn power_of_two_steps(num_slots: usize) -> Vec<usize> {
    std::iter::successors(Some(1usize), |&s| Some(s << 1))
        .take_while(|&s| s < num_slots)
        .collect()
}

/// RLWE body -a·s + e in NTT form over `moduli`.
fn rlwe_body<R: RngCore + CryptoRng>(
    a: &RnsPoly,
    sk: &SecretKey,
    moduli: &[Modulus],
    tables: &[NttTables],
    rng: &mut R,
) -> RnsPoly {
    let mut e = RnsPoly::from_signed(&sample_gaussian(rng, a.n, ERROR_STD_DEV), moduli);
    forward_limbs(&mut e, tables);
    e.sub(&a.hadamard_mul(&sk.s_ntt, moduli), moduli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntt::inverse_limbs;
    use crate::rns::crt_reconstruct_centered;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (CkksParams, Vec<NttTables>, SecretKey, StdRng) {
        let params = CkksParams::custom(1024, &[50, 40, 50], 2f64.powi(30)).unwrap();
        let tables: Vec<NttTables> = params
            .key_moduli()
            .iter()
            .map(|m| NttTables::new(params.poly_degree, m.value))
            .collect();
        let mut rng = StdRng::seed_from_u64(9);
        let sk = SecretKey::generate(&params, &tables, &mut rng);
        (params, tables, sk, rng)
    }

    #[test]
    fn test_public_key_is_small_under_secret() {
        // b + a·s = e must be small.
        let (params, tables, sk, mut rng) = setup();
        let pk = PublicKey::generate(&sk, &params, &tables, &mut rng);
        let mut e = pk.b.add(&pk.a.hadamard_mul(&sk.s_ntt, &params.moduli), &params.moduli);
        inverse_limbs(&mut e, &tables);
        let coeffs = crt_reconstruct_centered(&e, &params.moduli);
        let bound = 6.0 * ERROR_STD_DEV;
        assert!(coeffs.iter().all(|c| c.abs() <= bound.ceil()), "public key error too large");
    }

    #[test]
    fn test_seed_expansion_reproduces_key() {
        let (params, tables, sk, mut rng) = setup();
        let pk = PublicKey::generate(&sk, &params, &tables, &mut rng);
        let rebuilt = PublicKey::from_seed(pk.seed, pk.b.clone(), &params);
        assert_eq!(rebuilt.a, pk.a);

        let rlk = KeySwitchKey::relinearization(&sk, &params, &tables, &mut rng);
        assert_eq!(rlk.b.len(), params.num_limbs);
        let rebuilt = KeySwitchKey::from_seeds(rlk.seeds.clone(), rlk.b.clone(), &params);
        assert_eq!(rebuilt.a, rlk.a);
    }

    #[test]
    fn test_secret_from_coeffs_matches() {
        let (params, tables, sk, _) = setup();
        let again = SecretKey::from_coeffs(sk.coeffs().to_vec(), &params, &tables);
        assert_eq!(again.s_ntt, sk.s_ntt);
        assert!(sk.coeffs().iter().all(|c| (-1..=1).contains(c)));
    }

    #[test]
    fn test_rotation_steps() {
        assert_eq!(power_of_two_steps(8), vec![1, 2, 4]);
        assert_eq!(power_of_two_steps(1), Vec::<usize>::new());
        assert_eq!(galois_element(1, 1024), 5);
        assert_eq!(galois_element(2, 1024), 25);
        // 5 has order N/2 in Z_{2N}^*.
        assert_eq!(galois_element(512, 1024), 1);
    }
}
