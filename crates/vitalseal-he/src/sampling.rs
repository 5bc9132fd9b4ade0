//! Cryptographic sampling for CKKS.
//!
//! - Secret key and encryption randomness: ternary {-1, 0, 1}
//! - Error vectors: rounded Gaussian with σ = 3.19, clipped at 6σ
//! - Random polynomials: uniform in Z_q, expanded from a 32-byte seed

use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;

use crate::params::Modulus;
use crate::rns::RnsPoly;

/// Standard deviation for RLWE error distribution.
pub const ERROR_STD_DEV: f64 = 3.19;

/// Errors beyond this many standard deviations are resampled.
pub const ERROR_MAX_DEVIATIONS: f64 = 6.0;

/// Seed length for expandable uniform polynomials.
pub const SEED_BYTES: usize = 32;

/// Sample N ternary coefficients, each of -1, 0, 1 with probability 1/3.
pub fn sample_ternary<R: RngCore + CryptoRng>(rng: &mut R, n: usize) -> Vec<i64> {
    (0..n).map(|_| rng.gen_range(-1i64..=1)).collect()
}

/// Sample N rounded Gaussian coefficients.
pub fn sample_gaussian<R: RngCore + CryptoRng>(rng: &mut R, n: usize, sigma: f64) -> Vec<i64> {
    let bound = ERROR_MAX_DEVIATIONS * sigma;
    (0..n)
        .map(|_| loop {
            let z: f64 = rng.sample(StandardNormal);
            let x = z * sigma;
            if x.abs() <= bound {
                break x.round() as i64;
            }
        })
        .collect()
}

/// Draw a fresh seed for [`expand_uniform`].
pub fn sample_seed<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; SEED_BYTES] {
    let mut seed = [0u8; SEED_BYTES];
    rng.fill_bytes(&mut seed);
    seed
}

/// Deterministically expand a seed into a uniform polynomial, one limb per modulus.
///
/// Uniform values are uniform in either domain, so the result is used
/// directly as an NTT-form polynomial.
pub fn expand_uniform(seed: &[u8; SEED_BYTES], n: usize, moduli: &[Modulus]) -> RnsPoly {
    let mut rng = ChaCha20Rng::from_seed(*seed);
    RnsPoly {
        limbs: moduli
            .iter()
            .map(|m| (0..n).map(|_| rng.gen_range(0..m.value)).collect())
            .collect(),
        n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CkksParams;
    use rand::rngs::StdRng;

    #[test]
    fn test_ternary_distribution() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 10000;
        let samples = sample_ternary(&mut rng, n);

        let expected = n / 3;
        let tolerance = (n as f64 * 0.05) as usize;
        for v in [-1i64, 0, 1] {
            let count = samples.iter().filter(|&&x| x == v).count();
            assert!(
                (count as isize - expected as isize).unsigned_abs() < tolerance,
                "value {v}: count={count}, expected≈{expected}"
            );
        }
        assert!(samples.iter().all(|x| (-1..=1).contains(x)));
    }

    #[test]
    fn test_gaussian_distribution() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 10000;
        let sigma = ERROR_STD_DEV;
        let samples = sample_gaussian(&mut rng, n, sigma);

        let mean: f64 = samples.iter().map(|&x| x as f64).sum::<f64>() / n as f64;
        let variance: f64 =
            samples.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n as f64;
        let measured_sigma = variance.sqrt();

        assert!(mean.abs() < 0.2, "Gaussian mean too far from 0: {mean}");
        assert!(
            (measured_sigma - sigma).abs() < 0.3,
            "Gaussian sigma off: measured={measured_sigma}, expected={sigma}"
        );
        let bound = (ERROR_MAX_DEVIATIONS * sigma).round() as i64;
        assert!(samples.iter().all(|x| x.abs() <= bound));
    }

    #[test]
    fn test_expand_uniform_deterministic() {
        let params = CkksParams::baseline();
        let mut rng = StdRng::seed_from_u64(1);
        let seed = sample_seed(&mut rng);
        let a = expand_uniform(&seed, 256, &params.moduli);
        let b = expand_uniform(&seed, 256, &params.moduli);
        assert_eq!(a, b);
        for (l, m) in params.moduli.iter().enumerate() {
            assert!(a.limbs[l].iter().all(|&x| x < m.value));
        }

        let other = expand_uniform(&sample_seed(&mut rng), 256, &params.moduli);
        assert_ne!(a, other);
    }
}
