//! CKKS parameter sets.
//!
//! The coefficient modulus chain is written as a list of prime bit widths.
//! Every entry but the last is a data prime q_i; the last is the special
//! prime P, used only inside key switching:
//!
//!   [60, 40, 40, 60]  →  q_0 (60) · q_1 (40) · q_2 (40),  P (60)
//!
//! A fresh ciphertext lives at level L-1 (all L data primes). Each rescale
//! divides by the top data prime and drops it, so a chain with L data primes
//! supports L-1 rescales.
//!
//! Presets carry pre-computed primes (q ≡ 1 mod 2N, distinct, largest first
//! for each width); custom chains find them at runtime.

use crate::error::{HeError, Result};

/// Default scale bits: Δ = 2^40.
pub const DEFAULT_SCALE_BITS: u32 = 40;

/// Default scale factor Δ = 2^40.
pub const DEFAULT_SCALE: f64 = (1u64 << DEFAULT_SCALE_BITS) as f64;

/// Smallest ring dimension accepted for a context.
pub const MIN_POLY_DEGREE: usize = 1024;

/// Prime widths accepted in a chain. 60 bits keeps 2q and Shoup products in range.
pub const MIN_PRIME_BITS: u32 = 20;
pub const MAX_PRIME_BITS: u32 = 60;

/// A single RNS modulus with pre-computed Barrett constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modulus {
    /// The prime modulus q_i.
    pub value: u64,
    /// Bit width of this modulus.
    pub bits: u32,
    /// High word of floor(2^128 / q_i).
    pub barrett_hi: u64,
    /// Low word of floor(2^128 / q_i).
    pub barrett_lo: u64,
}

impl Modulus {
    /// Create a new modulus with pre-computed Barrett constant.
    pub const fn new(value: u64) -> Self {
        // For odd q, floor((2^128 - 1) / q) == floor(2^128 / q).
        let full = u128::MAX / (value as u128);
        Self {
            value,
            bits: 64 - value.leading_zeros(),
            barrett_hi: (full >> 64) as u64,
            barrett_lo: full as u64,
        }
    }
}

/// Complete CKKS parameter set.
#[derive(Debug, Clone)]
pub struct CkksParams {
    /// Polynomial degree N (ring dimension). Power of 2.
    pub poly_degree: usize,
    /// Number of SIMD slots = N/2.
    pub num_slots: usize,
    /// log2(N).
    pub log_n: u32,
    /// Data primes [q_0, ..., q_{L-1}].
    pub moduli: Vec<Modulus>,
    /// Special prime P for key switching.
    pub special: Modulus,
    /// Number of data primes L.
    pub num_limbs: usize,
    /// Scale Δ applied to fresh encodings.
    pub scale: f64,
}

impl CkksParams {
    /// Baseline profile: N=8192, chain [60, 40, 40, 60], Δ = 2^40, 4096 slots.
    ///
    /// Two rescales available. Used by the per-record (legacy) path.
    pub fn baseline() -> Self {
        // q ≡ 1 (mod 16384).
        Self::from_parts(
            8192,
            &[1152921504606830593, 1099511480321, 1099510890497],
            1152921504606748673,
            DEFAULT_SCALE,
        )
    }

    /// Optimized profile: N=16384, chain [60, 40, 40, 40, 40, 60], Δ = 2^40, 8192 slots.
    ///
    /// Four rescales available. Used by the columnar path.
    pub fn optimized() -> Self {
        // q ≡ 1 (mod 32768).
        Self::from_parts(
            16384,
            &[
                1152921504606748673,
                1099510054913,
                1099508121601,
                1099507695617,
                1099506515969,
            ],
            1152921504606683137,
            DEFAULT_SCALE,
        )
    }

    /// Build a parameter set from a degree, a chain of prime bit widths
    /// (last = special prime) and a scale. Primes are searched at runtime.
    pub fn custom(poly_degree: usize, chain_bits: &[u32], scale: f64) -> Result<Self> {
        check_degree(poly_degree)?;
        if chain_bits.len() < 2 {
            return Err(HeError::InvalidParameters(format!(
                "modulus chain needs at least one data prime and the special prime, got {} entries",
                chain_bits.len()
            )));
        }
        if let Some(&bits) = chain_bits
            .iter()
            .find(|&&b| !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(&b))
        {
            return Err(HeError::InvalidParameters(format!(
                "prime width {bits} outside {MIN_PRIME_BITS}..={MAX_PRIME_BITS} bits"
            )));
        }

        let primes = find_ntt_primes(chain_bits, 2 * poly_degree as u64)?;
        Self::from_primes(poly_degree, &primes, scale)
    }

    /// Rebuild a parameter set from explicit primes (last = special prime).
    ///
    /// Every prime is re-validated: this is the path taken when loading a
    /// serialized context.
    pub fn from_primes(poly_degree: usize, primes: &[u64], scale: f64) -> Result<Self> {
        check_degree(poly_degree)?;
        let (&special, data) = primes.split_last().ok_or_else(|| {
            HeError::InvalidParameters("empty modulus chain".to_string())
        })?;
        if data.is_empty() {
            return Err(HeError::InvalidParameters(
                "modulus chain has no data prime".to_string(),
            ));
        }

        let two_n = 2 * poly_degree as u64;
        for (i, &q) in primes.iter().enumerate() {
            let bits = 64 - q.leading_zeros();
            if !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(&bits) {
                return Err(HeError::InvalidParameters(format!(
                    "prime {i} ({q}) has {bits} bits"
                )));
            }
            if q % two_n != 1 || !is_prime_u64(q) {
                return Err(HeError::InvalidParameters(format!(
                    "prime {i} ({q}) is not an NTT-friendly prime for N={poly_degree}"
                )));
            }
            if primes[..i].contains(&q) {
                return Err(HeError::InvalidParameters(format!("prime {q} repeated")));
            }
        }

        if !scale.is_finite() || scale < 2.0 || scale >= data[0] as f64 {
            return Err(HeError::InvalidParameters(format!(
                "scale {scale} must be finite, at least 2 and below q_0"
            )));
        }

        Ok(Self::from_parts(poly_degree, data, special, scale))
    }

    fn from_parts(poly_degree: usize, data: &[u64], special: u64, scale: f64) -> Self {
        let moduli: Vec<Modulus> = data.iter().map(|&q| Modulus::new(q)).collect();
        Self {
            poly_degree,
            num_slots: poly_degree / 2,
            log_n: poly_degree.trailing_zeros(),
            num_limbs: moduli.len(),
            moduli,
            special: Modulus::new(special),
            scale,
        }
    }

    /// Highest level a ciphertext can sit at (number of rescales available).
    pub fn max_level(&self) -> usize {
        self.num_limbs - 1
    }

    /// Data primes followed by the special prime: the basis keys live in.
    pub fn key_moduli(&self) -> Vec<Modulus> {
        let mut all = self.moduli.clone();
        all.push(self.special);
        all
    }

    /// Bit widths of the full chain, special prime last.
    pub fn chain_bits(&self) -> Vec<u32> {
        self.key_moduli().iter().map(|m| m.bits).collect()
    }
}

fn check_degree(poly_degree: usize) -> Result<()> {
    if !poly_degree.is_power_of_two() || poly_degree < MIN_POLY_DEGREE {
        return Err(HeError::InvalidParameters(format!(
            "poly_degree {poly_degree} must be a power of two and at least {MIN_POLY_DEGREE}"
        )));
    }
    Ok(())
}

/// Find one distinct prime per width, each ≡ 1 (mod two_n).
///
/// Searches downward from the largest candidate of each width; repeated
/// widths continue below the primes already taken.
pub fn find_ntt_primes(chain_bits: &[u32], two_n: u64) -> Result<Vec<u64>> {
    let mut found: Vec<u64> = Vec::with_capacity(chain_bits.len());
    for &bits in chain_bits {
        let upper = (1u64 << bits) - 1;
        let lower = 1u64 << (bits - 1);

        let mut candidate = upper - (upper % two_n) + 1;
        if candidate > upper {
            candidate -= two_n;
        }

        let mut chosen = None;
        while candidate >= lower {
            if !found.contains(&candidate) && is_prime_u64(candidate) {
                chosen = Some(candidate);
                break;
            }
            match candidate.checked_sub(two_n) {
                Some(next) => candidate = next,
                None => break,
            }
        }

        match chosen {
            Some(q) => found.push(q),
            None => {
                return Err(HeError::InvalidParameters(format!(
                    "no {bits}-bit NTT-friendly prime left for 2N={two_n}"
                )))
            }
        }
    }
    Ok(found)
}

/// Deterministic Miller-Rabin for 64-bit integers.
///
/// The first twelve prime bases are sufficient for every n < 2^64.
pub fn is_prime_u64(n: u64) -> bool {
    const BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for &p in &BASES {
        if n % p == 0 {
            return n == p;
        }
    }

    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }

    let mul = |a: u64, b: u64| ((a as u128 * b as u128) % n as u128) as u64;
    let pow = |mut base: u64, mut exp: u64| {
        let mut acc = 1u64;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = mul(acc, base);
            }
            base = mul(base, base);
            exp >>= 1;
        }
        acc
    };

    'witness: for &a in &BASES {
        let mut x = pow(a, d);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul(x, x);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
