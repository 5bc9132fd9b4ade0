//! CKKS encode/decode via the canonical embedding.
//!
//! Encode: z ∈ R^{N/2} → m(X) = round(Δ · σ^{-1}(z)) ∈ R_q
//! Decode: m(X) ∈ R_q → z = σ(m) / Δ ∈ R^{N/2}
//!
//! Slot k is the evaluation at ζ^{5^k mod 2N}, ζ = e^{πi/N}. With this order
//! the automorphism X → X^{5^r} rotates the slot vector left by r, which is
//! what slot summation relies on. The conjugate root ζ^{-5^k} receives the
//! same (real) value, so the encoded polynomial has real coefficients.

use std::f64::consts::PI;

use crate::error::{HeError, Result};
use crate::params::{CkksParams, Modulus};
use crate::rns::{crt_reconstruct_centered, reduce_i64, RnsPoly};

/// Largest |coefficient · Δ| accepted by the encoder.
const MAX_SCALED_COEFF: f64 = (1u64 << 62) as f64;

/// Pre-computed tables for O(N log N) FFT-based canonical embedding.
///
/// The canonical embedding evaluates m(X) at ζ^{2j+1} for j=0..N-1.
/// This is a "twisted DFT":
///   m(ζ^{2j+1}) = IDFT_N( m[t] · ζ^t )[j] · N
#[derive(Debug, Clone)]
struct FftTables {
    n: usize,
    /// Twist factors: twist_re[j] = cos(πj/N), twist_im[j] = sin(πj/N)
    twist_re: Vec<f64>,
    twist_im: Vec<f64>,
    /// Bit-reversal permutation table for size N.
    bit_rev: Vec<usize>,
    /// Per-stage twiddles: twiddle_re[s][k] = cos(-2πk/2^{s+1})
    twiddle_re: Vec<Vec<f64>>,
    twiddle_im: Vec<Vec<f64>>,
}

impl FftTables {
    fn new(n: usize) -> Self {
        let log_n = n.trailing_zeros() as usize;

        let (twist_re, twist_im) = (0..n)
            .map(|j| {
                let angle = PI * j as f64 / n as f64;
                (angle.cos(), angle.sin())
            })
            .unzip();

        let bit_rev = (0..n)
            .map(|i| crate::rns::bit_reverse(i as u32, log_n as u32) as usize)
            .collect();

        let mut twiddle_re = Vec::with_capacity(log_n);
        let mut twiddle_im = Vec::with_capacity(log_n);
        for s in 0..log_n {
            let half_len = 1usize << s;
            let (tre, tim) = (0..half_len)
                .map(|k| {
                    let angle = -PI * k as f64 / half_len as f64;
                    (angle.cos(), angle.sin())
                })
                .unzip();
            twiddle_re.push(tre);
            twiddle_im.push(tim);
        }

        Self { n, twist_re, twist_im, bit_rev, twiddle_re, twiddle_im }
    }

    /// In-place complex FFT (Cooley-Tukey radix-2 DIT), forward sign e^{-2πi/N}.
    fn fft(&self, re: &mut [f64], im: &mut [f64]) {
        let n = self.n;
        debug_assert_eq!(re.len(), n);
        debug_assert_eq!(im.len(), n);

        for i in 0..n {
            let j = self.bit_rev[i];
            if i < j {
                re.swap(i, j);
                im.swap(i, j);
            }
        }

        for (s, (tw_re, tw_im)) in self.twiddle_re.iter().zip(&self.twiddle_im).enumerate() {
            let half_len = 1 << s;
            let full_len = half_len << 1;
            for group_start in (0..n).step_by(full_len) {
                for k in 0..half_len {
                    let (w_re, w_im) = (tw_re[k], tw_im[k]);
                    let i0 = group_start + k;
                    let i1 = i0 + half_len;

                    let v_re = w_re * re[i1] - w_im * im[i1];
                    let v_im = w_re * im[i1] + w_im * re[i1];

                    let (u_re, u_im) = (re[i0], im[i0]);
                    re[i0] = u_re + v_re;
                    im[i0] = u_im + v_im;
                    re[i1] = u_re - v_re;
                    im[i1] = u_im - v_im;
                }
            }
        }
    }
}

/// CKKS encoder/decoder for a given parameter set.
#[derive(Debug, Clone)]
pub struct CkksEncoder {
    /// Polynomial degree N.
    n: usize,
    /// Number of SIMD slots = N/2.
    num_slots: usize,
    fft: FftTables,
    /// FFT index of slot k: (5^k mod 2N - 1) / 2.
    slot_index: Vec<usize>,
}

impl CkksEncoder {
    /// Create a new encoder for the given parameter set.
    pub fn new(params: &CkksParams) -> Self {
        let n = params.poly_degree;
        let num_slots = params.num_slots;
        let two_n = 2 * n;

        let mut slot_index = Vec::with_capacity(num_slots);
        let mut power = 1usize;
        for _ in 0..num_slots {
            slot_index.push((power - 1) / 2);
            power = (power * 5) % two_n;
        }

        Self {
            n,
            num_slots,
            fft: FftTables::new(n),
            slot_index,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Encode a real vector at the given scale into a coefficient-domain RNS
    /// polynomial with one limb per entry of `moduli`.
    ///
    /// Shorter vectors are zero-padded; longer ones are rejected.
    pub fn encode(&self, z: &[f64], scale: f64, moduli: &[Modulus]) -> Result<RnsPoly> {
        if z.len() > self.num_slots {
            return Err(HeError::CapacityExceeded {
                len: z.len(),
                capacity: self.num_slots,
            });
        }
        if let Some(pos) = z.iter().position(|v| !v.is_finite()) {
            return Err(HeError::NonFiniteInput(pos));
        }

        let mut z_full = vec![0.0f64; self.num_slots];
        z_full[..z.len()].copy_from_slice(z);
        let coeffs_f64 = self.inverse_canonical_embedding(&z_full);

        let mut rounded = Vec::with_capacity(self.n);
        for &c in &coeffs_f64 {
            let scaled = (c * scale).round();
            if scaled.abs() >= MAX_SCALED_COEFF {
                return Err(HeError::EncodingOverflow(scaled));
            }
            rounded.push(scaled as i64);
        }

        let mut result = RnsPoly::zero(self.n, moduli.len());
        for (limb, m) in result.limbs.iter_mut().zip(moduli) {
            for (dst, &c) in limb.iter_mut().zip(&rounded) {
                *dst = reduce_i64(c, m.value);
            }
        }
        Ok(result)
    }

    /// Decode a coefficient-domain RNS polynomial at the given scale.
    ///
    /// Coefficients are CRT-reconstructed over all limbs present, so values
    /// larger than the first prime decode correctly.
    pub fn decode(&self, poly: &RnsPoly, moduli: &[Modulus], scale: f64) -> Vec<f64> {
        let coeffs: Vec<f64> = crt_reconstruct_centered(poly, moduli)
            .into_iter()
            .map(|c| c / scale)
            .collect();
        self.decode_coefficients(&coeffs)
    }

    /// Decode from real coefficients already divided by the scale.
    pub fn decode_coefficients(&self, coeffs: &[f64]) -> Vec<f64> {
        self.canonical_embedding(coeffs)
    }

    /// σ^{-1}(z): slot values → real polynomial coefficients.
    ///
    /// With a[t] = m[t]·ζ^t, the evaluations are N·IDFT(a), so
    /// a = DFT(z̃)/N and m[t] = Re(a[t]·ζ^{-t}).
    fn inverse_canonical_embedding(&self, z: &[f64]) -> Vec<f64> {
        let n = self.n;
        debug_assert_eq!(z.len(), self.num_slots);

        // z̃ at ζ^{5^k} and at its conjugate ζ^{-5^k}.
        let mut z_re = vec![0.0f64; n];
        let mut z_im = vec![0.0f64; n];
        for (k, &j) in self.slot_index.iter().enumerate() {
            z_re[j] = z[k];
            z_re[n - 1 - j] = z[k];
        }

        self.fft.fft(&mut z_re, &mut z_im);

        // Re((a_re + i·a_im)(cos - i·sin)) = a_re·cos + a_im·sin
        let inv_n = 1.0 / n as f64;
        (0..n)
            .map(|t| (z_re[t] * self.fft.twist_re[t] + z_im[t] * self.fft.twist_im[t]) * inv_n)
            .collect()
    }

    /// σ(m): real polynomial coefficients → slot values.
    ///
    /// FFT(conj(a))[j] = conj(m(ζ^{2j+1})); the real part is read at each
    /// slot's FFT index.
    fn canonical_embedding(&self, coeffs: &[f64]) -> Vec<f64> {
        let n = self.n;
        debug_assert_eq!(coeffs.len(), n);

        let mut b_re: Vec<f64> = (0..n).map(|t| coeffs[t] * self.fft.twist_re[t]).collect();
        let mut b_im: Vec<f64> = (0..n).map(|t| -coeffs[t] * self.fft.twist_im[t]).collect();

        self.fft.fft(&mut b_re, &mut b_im);

        self.slot_index.iter().map(|&j| b_re[j]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DEFAULT_SCALE;

    fn encoder() -> (CkksParams, CkksEncoder) {
        let params = CkksParams::baseline();
        let encoder = CkksEncoder::new(&params);
        (params, encoder)
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (params, encoder) = encoder();
        let z: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let poly = encoder.encode(&z, DEFAULT_SCALE, &params.moduli).unwrap();
        let decoded = encoder.decode(&poly, &params.moduli, DEFAULT_SCALE);

        for i in 0..z.len() {
            let err = (decoded[i] - z[i]).abs();
            assert!(err < 1e-6, "Slot {i}: decoded={}, expected={}, error={err}", decoded[i], z[i]);
        }
        for (i, v) in decoded.iter().enumerate().skip(z.len()) {
            assert!(v.abs() < 1e-6, "Padding slot {i} decoded to {v}");
        }
    }

    #[test]
    fn test_encode_large_values() {
        let (params, encoder) = encoder();
        let z: Vec<f64> = (0..50).map(|i| (i as f64 - 25.0) * 100.0).collect();
        let poly = encoder.encode(&z, DEFAULT_SCALE, &params.moduli).unwrap();
        let decoded = encoder.decode(&poly, &params.moduli, DEFAULT_SCALE);
        for i in 0..z.len() {
            assert!((decoded[i] - z[i]).abs() < 1e-5, "Slot {i}: {} vs {}", decoded[i], z[i]);
        }
    }

    #[test]
    fn test_constant_vector_is_constant_polynomial() {
        let (_, encoder) = encoder();
        let z = vec![3.5f64; encoder.num_slots()];
        let coeffs = encoder.inverse_canonical_embedding(&z);
        assert!((coeffs[0] - 3.5).abs() < 1e-9);
        assert!(coeffs[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_automorphism_rotates_slots() {
        let (params, encoder) = encoder();
        let n = params.poly_degree;
        let z: Vec<f64> = (0..encoder.num_slots()).map(|k| (k % 97) as f64).collect();
        let coeffs = encoder.inverse_canonical_embedding(&z);

        // m(X) → m(X^5) on real coefficients.
        let g = 5usize;
        let mut rotated = vec![0.0f64; n];
        for (j, &c) in coeffs.iter().enumerate() {
            let k = (j * g) % (2 * n);
            if k < n {
                rotated[k] += c;
            } else {
                rotated[k - n] -= c;
            }
        }

        let out = encoder.decode_coefficients(&rotated);
        let slots = encoder.num_slots();
        for k in 0..slots {
            let expected = z[(k + 1) % slots];
            assert!((out[k] - expected).abs() < 1e-6, "slot {k}: {} vs {expected}", out[k]);
        }
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        let (params, encoder) = encoder();
        let too_long = vec![1.0; encoder.num_slots() + 1];
        assert!(matches!(
            encoder.encode(&too_long, DEFAULT_SCALE, &params.moduli),
            Err(HeError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            encoder.encode(&[1.0, f64::NAN], DEFAULT_SCALE, &params.moduli),
            Err(HeError::NonFiniteInput(1))
        ));
        assert!(matches!(
            encoder.encode(&[1e12], DEFAULT_SCALE, &params.moduli),
            Err(HeError::EncodingOverflow(_))
        ));
    }
}
