//! Homomorphic evaluation: add, sub, multiply, rescale, scalar multiply,
//! rotation and slot summation.
//!
//! Ciphertexts stay in the NTT domain between operations. Binary operations
//! first bring both operands to the lower of their two levels.

use crate::ciphertext::Ciphertext;
use crate::context::HeContext;
use crate::error::{HeError, Result};
use crate::keys::{galois_element, power_of_two_steps, KeySwitchKey};
use crate::ntt::{inverse_limbs, ntt_forward, ntt_inverse, NttTables};
use crate::params::Modulus;
use crate::rns::{
    mod_add, mod_inv, mod_mul_barrett, mod_mul_shoup, mod_sub, reduce_centered, reduce_i64,
    shoup_precompute, RnsPoly,
};

/// Relative tolerance under which two scales are treated as equal.
pub const SCALE_TOLERANCE: f64 = 1e-6;

/// Integer multipliers must stay below this so they reduce cleanly mod every prime.
const MAX_SCALAR_MULTIPLIER: f64 = 4611686018427387904.0; // 2^62

impl HeContext {
    /// Slot-wise addition.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        check_scales(a.scale, b.scale)?;
        let (a, b) = at_common_level(a, b);
        let moduli = &self.params.moduli;
        Ok(Ciphertext {
            c0: a.c0.add(&b.c0, moduli),
            c1: a.c1.add(&b.c1, moduli),
            scale: a.scale,
        })
    }

    /// Slot-wise subtraction a - b.
    pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        check_scales(a.scale, b.scale)?;
        let (a, b) = at_common_level(a, b);
        let moduli = &self.params.moduli;
        Ok(Ciphertext {
            c0: a.c0.sub(&b.c0, moduli),
            c1: a.c1.sub(&b.c1, moduli),
            scale: a.scale,
        })
    }

    /// Slot-wise product, relinearized back to two components.
    ///
    /// The result carries scale a.scale · b.scale; call [`HeContext::rescale`]
    /// before further multiplications.
    pub fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let (a, b) = at_common_level(a, b);
        let moduli = &self.params.moduli;

        let d0 = a.c0.hadamard_mul(&b.c0, moduli);
        let mut d1 = a.c0.hadamard_mul(&b.c1, moduli);
        d1.mul_acc(&a.c1, &b.c0, moduli);
        let mut d2 = a.c1.hadamard_mul(&b.c1, moduli);

        inverse_limbs(&mut d2, &self.ntt);
        let (r0, r1) = self.switch_key(&d2, &self.relin_key);

        let scale = a.scale * b.scale;
        if !scale.is_finite() {
            return Err(HeError::EncodingOverflow(scale));
        }
        Ok(Ciphertext {
            c0: d0.add(&r0, moduli),
            c1: d1.add(&r1, moduli),
            scale,
        })
    }

    /// Slot-wise square.
    pub fn square(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        self.multiply(ct, ct)
    }

    /// Divide by the last prime of the current level and drop it.
    pub fn rescale(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        let level = ct.level();
        if level == 0 {
            return Err(HeError::InsufficientDepth {
                required: 1,
                available: 0,
            });
        }
        let moduli = &self.params.moduli[..=level];
        let tables: Vec<&NttTables> = self.ntt[..=level].iter().collect();

        let mut out = ct.clone();
        divide_round_last(&mut out.c0, moduli, &tables);
        divide_round_last(&mut out.c1, moduli, &tables);
        out.scale = ct.scale / moduli[level].value as f64;
        Ok(out)
    }

    /// Multiply every slot by a real `value`, consuming one level.
    ///
    /// The value is applied as the integer K = round(value · target · q / scale)
    /// followed by a rescale by q, so the result ends at `target_scale` up to
    /// the rounding of K. Passing the scale of another ciphertext as the
    /// target makes the two directly addable.
    pub fn multiply_scalar(
        &self,
        ct: &Ciphertext,
        value: f64,
        target_scale: f64,
    ) -> Result<Ciphertext> {
        if !value.is_finite() || value == 0.0 {
            return Err(HeError::InvalidParameters(format!(
                "scalar {value} cannot be applied"
            )));
        }
        let level = ct.level();
        if level == 0 {
            return Err(HeError::InsufficientDepth {
                required: 1,
                available: 0,
            });
        }
        let q = self.params.moduli[level].value as f64;
        let multiplier = (value * target_scale * q / ct.scale).round();
        if multiplier == 0.0 || !(multiplier.abs() < MAX_SCALAR_MULTIPLIER) {
            return Err(HeError::EncodingOverflow(multiplier));
        }

        let k = multiplier as i64;
        let moduli = &self.params.moduli[..=level];
        let residues: Vec<u64> = moduli.iter().map(|m| reduce_i64(k, m.value)).collect();
        let mut out = ct.clone();
        out.c0.mul_scalar_assign(&residues, moduli);
        out.c1.mul_scalar_assign(&residues, moduli);
        out.scale = ct.scale * multiplier / value;
        self.rescale(&out)
    }

    /// Rotate slots left by `step` (cyclic over `slot_count()`).
    pub fn rotate(&self, ct: &Ciphertext, step: usize) -> Result<Ciphertext> {
        let step = step % self.params.num_slots;
        if step == 0 {
            return Ok(ct.clone());
        }
        let elt = galois_element(step, self.params.poly_degree);
        let key = self
            .galois_keys
            .get(&elt)
            .ok_or(HeError::MissingGaloisKey(step))?;

        let c0 = ct.c0.permute(&key.permutation);
        let mut c1 = ct.c1.permute(&key.permutation);
        inverse_limbs(&mut c1, &self.ntt);
        let (r0, r1) = self.switch_key(&c1, &key.key);

        Ok(Ciphertext {
            c0: c0.add(&r0, &self.params.moduli),
            c1: r1,
            scale: ct.scale,
        })
    }

    /// Sum all slots; every slot of the result holds the total.
    pub fn slot_sum(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        let mut acc = ct.clone();
        for step in power_of_two_steps(self.params.num_slots) {
            let rotated = self.rotate(&acc, step)?;
            acc = self.add(&acc, &rotated)?;
        }
        Ok(acc)
    }

    /// Hybrid key switching of a coefficient-domain component `d`.
    ///
    /// Returns (r0, r1) in NTT form at the level of `d` with
    /// r0 + r1·s ≈ d·s', where s' is the key the switching key was made for.
    fn switch_key(&self, d: &RnsPoly, key: &KeySwitchKey) -> (RnsPoly, RnsPoly) {
        let n = d.n;
        let k = d.num_limbs();
        let special = self.params.num_limbs;
        // Accumulator limb t lives modulo key_moduli[targets[t]].
        let targets: Vec<usize> = (0..k).chain(std::iter::once(special)).collect();

        let mut acc0 = RnsPoly::zero(n, k + 1);
        let mut acc1 = RnsPoly::zero(n, k + 1);
        let mut digit = vec![0u64; n];
        for (j, limb) in d.limbs.iter().enumerate() {
            for (t, &idx) in targets.iter().enumerate() {
                let m = &self.key_moduli[idx];
                for (dst, &x) in digit.iter_mut().zip(limb) {
                    *dst = x % m.value;
                }
                ntt_forward(&mut digit, &self.ntt[idx]);
                mul_acc_limb(&mut acc0.limbs[t], &digit, &key.b[j].limbs[idx], m);
                mul_acc_limb(&mut acc1.limbs[t], &digit, &key.a[j].limbs[idx], m);
            }
        }

        let moduli: Vec<Modulus> = targets.iter().map(|&i| self.key_moduli[i]).collect();
        let tables: Vec<&NttTables> = targets.iter().map(|&i| &self.ntt[i]).collect();
        divide_round_last(&mut acc0, &moduli, &tables);
        divide_round_last(&mut acc1, &moduli, &tables);
        (acc0, acc1)
    }
}

fn check_scales(left: f64, right: f64) -> Result<()> {
    if (left - right).abs() > SCALE_TOLERANCE * left.abs().max(right.abs()) {
        return Err(HeError::ScaleMismatch { left, right });
    }
    Ok(())
}

fn at_common_level(a: &Ciphertext, b: &Ciphertext) -> (Ciphertext, Ciphertext) {
    let level = a.level().min(b.level());
    (a.at_level(level), b.at_level(level))
}

#[inline]
fn mul_acc_limb(acc: &mut [u64], a: &[u64], b: &[u64], m: &Modulus) {
    for ((dst, &x), &y) in acc.iter_mut().zip(a).zip(b) {
        *dst = mod_add(*dst, mod_mul_barrett(x, y, m), m.value);
    }
}

/// Replace an NTT-form polynomial x over (q_0, ..., q_{k-1}, p) by
/// round(x / p) over (q_0, ..., q_{k-1}).
///
/// `moduli[l]` and `tables[l]` describe limb l; the last entry is p.
fn divide_round_last(poly: &mut RnsPoly, moduli: &[Modulus], tables: &[&NttTables]) {
    let last_idx = poly.num_limbs() - 1;
    let Some(mut last) = poly.limbs.pop() else {
        return;
    };
    ntt_inverse(&mut last, tables[last_idx]);
    let p = moduli[last_idx].value;

    let mut lifted = vec![0u64; poly.n];
    for (l, limb) in poly.limbs.iter_mut().enumerate() {
        let q = moduli[l].value;
        for (dst, &x) in lifted.iter_mut().zip(&last) {
            *dst = reduce_centered(x, p, q);
        }
        ntt_forward(&mut lifted, tables[l]);

        let p_inv = mod_inv(p % q, q);
        let p_inv_shoup = shoup_precompute(p_inv, q);
        for (x, &y) in limb.iter_mut().zip(&lifted) {
            *x = mod_mul_shoup(mod_sub(*x, y, q), p_inv, p_inv_shoup, q);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::small_context;

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64, what: &str) {
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < tol, "{what}: slot {i} expected {e}, got {a}");
        }
    }

    #[test]
    fn test_add_sub() {
        let (ctx, mut rng) = small_context(10);
        let a: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..64).map(|i| 100.0 - 2.0 * i as f64).collect();
        let ca = ctx.encrypt(&a, &mut rng).unwrap();
        let cb = ctx.encrypt(&b, &mut rng).unwrap();

        let sum = ctx.decrypt(&ctx.add(&ca, &cb).unwrap()).unwrap();
        let expected: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        assert_close(&sum, &expected, 1e-3, "add");

        let diff = ctx.decrypt(&ctx.sub(&ca, &cb).unwrap()).unwrap();
        let expected: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x - y).collect();
        assert_close(&diff, &expected, 1e-3, "sub");
    }

    #[test]
    fn test_square_and_rescale() {
        let (ctx, mut rng) = small_context(11);
        let values: Vec<f64> = (0..32).map(|i| i as f64 * 1.5 - 20.0).collect();
        let ct = ctx.encrypt(&values, &mut rng).unwrap();

        let squared = ctx.rescale(&ctx.square(&ct).unwrap()).unwrap();
        assert_eq!(squared.level(), ct.level() - 1);
        let decoded = ctx.decrypt(&squared).unwrap();
        let expected: Vec<f64> = values.iter().map(|v| v * v).collect();
        assert_close(&decoded, &expected, 1e-2, "square");
    }

    #[test]
    fn test_multiply_distinct_operands() {
        let (ctx, mut rng) = small_context(12);
        let a = [3.0, -2.0, 0.5, 10.0];
        let b = [4.0, 7.0, -8.0, 0.25];
        let ca = ctx.encrypt(&a, &mut rng).unwrap();
        let cb = ctx.encrypt(&b, &mut rng).unwrap();
        let prod = ctx.rescale(&ctx.multiply(&ca, &cb).unwrap()).unwrap();
        let decoded = ctx.decrypt(&prod).unwrap();
        assert_close(&decoded, &[12.0, -14.0, -4.0, 2.5], 1e-3, "multiply");
    }

    #[test]
    fn test_multiply_scalar_hits_target_scale() {
        let (ctx, mut rng) = small_context(13);
        let ct = ctx.encrypt(&[10.0, 20.0, -30.0], &mut rng).unwrap();
        let target = ct.scale;
        let scaled = ctx.multiply_scalar(&ct, 1.0 / 3.0, target).unwrap();
        assert_eq!(scaled.level(), ct.level() - 1);
        assert!(
            ((scaled.scale - target) / target).abs() < SCALE_TOLERANCE,
            "scale drifted: {} vs {}",
            scaled.scale,
            target
        );
        let decoded = ctx.decrypt(&scaled).unwrap();
        assert_close(&decoded, &[10.0 / 3.0, 20.0 / 3.0, -10.0], 1e-4, "scalar");

        assert!(matches!(
            ctx.multiply_scalar(&ct, 0.0, target),
            Err(HeError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_rotate_left() {
        let (ctx, mut rng) = small_context(14);
        let slots = ctx.slot_count();
        let values: Vec<f64> = (0..slots).map(|i| i as f64).collect();
        let ct = ctx.encrypt(&values, &mut rng).unwrap();

        for step in [1usize, 4, 256] {
            let rotated = ctx.decrypt(&ctx.rotate(&ct, step).unwrap()).unwrap();
            let expected: Vec<f64> = (0..slots).map(|i| ((i + step) % slots) as f64).collect();
            assert_close(&rotated, &expected, 1e-3, &format!("rotate by {step}"));
        }

        assert!(matches!(ctx.rotate(&ct, 3), Err(HeError::MissingGaloisKey(3))));
    }

    #[test]
    fn test_slot_sum_fills_every_slot() {
        let (ctx, mut rng) = small_context(15);
        let values: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let ct = ctx.encrypt(&values, &mut rng).unwrap();
        let summed = ctx.decrypt(&ctx.slot_sum(&ct).unwrap()).unwrap();
        assert!((summed[0] - 5050.0).abs() < 1e-2, "slot 0 holds {}", summed[0]);
        assert!((summed[ctx.slot_count() - 1] - 5050.0).abs() < 1e-2);
    }

    #[test]
    fn test_levels_align_and_scales_checked() {
        let (ctx, mut rng) = small_context(16);
        let a = ctx.encrypt(&[2.0, 4.0], &mut rng).unwrap();
        let b = ctx.encrypt(&[1.0, 1.0], &mut rng).unwrap();

        // Lower b by one level while keeping its scale.
        let b_low = ctx.multiply_scalar(&b, 1.0, b.scale).unwrap();
        let sum = ctx.add(&a, &b_low).unwrap();
        assert_eq!(sum.level(), b_low.level());
        assert_close(&ctx.decrypt(&sum).unwrap()[..2], &[3.0, 5.0], 1e-4, "aligned add");

        let squared = ctx.square(&a).unwrap();
        assert!(matches!(ctx.add(&a, &squared), Err(HeError::ScaleMismatch { .. })));
    }

    #[test]
    fn test_rescale_exhausts_levels() {
        let (ctx, mut rng) = small_context(17);
        let mut ct = ctx.encrypt(&[1.0], &mut rng).unwrap();
        while ct.level() > 0 {
            ct = ctx.multiply_scalar(&ct, 1.0, ct.scale).unwrap();
        }
        assert!(matches!(
            ctx.rescale(&ct),
            Err(HeError::InsufficientDepth { required: 1, available: 0 })
        ));
    }
}
