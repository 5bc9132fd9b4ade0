//! Homomorphic context: parameters, pre-computed tables and key material.
//!
//! A private context holds the secret key and can decrypt. A public context
//! ([`HeContext::public_only`]) holds only the public, relinearization and
//! Galois keys: it can encrypt and evaluate but every decryption fails with
//! [`HeError::MissingSecretKey`].

use std::time::Instant;

use log::debug;
use rand::{CryptoRng, RngCore};

use crate::ciphertext::Ciphertext;
use crate::encoding::CkksEncoder;
use crate::error::{HeError, Result};
use crate::keys::{
    galois_element, power_of_two_steps, GaloisKey, GaloisKeys, KeySwitchKey, PublicKey, SecretKey,
};
use crate::ntt::{forward_limbs, inverse_limbs, NttTables};
use crate::params::{CkksParams, Modulus};
use crate::rns::RnsPoly;
use crate::sampling::{sample_gaussian, sample_ternary, ERROR_STD_DEV};

/// Everything needed to encrypt, evaluate and (optionally) decrypt.
#[derive(Debug, Clone)]
pub struct HeContext {
    pub(crate) params: CkksParams,
    /// Data primes followed by the special prime.
    pub(crate) key_moduli: Vec<Modulus>,
    /// One table per entry of `key_moduli`.
    pub(crate) ntt: Vec<NttTables>,
    pub(crate) encoder: CkksEncoder,
    pub(crate) public_key: PublicKey,
    pub(crate) relin_key: KeySwitchKey,
    pub(crate) galois_keys: GaloisKeys,
    pub(crate) secret_key: Option<SecretKey>,
}

impl HeContext {
    /// Generate a fresh secret key and every evaluation key for `params`.
    pub fn create<R: RngCore + CryptoRng>(params: CkksParams, rng: &mut R) -> Result<Self> {
        let start = Instant::now();
        let ntt = build_tables(&params);
        let sk = SecretKey::generate(&params, &ntt, rng);
        let public_key = PublicKey::generate(&sk, &params, &ntt, rng);
        let relin_key = KeySwitchKey::relinearization(&sk, &params, &ntt, rng);
        debug!(
            "generated secret, public and relinearization keys for N={} in {:?}",
            params.poly_degree,
            start.elapsed()
        );

        let rotation_start = Instant::now();
        let galois_keys: GaloisKeys = power_of_two_steps(params.num_slots)
            .into_iter()
            .map(|step| {
                let elt = galois_element(step, params.poly_degree);
                (elt, GaloisKey::generate(&sk, elt, &params, &ntt, rng))
            })
            .collect();
        debug!(
            "generated {} rotation keys in {:?}",
            galois_keys.len(),
            rotation_start.elapsed()
        );

        Ok(Self::from_parts(params, ntt, public_key, relin_key, galois_keys, Some(sk)))
    }

    pub(crate) fn from_parts(
        params: CkksParams,
        ntt: Vec<NttTables>,
        public_key: PublicKey,
        relin_key: KeySwitchKey,
        galois_keys: GaloisKeys,
        secret_key: Option<SecretKey>,
    ) -> Self {
        Self {
            key_moduli: params.key_moduli(),
            encoder: CkksEncoder::new(&params),
            params,
            ntt,
            public_key,
            relin_key,
            galois_keys,
            secret_key,
        }
    }

    pub fn params(&self) -> &CkksParams {
        &self.params
    }

    /// SIMD capacity: N/2 slots per ciphertext.
    pub fn slot_count(&self) -> usize {
        self.params.num_slots
    }

    /// Level of a freshly encrypted ciphertext.
    pub fn max_level(&self) -> usize {
        self.params.max_level()
    }

    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Copy of this context with the secret key removed.
    pub fn public_only(&self) -> Self {
        Self {
            secret_key: None,
            ..self.clone()
        }
    }

    /// Encrypt up to `slot_count()` values under the public key at the top level.
    pub fn encrypt<R: RngCore + CryptoRng>(&self, values: &[f64], rng: &mut R) -> Result<Ciphertext> {
        let moduli = &self.params.moduli;
        let n = self.params.poly_degree;

        let mut m_plus_e0 = self.encoder.encode(values, self.params.scale, moduli)?;
        let e0 = RnsPoly::from_signed(&sample_gaussian(rng, n, ERROR_STD_DEV), moduli);
        m_plus_e0.add_assign(&e0, moduli);
        forward_limbs(&mut m_plus_e0, &self.ntt);

        let mut u = RnsPoly::from_signed(&sample_ternary(rng, n), moduli);
        forward_limbs(&mut u, &self.ntt);
        let mut e1 = RnsPoly::from_signed(&sample_gaussian(rng, n, ERROR_STD_DEV), moduli);
        forward_limbs(&mut e1, &self.ntt);

        let mut c0 = m_plus_e0;
        c0.mul_acc(&self.public_key.b, &u, moduli);
        let mut c1 = e1;
        c1.mul_acc(&self.public_key.a, &u, moduli);

        Ok(Ciphertext {
            c0,
            c1,
            scale: self.params.scale,
        })
    }

    /// Decrypt and decode every slot.
    pub fn decrypt(&self, ct: &Ciphertext) -> Result<Vec<f64>> {
        let sk = self.secret_key.as_ref().ok_or(HeError::MissingSecretKey)?;
        if ct.poly_degree() != self.params.poly_degree || ct.level() > self.max_level() {
            return Err(HeError::Malformed(format!(
                "ciphertext (N={}, level {}) does not belong to this context",
                ct.poly_degree(),
                ct.level()
            )));
        }
        let moduli = &self.params.moduli;
        let mut m = ct.c0.clone();
        m.mul_acc(&ct.c1, &sk.s_ntt, moduli);
        inverse_limbs(&mut m, &self.ntt);
        Ok(self.encoder.decode(&m, moduli, ct.scale))
    }
}

/// NTT tables for the data primes followed by the special prime.
pub(crate) fn build_tables(params: &CkksParams) -> Vec<NttTables> {
    params
        .key_moduli()
        .iter()
        .map(|m| NttTables::new(params.poly_degree, m.value))
        .collect()
}
