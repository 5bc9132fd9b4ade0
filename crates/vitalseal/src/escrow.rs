//! Escrow of the AES key under CKKS.
//!
//! The 32 key bytes ride in the first 32 slots as byte-valued reals. The
//! server can store the ciphertext but only a context holding the secret key
//! can unwrap it.

use rand::{CryptoRng, RngCore};
use vitalseal_he::{Ciphertext, HeContext};

use crate::error::{Error, Result};
use crate::symmetric::{SymmetricKey, KEY_BYTES};

pub fn wrap_symmetric_key<R: RngCore + CryptoRng>(
    key: &SymmetricKey,
    context: &HeContext,
    rng: &mut R,
) -> Result<Ciphertext> {
    if context.slot_count() < KEY_BYTES {
        return Err(Error::InvalidParameters(format!(
            "{} slots cannot hold a {KEY_BYTES}-byte key",
            context.slot_count()
        )));
    }
    let slots: Vec<f64> = key.as_bytes().iter().map(|&b| f64::from(b)).collect();
    Ok(context.encrypt(&slots, rng)?)
}

/// Client side: decrypt and round each slot back into a byte.
pub fn unwrap_symmetric_key(wrapped: &Ciphertext, context: &HeContext) -> Result<SymmetricKey> {
    let slots = context.decrypt(wrapped)?;
    if slots.len() < KEY_BYTES {
        return Err(Error::InvalidKeyLength(slots.len()));
    }
    let bytes: Vec<u8> = slots[..KEY_BYTES].iter().map(|&x| slot_to_byte(x)).collect();
    SymmetricKey::from_slice(&bytes)
}

/// round(x) mod 256.
fn slot_to_byte(x: f64) -> u8 {
    (x.round() as i64).rem_euclid(256) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symmetric::generate_key;
    use crate::test_support::{small_context, test_rng};

    #[test]
    fn test_wrap_unwrap() {
        let ctx = small_context();
        let key = generate_key();
        let wrapped = wrap_symmetric_key(&key, ctx, &mut test_rng(11)).unwrap();
        assert_eq!(unwrap_symmetric_key(&wrapped, ctx).unwrap(), key);
    }

    #[test]
    fn test_edge_bytes_survive() {
        let ctx = small_context();
        let mut raw = [0u8; KEY_BYTES];
        raw[1] = 255;
        raw[2] = 128;
        let key = SymmetricKey::from_bytes(raw);
        let wrapped = wrap_symmetric_key(&key, ctx, &mut test_rng(12)).unwrap();
        assert_eq!(unwrap_symmetric_key(&wrapped, ctx).unwrap(), key);
        assert_eq!(slot_to_byte(-0.4), 0);
        assert_eq!(slot_to_byte(255.6), 0);
        assert_eq!(slot_to_byte(-1.2), 255);
    }

    #[test]
    fn test_public_context_cannot_unwrap() {
        let ctx = small_context();
        let public = ctx.public_only();
        let wrapped = wrap_symmetric_key(&generate_key(), &public, &mut test_rng(13)).unwrap();
        assert!(matches!(
            unwrap_symmetric_key(&wrapped, &public),
            Err(Error::MissingSecretKey)
        ));
    }
}
