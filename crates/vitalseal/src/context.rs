//! Encryption context manager: parameters to keys, with a depth check.

use log::debug;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use vitalseal_he::{CkksParams, HeContext};

use crate::config::Profile;
use crate::error::{Error, Result};
use crate::statistics::Operation;

/// Build a context (secret, public, relinearization and rotation keys) for a profile.
pub fn create_context(profile: &Profile) -> Result<HeContext> {
    create_context_with_rng(profile.to_params()?, &mut ChaCha20Rng::from_entropy())
}

/// Build a context from a degree, a chain of prime widths (special prime
/// last) and a scale.
pub fn create_context_from_chain(
    poly_degree: usize,
    coeff_modulus_bits: &[u32],
    scale: f64,
) -> Result<HeContext> {
    let params = CkksParams::custom(poly_degree, coeff_modulus_bits, scale)?;
    create_context_with_rng(params, &mut ChaCha20Rng::from_entropy())
}

/// Deterministic variant used by tests and benchmarks.
pub fn create_context_with_rng<R: RngCore + CryptoRng>(
    params: CkksParams,
    rng: &mut R,
) -> Result<HeContext> {
    check_depth(&params)?;
    debug!(
        "creating context: N={}, chain={:?}, scale=2^{:.1}",
        params.poly_degree,
        params.chain_bits(),
        params.scale.log2()
    );
    Ok(HeContext::create(params, rng)?)
}

/// Reject chains that cannot run every supported operation.
pub fn check_depth(params: &CkksParams) -> Result<()> {
    let deepest = Operation::ALL
        .iter()
        .map(|op| op.required_levels())
        .max()
        .unwrap_or(0);
    if params.max_level() < deepest {
        return Err(Error::InvalidParameters(format!(
            "modulus chain {:?} supports {} rescales, variance needs {}",
            params.chain_bits(),
            params.max_level(),
            deepest
        )));
    }
    Ok(())
}
