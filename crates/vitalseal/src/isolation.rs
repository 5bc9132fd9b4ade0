//! Empirical checks that the server-side material cannot decrypt.
//!
//! Each check returns `true` for the safe outcome and logs the evidence.
//! Errors while running a check count as a failed check, except in
//! [`verify_decryption_blocked`], where a refused decryption is the point.

use log::{error, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use vitalseal_he::{ciphertext_to_bytes, Ciphertext, HeContext};

use crate::escrow::{unwrap_symmetric_key, wrap_symmetric_key};
use crate::symmetric::SymmetricKey;

/// Values encrypted for the decryption-blocked probe.
#[allow(clippy::approx_constant)]
pub const PROBE_VALUES: [f64; 3] = [42.0, 3.14, 2.71];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyIsolationReport {
    pub secret_key_absent: bool,
    /// `None` when no symmetric key was supplied.
    pub symmetric_key_encryptable: Option<bool>,
    pub decryption_blocked: bool,
    pub overall: CheckOutcome,
    pub details: Vec<String>,
}

/// Re-serialize the blob's context with and without the secret key; a size
/// difference of `threshold_bytes` or more means a secret key was present.
pub fn verify_secret_absent(blob: &[u8], threshold_bytes: usize) -> bool {
    let context = match HeContext::deserialize(blob) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("cannot deserialize context for secret-key check: {e}");
            return false;
        }
    };
    let with_secret = context.serialize(true).len();
    let without_secret = context.serialize(false).len();
    let diff = with_secret.saturating_sub(without_secret);
    if diff >= threshold_bytes {
        warn!("secret key check FAILED: removable secret key of {diff} bytes");
        false
    } else {
        info!("secret key check passed: size difference {diff} bytes");
        true
    }
}

/// Escrow `key` under `context` and check it unwraps to the same bytes.
pub fn verify_symmetric_key_wrappable(key: &SymmetricKey, context: &HeContext) -> bool {
    let mut rng = ChaCha20Rng::from_entropy();
    let recovered = wrap_symmetric_key(key, context, &mut rng)
        .and_then(|wrapped| unwrap_symmetric_key(&wrapped, context));
    match recovered {
        Ok(k) if &k == key => {
            info!("symmetric key escrow verified");
            true
        }
        Ok(_) => {
            error!("symmetric key escrow FAILED: key mismatch after unwrap");
            false
        }
        Err(e) => {
            error!("symmetric key escrow FAILED: {e}");
            false
        }
    }
}

/// Move `ciphertext` under the public context in `public_blob` and try to
/// decrypt it there. A successful decryption is a security failure.
pub fn verify_decryption_blocked(ciphertext: &Ciphertext, public_blob: &[u8]) -> bool {
    let attempt = HeContext::deserialize(public_blob).and_then(|public| {
        let ct = public.deserialize_ciphertext(&ciphertext_to_bytes(ciphertext))?;
        public.decrypt(&ct)
    });
    match attempt {
        Ok(_) => {
            error!("SECURITY FAILURE: decryption succeeded without the secret key");
            false
        }
        Err(e) => {
            info!("decryption correctly refused: {e}");
            true
        }
    }
}

/// Run every check against the public form of `context`.
pub fn generate_report(
    context: &HeContext,
    symmetric_key: Option<&SymmetricKey>,
    threshold_bytes: usize,
) -> KeyIsolationReport {
    let mut details = Vec::new();
    let public_blob = context.serialize(false);

    let secret_key_absent = verify_secret_absent(&public_blob, threshold_bytes);
    details.push(format!(
        "public context ({} bytes): secret key {}",
        public_blob.len(),
        if secret_key_absent { "absent" } else { "PRESENT" }
    ));

    let symmetric_key_encryptable =
        symmetric_key.map(|key| verify_symmetric_key_wrappable(key, context));
    match symmetric_key_encryptable {
        Some(ok) => details.push(format!("symmetric key escrow: {}", pass_fail(ok))),
        None => details.push("symmetric key escrow: skipped".to_string()),
    }

    let mut rng = ChaCha20Rng::from_entropy();
    let decryption_blocked = match context.encrypt(&PROBE_VALUES, &mut rng) {
        Ok(probe) => verify_decryption_blocked(&probe, &public_blob),
        Err(e) => {
            error!("cannot encrypt decryption probe: {e}");
            false
        }
    };
    details.push(format!(
        "decryption with public context: {}",
        if decryption_blocked { "blocked" } else { "SUCCEEDED" }
    ));

    let all_passed =
        secret_key_absent && decryption_blocked && symmetric_key_encryptable.unwrap_or(true);
    let overall = if all_passed {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail
    };
    info!("key isolation report: {overall:?}");

    KeyIsolationReport {
        secret_key_absent,
        symmetric_key_encryptable,
        decryption_blocked,
        overall,
        details,
    }
}

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "pass"
    } else {
        "FAIL"
    }
}
