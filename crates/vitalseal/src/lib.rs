//! VitalSeal: privacy-preserving statistics over health records.
//!
//! Records are split by a fixed field classifier. Identifying fields are
//! encrypted with AES-256-GCM; numeric vitals are pivoted into columns,
//! packed into CKKS ciphertexts and aggregated without decryption. The server
//! side only ever holds a public context; results are decrypted by the
//! client.
//!
//! ```text
//! records ──classifier──┬── identifying ──► symmetric (AES-GCM)
//!                       └── numeric ──► columnar (pivot, pack, chunk)
//!                                          │
//!                                          ▼
//!                          statistics::dispatch (sum / mean / variance)
//!                                          │
//!                                          ▼
//!                          statistics::finalize (client decrypts slot 0)
//! ```

pub mod classifier;
pub mod columnar;
pub mod config;
pub mod context;
pub mod error;
pub mod escrow;
pub mod isolation;
pub mod jobs;
pub mod legacy;
pub mod metrics;
pub mod statistics;
pub mod symmetric;

pub use classifier::{classify, segment, FieldCategory, FieldValue, Record};
pub use columnar::{ColumnData, ColumnMetadata, EncryptedColumn, EncryptionMode};
pub use config::{AnalyticsConfig, Profile};
pub use error::{Error, Result};
pub use statistics::{dispatch, Operation, StatisticValue};
pub use vitalseal_he::{Ciphertext, CkksParams, HeContext};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use vitalseal_he::{CkksParams, HeContext};

    /// Shared N=2048 context with three data primes, built once per test binary.
    pub(crate) fn small_context() -> &'static HeContext {
        static CONTEXT: OnceLock<HeContext> = OnceLock::new();
        CONTEXT.get_or_init(|| {
            let params = CkksParams::custom(2048, &[60, 40, 40, 60], 2f64.powi(40)).unwrap();
            HeContext::create(params, &mut StdRng::seed_from_u64(0x5EA1)).unwrap()
        })
    }

    pub(crate) fn test_rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }
}
