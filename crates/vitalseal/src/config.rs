//! Analytics configuration, loadable from a JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vitalseal_he::params::DEFAULT_SCALE_BITS;
use vitalseal_he::CkksParams;

use crate::error::{Error, Result};

/// Secret-key material is reliably larger than this for every supported degree.
pub const DEFAULT_ISOLATION_THRESHOLD_BYTES: usize = 1000;

/// Homomorphic parameter profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Profile {
    /// N = 8192, chain [60, 40, 40, 60]: the per-record path.
    Baseline,
    /// N = 16384, chain [60, 40, 40, 40, 40, 60]: the columnar path.
    Optimized,
    Custom {
        poly_degree: usize,
        /// Prime widths; the last one is the key-switching prime.
        coeff_modulus_bits: Vec<u32>,
        scale_bits: u32,
    },
}

impl Profile {
    pub fn to_params(&self) -> Result<CkksParams> {
        match self {
            Profile::Baseline => Ok(CkksParams::baseline()),
            Profile::Optimized => Ok(CkksParams::optimized()),
            Profile::Custom {
                poly_degree,
                coeff_modulus_bits,
                scale_bits,
            } => {
                if *scale_bits == 0 || *scale_bits > 60 {
                    return Err(Error::InvalidParameters(format!(
                        "scale_bits {scale_bits} outside 1..=60"
                    )));
                }
                let scale = 2f64.powi(*scale_bits as i32);
                Ok(CkksParams::custom(*poly_degree, coeff_modulus_bits, scale)?)
            }
        }
    }

    /// Custom profile with the default 2^40 scale.
    pub fn custom(poly_degree: usize, coeff_modulus_bits: &[u32]) -> Self {
        Profile::Custom {
            poly_degree,
            coeff_modulus_bits: coeff_modulus_bits.to_vec(),
            scale_bits: DEFAULT_SCALE_BITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub columnar_profile: Profile,
    pub legacy_profile: Profile,
    /// Root directory for datasets written by `columnar::save_dataset`.
    pub storage_dir: PathBuf,
    pub isolation_threshold_bytes: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            columnar_profile: Profile::Optimized,
            legacy_profile: Profile::Baseline,
            storage_dir: PathBuf::from("data/encrypted"),
            isolation_threshold_bytes: DEFAULT_ISOLATION_THRESHOLD_BYTES,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
