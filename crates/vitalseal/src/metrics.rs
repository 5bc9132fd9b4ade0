//! Accuracy of decrypted results against plaintext, and storage overhead.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Absolute error under which a decrypted value counts as a match.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub max_absolute_error: f64,
    /// Mean of |expected - actual| / |expected| in percent; zero expectations
    /// contribute their absolute error instead.
    pub mean_relative_error_pct: f64,
    /// Share of values within the tolerance, in percent.
    pub accuracy_pct: f64,
    pub tolerance: f64,
}

impl AccuracyMetrics {
    pub fn compare(expected: &[f64], actual: &[f64]) -> Result<Self> {
        Self::compare_with_tolerance(expected, actual, DEFAULT_TOLERANCE)
    }

    pub fn compare_with_tolerance(expected: &[f64], actual: &[f64], tolerance: f64) -> Result<Self> {
        if expected.len() != actual.len() {
            return Err(Error::InvalidParameters(format!(
                "length mismatch: {} expected vs {} actual",
                expected.len(),
                actual.len()
            )));
        }
        if expected.is_empty() {
            return Err(Error::InvalidCount(0));
        }

        let n = expected.len() as f64;
        let mut squared = 0.0;
        let mut max_abs: f64 = 0.0;
        let mut relative = 0.0;
        let mut matches = 0usize;
        for (&e, &a) in expected.iter().zip(actual) {
            let err = (e - a).abs();
            squared += err * err;
            max_abs = max_abs.max(err);
            let rel = if e == 0.0 { err } else { err / e.abs() };
            relative += rel * 100.0;
            if err <= tolerance {
                matches += 1;
            }
        }

        let mse = squared / n;
        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            max_absolute_error: max_abs,
            mean_relative_error_pct: relative / n,
            accuracy_pct: matches as f64 / n * 100.0,
            tolerance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub plaintext_bytes: usize,
    pub ciphertext_bytes: usize,
    /// ciphertext / plaintext; 0 for an empty plaintext.
    pub expansion_factor: f64,
}

impl StorageMetrics {
    pub fn measure(plaintext_bytes: usize, ciphertext_bytes: usize) -> Self {
        let expansion_factor = if plaintext_bytes == 0 {
            0.0
        } else {
            ciphertext_bytes as f64 / plaintext_bytes as f64
        };
        Self {
            plaintext_bytes,
            ciphertext_bytes,
            expansion_factor,
        }
    }
}
