//! Legacy per-record hybrid encryption.
//!
//! Each record is encrypted on its own: identifying fields under AES-GCM,
//! each vitals field as a one-slot CKKS ciphertext. Aggregates add the
//! per-record ciphertexts, so they cost one homomorphic addition per record
//! instead of one slot-sum per column.

use std::collections::BTreeMap;

use log::debug;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use vitalseal_he::{ciphertext_to_bytes, Ciphertext, HeContext, HeError};

use crate::classifier::{segment, ClassifiedRecord, Record};
use crate::columnar::{ColumnMetadata, EncryptionMode};
use crate::error::{Error, Result};
use crate::statistics::Operation;
use crate::symmetric::{self, AeadPayload, SymmetricKey};

/// One record in storage form.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedRecord {
    pub identifying: BTreeMap<String, AeadPayload>,
    pub vitals: BTreeMap<String, Ciphertext>,
}

impl EncryptedRecord {
    /// Serialized size of every payload and ciphertext in the record.
    pub fn stored_bytes(&self) -> usize {
        let aes: usize = self.identifying.values().map(|p| p.to_bytes().len()).sum();
        let ckks: usize = self
            .vitals
            .values()
            .map(|ct| ciphertext_to_bytes(ct).len())
            .sum();
        aes + ckks
    }
}

pub struct HybridRecordEncryptor<'a> {
    context: &'a HeContext,
    key: SymmetricKey,
}

impl<'a> HybridRecordEncryptor<'a> {
    pub fn new(context: &'a HeContext, key: SymmetricKey) -> Self {
        Self { context, key }
    }

    pub fn encrypt_record<R: RngCore + CryptoRng>(
        &self,
        record: &Record,
        rng: &mut R,
    ) -> Result<EncryptedRecord> {
        let classified = segment(record);
        let identifying = classified
            .identifying
            .iter()
            .map(|(field, value)| Ok((field.clone(), symmetric::encrypt_str(value, &self.key)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let mut vitals = BTreeMap::new();
        for (field, value) in classified.numeric {
            vitals.insert(field, self.context.encrypt(&[value], rng)?);
        }
        Ok(EncryptedRecord {
            identifying,
            vitals,
        })
    }

    /// Encrypt records in parallel, each with its own generator.
    pub fn encrypt_records(&self, records: &[Record]) -> Result<Vec<EncryptedRecord>> {
        let encrypted = records
            .par_iter()
            .map(|record| self.encrypt_record(record, &mut ChaCha20Rng::from_entropy()))
            .collect::<Result<Vec<_>>>()?;
        debug!("encrypted {} records one by one", encrypted.len());
        Ok(encrypted)
    }

    /// Client side: recover both halves of a record.
    pub fn decrypt_record(&self, record: &EncryptedRecord) -> Result<ClassifiedRecord> {
        let identifying = record
            .identifying
            .iter()
            .map(|(field, payload)| Ok((field.clone(), symmetric::decrypt_str(payload, &self.key)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let numeric = record
            .vitals
            .iter()
            .map(|(field, ct)| {
                let slots = self.context.decrypt(ct)?;
                Ok((field.clone(), slots.first().copied().unwrap_or(0.0)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(ClassifiedRecord {
            identifying,
            numeric,
        })
    }
}

/// Sum, mean or population variance of `field` across records; the result
/// is in slot 0. Records without the field are skipped.
pub fn aggregate(
    records: &[EncryptedRecord],
    field: &str,
    op: Operation,
    context: &HeContext,
) -> Result<Ciphertext> {
    let values: Vec<&Ciphertext> = records.iter().filter_map(|r| r.vitals.get(field)).collect();
    let n = values.len();
    if n == 0 {
        return Err(Error::InvalidCount(0));
    }
    let available = values.iter().map(|ct| ct.level()).min().unwrap_or(0);
    if available < op.required_levels() {
        return Err(Error::He(HeError::InsufficientDepth {
            required: op.required_levels(),
            available,
        }));
    }

    let inv_count = 1.0 / n as f64;
    let total = add_all(context, values.iter().copied())?;
    match op {
        Operation::Sum => Ok(total),
        Operation::Mean => Ok(context.multiply_scalar(&total, inv_count, total.scale)?),
        Operation::Variance => {
            let mean = context.multiply_scalar(&total, inv_count, total.scale)?;
            let mean_squared = context.rescale(&context.square(&mean)?)?;
            let squares = values
                .par_iter()
                .map(|ct| Ok(context.rescale(&context.square(ct)?)?))
                .collect::<Result<Vec<Ciphertext>>>()?;
            let sum_of_squares = add_all(context, squares.iter())?;
            let mean_of_squares =
                context.multiply_scalar(&sum_of_squares, inv_count, mean_squared.scale)?;
            Ok(context.sub(&mean_of_squares, &mean_squared)?)
        }
    }
}

/// Dataset metadata tagged as per-record storage.
pub fn metadata(records: &[EncryptedRecord]) -> ColumnMetadata {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        for field in record.vitals.keys() {
            *counts.entry(field.clone()).or_default() += 1;
        }
    }
    ColumnMetadata {
        column_names: counts.keys().cloned().collect(),
        // One ciphertext per value.
        chunk_counts: counts.clone(),
        total_records: records.len(),
        actual_counts: counts,
        simd_slot_count: 1,
        encryption_mode: EncryptionMode::LegacyPerRecord,
    }
}

fn add_all<'c>(
    context: &HeContext,
    mut cts: impl Iterator<Item = &'c Ciphertext>,
) -> Result<Ciphertext> {
    let first = cts.next().ok_or(Error::InvalidCount(0))?.clone();
    cts.try_fold(first, |acc, ct| Ok(context.add(&acc, ct)?))
}
