//! Homomorphic sum, mean and population variance over encrypted columns.
//!
//! Every operation reads its input ciphertexts and returns a new one; the
//! statistic is read from slot 0 after client-side decryption. Means always
//! divide by the column's real value count, never by the slot capacity.
//!
//! Depth: sum 0 levels, mean 1 (scalar rescale), variance 2 (square then
//! scalar rescale). `dispatch` refuses a column whose ciphertexts sit below
//! the requirement instead of returning degraded output.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vitalseal_he::{Ciphertext, HeContext, HeError};

use crate::columnar::{ColumnData, EncryptedColumn};
use crate::error::{Error, Result};

/// Log target for the compliance trail around each statistics call.
pub const AUDIT_TARGET: &str = "vitalseal::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Sum,
    Mean,
    Variance,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Sum, Operation::Mean, Operation::Variance];

    /// Rescales the operation consumes.
    pub const fn required_levels(self) -> usize {
        match self {
            Operation::Sum => 0,
            Operation::Mean => 1,
            Operation::Variance => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Sum => "sum",
            Operation::Mean => "mean",
            Operation::Variance => "variance",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Operation::Sum),
            "mean" => Ok(Operation::Mean),
            "variance" => Ok(Operation::Variance),
            _ => Err(Error::UnsupportedOperation(s.to_string())),
        }
    }
}

/// Result of a statistics call.
#[derive(Debug, Clone, PartialEq)]
pub enum StatisticValue {
    /// Encrypted result; the statistic is in slot 0.
    Encrypted(Ciphertext),
    /// Result computed over a plaintext column.
    Plain(f64),
}

/// Slot-sum of one ciphertext.
pub fn sum(context: &HeContext, ct: &Ciphertext) -> Result<Ciphertext> {
    Ok(context.slot_sum(ct)?)
}

/// Per-chunk slot-sums added together.
pub fn sum_chunks(context: &HeContext, chunks: &[Ciphertext]) -> Result<Ciphertext> {
    let sums = chunks
        .par_iter()
        .map(|chunk| Ok(context.slot_sum(chunk)?))
        .collect::<Result<Vec<Ciphertext>>>()?;
    add_all(context, sums)
}

pub fn mean(context: &HeContext, ct: &Ciphertext, actual_count: usize) -> Result<Ciphertext> {
    mean_chunks(context, std::slice::from_ref(ct), actual_count)
}

/// Mean over chunks; `actual_count` is the total of the per-chunk real counts.
pub fn mean_chunks(
    context: &HeContext,
    chunks: &[Ciphertext],
    actual_count: usize,
) -> Result<Ciphertext> {
    check_count(actual_count)?;
    let total = sum_chunks(context, chunks)?;
    Ok(context.multiply_scalar(&total, 1.0 / actual_count as f64, total.scale)?)
}

pub fn variance(context: &HeContext, ct: &Ciphertext, actual_count: usize) -> Result<Ciphertext> {
    variance_chunks(context, std::slice::from_ref(ct), actual_count)
}

/// Population variance E[X²] - E[X]² over chunks.
pub fn variance_chunks(
    context: &HeContext,
    chunks: &[Ciphertext],
    actual_count: usize,
) -> Result<Ciphertext> {
    check_count(actual_count)?;
    let inv_count = 1.0 / actual_count as f64;

    let mean = mean_chunks(context, chunks, actual_count)?;
    let mean_squared = context.rescale(&context.square(&mean)?)?;

    let squares = chunks
        .par_iter()
        .map(|chunk| Ok(context.rescale(&context.square(chunk)?)?))
        .collect::<Result<Vec<Ciphertext>>>()?;
    let sum_of_squares = sum_chunks(context, &squares)?;
    // Land E[X²] on the scale and level of E[X]² so the two subtract directly.
    let mean_of_squares =
        context.multiply_scalar(&sum_of_squares, inv_count, mean_squared.scale)?;

    Ok(context.sub(&mean_of_squares, &mean_squared)?)
}

/// Single entry point: parse the operation name and evaluate it.
pub fn dispatch(
    context: &HeContext,
    column: &EncryptedColumn,
    operation: &str,
) -> Result<StatisticValue> {
    evaluate(context, column, operation.parse()?)
}

/// Evaluate `op` over a column, branching on its storage form.
pub fn evaluate(
    context: &HeContext,
    column: &EncryptedColumn,
    op: Operation,
) -> Result<StatisticValue> {
    let n = column.actual_count;
    let chunks = match &column.data {
        ColumnData::PlaintextVector(values) => {
            return plaintext_statistic(values, op).map(StatisticValue::Plain)
        }
        ColumnData::SingleCiphertext(ct) => std::slice::from_ref(ct),
        ColumnData::MultiChunkCiphertext(chunks) => chunks.as_slice(),
    };

    let available = chunks.iter().map(Ciphertext::level).min().unwrap_or(0);
    if available < op.required_levels() {
        return Err(Error::He(HeError::InsufficientDepth {
            required: op.required_levels(),
            available,
        }));
    }

    let ct = match (op, chunks) {
        (Operation::Sum, [single]) => sum(context, single)?,
        (Operation::Sum, _) => sum_chunks(context, chunks)?,
        (Operation::Mean, [single]) => mean(context, single, n)?,
        (Operation::Mean, _) => mean_chunks(context, chunks, n)?,
        (Operation::Variance, [single]) => variance(context, single, n)?,
        (Operation::Variance, _) => variance_chunks(context, chunks, n)?,
    };
    Ok(StatisticValue::Encrypted(ct))
}

/// [`dispatch`] with an audit record of operation, field, count and duration.
pub fn run_logged(
    context: &HeContext,
    field: &str,
    column: &EncryptedColumn,
    operation: &str,
) -> Result<StatisticValue> {
    let start = Instant::now();
    let result = dispatch(context, column, operation);
    info!(
        target: AUDIT_TARGET,
        "operation={} field={} actual_count={} chunks={} duration_ms={} ok={}",
        operation,
        field,
        column.actual_count,
        column.chunk_count(),
        start.elapsed().as_millis(),
        result.is_ok()
    );
    result
}

/// The same statistics computed in the clear.
pub fn plaintext_statistic(values: &[f64], op: Operation) -> Result<f64> {
    let total: f64 = values.iter().sum();
    match op {
        Operation::Sum => Ok(total),
        Operation::Mean => {
            check_count(values.len())?;
            Ok(total / values.len() as f64)
        }
        Operation::Variance => {
            check_count(values.len())?;
            let n = values.len() as f64;
            let mean = total / n;
            Ok(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n)
        }
    }
}

/// Client-side: decrypt slot 0 of an encrypted result, or pass a plain one through.
pub fn finalize(context: &HeContext, value: &StatisticValue) -> Result<f64> {
    match value {
        StatisticValue::Plain(v) => Ok(*v),
        StatisticValue::Encrypted(ct) => {
            let slots = context.decrypt(ct)?;
            Ok(slots.first().copied().unwrap_or(0.0))
        }
    }
}

/// Square root of a decrypted variance; scheme noise can push a zero
/// variance slightly negative.
pub fn standard_deviation_from_variance(variance: f64) -> f64 {
    variance.max(0.0).sqrt()
}

fn check_count(actual_count: usize) -> Result<()> {
    if actual_count == 0 {
        return Err(Error::InvalidCount(actual_count));
    }
    Ok(())
}

fn add_all(context: &HeContext, parts: Vec<Ciphertext>) -> Result<Ciphertext> {
    let mut parts = parts.into_iter();
    let first = parts.next().ok_or(Error::InvalidCount(0))?;
    parts.try_fold(first, |acc, part| Ok(context.add(&acc, &part)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::encrypt_column;
    use crate::test_support::{small_context, test_rng};

    #[test]
    fn test_operation_parsing() {
        assert_eq!("Mean".parse::<Operation>().unwrap(), Operation::Mean);
        assert_eq!(" variance ".parse::<Operation>().unwrap(), Operation::Variance);
        assert!(matches!("median".parse::<Operation>(), Err(Error::UnsupportedOperation(_))));
        assert_eq!(Operation::Variance.required_levels(), 2);
        assert_eq!(Operation::Sum.to_string(), "sum");
    }

    #[test]
    fn test_plaintext_statistics() {
        let values = [70.0, 80.0, 90.0];
        assert_eq!(plaintext_statistic(&values, Operation::Sum).unwrap(), 240.0);
        assert_eq!(plaintext_statistic(&values, Operation::Mean).unwrap(), 80.0);
        let var = plaintext_statistic(&values, Operation::Variance).unwrap();
        assert!((var - 200.0 / 3.0).abs() < 1e-12);
        assert!(matches!(
            plaintext_statistic(&[], Operation::Mean),
            Err(Error::InvalidCount(0))
        ));
        assert_eq!(plaintext_statistic(&[], Operation::Sum).unwrap(), 0.0);
    }

    #[test]
    fn test_mean_divides_by_actual_count() {
        let ctx = small_context();
        let values: Vec<f64> = (0..100).map(|i| 50.0 + i as f64 * 0.5).collect();
        let ct = ctx.encrypt(&values, &mut test_rng(1)).unwrap();
        let result = ctx.decrypt(&mean(ctx, &ct, 100).unwrap()).unwrap()[0];
        let expected = plaintext_statistic(&values, Operation::Mean).unwrap();
        assert!((result - expected).abs() < 1e-2, "mean {result} vs {expected}");
        assert!(matches!(mean(ctx, &ct, 0), Err(Error::InvalidCount(0))));
    }

    #[test]
    fn test_variance_single() {
        let ctx = small_context();
        let ct = ctx.encrypt(&[70.0, 80.0, 90.0], &mut test_rng(2)).unwrap();
        let v = ctx.decrypt(&variance(ctx, &ct, 3).unwrap()).unwrap()[0];
        assert!((v - 66.6667).abs() < 0.1, "variance {v}");

        let flat = ctx.encrypt(&[100.0; 20], &mut test_rng(3)).unwrap();
        let v = ctx.decrypt(&variance(ctx, &flat, 20).unwrap()).unwrap()[0];
        assert!(v.abs() < 1e-2, "variance of identical values {v}");
        assert_eq!(standard_deviation_from_variance(-1e-9), 0.0);
    }

    #[test]
    fn test_chunked_matches_plaintext() {
        let ctx = small_context();
        let slots = ctx.slot_count();
        let values: Vec<f64> = (0..slots + slots / 2).map(|i| ((i * 37) % 101) as f64).collect();
        let column = encrypt_column("glucose", &values, ctx, slots).unwrap();
        assert_eq!(column.chunk_count(), 2);

        for op in Operation::ALL {
            let expected = plaintext_statistic(&values, op).unwrap();
            let got = finalize(ctx, &evaluate(ctx, &column, op).unwrap()).unwrap();
            let tol = 1e-6 * expected.abs().max(1.0) + 1e-2;
            assert!((got - expected).abs() < tol, "{op}: {got} vs {expected}");
        }
    }

    #[test]
    fn test_dispatch_plaintext_and_errors() {
        let ctx = small_context();
        let plain = EncryptedColumn::plaintext(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            dispatch(ctx, &plain, "mean").unwrap(),
            StatisticValue::Plain(2.5)
        );
        assert!(matches!(
            dispatch(ctx, &plain, "median"),
            Err(Error::UnsupportedOperation(_))
        ));

        // A column already one level down cannot afford a variance.
        let ct = ctx.encrypt(&[1.0, 2.0], &mut test_rng(4)).unwrap();
        let mut low = ctx.multiply_scalar(&ct, 1.0, ct.scale).unwrap();
        low.drop_to_level(1);
        let column = EncryptedColumn {
            actual_count: 2,
            data: ColumnData::SingleCiphertext(low),
        };
        assert!(matches!(
            run_logged(ctx, "bmi", &column, "variance"),
            Err(Error::He(HeError::InsufficientDepth { required: 2, available: 1 }))
        ));
        assert!(run_logged(ctx, "bmi", &column, "mean").is_ok());
    }
}
