//! Row-to-column pivot, SIMD packing and column storage.
//!
//! A numeric column of n values becomes one ciphertext when n fits the SIMD
//! capacity, otherwise ceil(n / capacity) chunks where every chunk but the
//! last is full. The true value count travels with the column: padding slots
//! are zero, so they never bias a sum, but a mean must divide by the real
//! count.
//!
//! Column file layout (little-endian):
//!
//! ```text
//! tag u8 | actual_count u32 | body
//!   tag 0  single ciphertext   body = ciphertext bytes
//!   tag 1  multi-chunk         body = chunk_count u32 | (len u32 | ciphertext bytes)*
//!   tag 2  plaintext vector    body = actual_count × f64
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use vitalseal_he::{ciphertext_to_bytes, Ciphertext, HeContext};

use crate::classifier::{segment, Record};
use crate::error::{Error, Result};
use crate::jobs::ProgressReporter;

const TAG_SINGLE: u8 = 0;
const TAG_MULTI: u8 = 1;
const TAG_PLAINTEXT: u8 = 2;

pub const COLUMNS_DIR: &str = "columns";
pub const METADATA_FILE: &str = "metadata.json";

/// How a column's values are held, decided once when it is built or loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    SingleCiphertext(Ciphertext),
    MultiChunkCiphertext(Vec<Ciphertext>),
    PlaintextVector(Vec<f64>),
}

/// One numeric field in storage form. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedColumn {
    /// Real (non-padding) values across all chunks.
    pub actual_count: usize,
    pub data: ColumnData,
}

impl EncryptedColumn {
    pub fn plaintext(values: Vec<f64>) -> Self {
        Self {
            actual_count: values.len(),
            data: ColumnData::PlaintextVector(values),
        }
    }

    /// Number of ciphertexts; 1 for plaintext columns.
    pub fn chunk_count(&self) -> usize {
        match &self.data {
            ColumnData::MultiChunkCiphertext(chunks) => chunks.len(),
            _ => 1,
        }
    }

    /// The ciphertexts in chunk order (empty for plaintext columns).
    pub fn ciphertexts(&self) -> &[Ciphertext] {
        match &self.data {
            ColumnData::SingleCiphertext(ct) => std::slice::from_ref(ct),
            ColumnData::MultiChunkCiphertext(chunks) => chunks,
            ColumnData::PlaintextVector(_) => &[],
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self.data, ColumnData::PlaintextVector(_))
    }
}

/// Real values in each chunk of a column: full chunks, then the remainder.
pub fn chunk_counts(actual_count: usize, capacity: usize) -> Vec<usize> {
    if actual_count == 0 || capacity == 0 {
        return vec![actual_count];
    }
    (0..actual_count.div_ceil(capacity))
        .map(|i| capacity.min(actual_count - i * capacity))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    ColumnarSimd,
    LegacyPerRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_names: Vec<String>,
    pub actual_counts: BTreeMap<String, usize>,
    pub chunk_counts: BTreeMap<String, usize>,
    pub simd_slot_count: usize,
    /// Length of the longest column.
    pub total_records: usize,
    pub encryption_mode: EncryptionMode,
}

pub type IdentifyingColumns = BTreeMap<String, Vec<String>>;
pub type NumericColumns = BTreeMap<String, Vec<f64>>;

/// Segment every record and append each surviving field to its column,
/// in record order. A record missing a field leaves no entry in that column.
pub fn pivot_to_columns(records: &[Record]) -> (IdentifyingColumns, NumericColumns) {
    let mut identifying = IdentifyingColumns::new();
    let mut numeric = NumericColumns::new();
    for record in records {
        let classified = segment(record);
        for (field, value) in classified.identifying {
            identifying.entry(field).or_default().push(value);
        }
        for (field, value) in classified.numeric {
            numeric.entry(field).or_default().push(value);
        }
    }
    (identifying, numeric)
}

/// Encrypt every column, in parallel across columns and chunks.
pub fn encrypt_columns(
    numeric_columns: &NumericColumns,
    context: &HeContext,
    simd_capacity: usize,
) -> Result<(BTreeMap<String, EncryptedColumn>, ColumnMetadata)> {
    check_capacity(context, simd_capacity)?;
    let columns = numeric_columns
        .par_iter()
        .map(|(field, values)| {
            Ok((field.clone(), encrypt_column(field, values, context, simd_capacity)?))
        })
        .collect::<Result<BTreeMap<String, EncryptedColumn>>>()?;

    let metadata = build_metadata(&columns, simd_capacity);
    info!(
        "encrypted {} columns, {} records",
        columns.len(),
        metadata.total_records
    );
    Ok((columns, metadata))
}

/// Like [`encrypt_columns`], one column at a time, reporting after each
/// column and stopping with `JobCancelled` once the job is cancelled.
pub fn encrypt_columns_with_progress(
    numeric_columns: &NumericColumns,
    context: &HeContext,
    simd_capacity: usize,
    reporter: &ProgressReporter,
) -> Result<(BTreeMap<String, EncryptedColumn>, ColumnMetadata)> {
    check_capacity(context, simd_capacity)?;
    let total = numeric_columns.len();
    let mut columns = BTreeMap::new();
    for (done, (field, values)) in numeric_columns.iter().enumerate() {
        if reporter.is_cancelled() {
            return Err(Error::JobCancelled(reporter.job_id()));
        }
        let column = encrypt_column(field, values, context, simd_capacity)?;
        columns.insert(field.clone(), column);
        reporter.report(done + 1, total, field);
    }
    let metadata = build_metadata(&columns, simd_capacity);
    Ok((columns, metadata))
}

/// Pack and encrypt one column.
pub fn encrypt_column(
    field: &str,
    values: &[f64],
    context: &HeContext,
    simd_capacity: usize,
) -> Result<EncryptedColumn> {
    let actual_count = values.len();
    if actual_count <= simd_capacity {
        let ct = context.encrypt(values, &mut ChaCha20Rng::from_entropy())?;
        debug!("column {field}: {actual_count} values in one ciphertext");
        return Ok(EncryptedColumn {
            actual_count,
            data: ColumnData::SingleCiphertext(ct),
        });
    }

    let chunks = values
        .par_chunks(simd_capacity)
        .map(|chunk| Ok(context.encrypt(chunk, &mut ChaCha20Rng::from_entropy())?))
        .collect::<Result<Vec<Ciphertext>>>()?;
    debug!(
        "column {field}: {actual_count} values in {} chunks of {simd_capacity}",
        chunks.len()
    );
    Ok(EncryptedColumn {
        actual_count,
        data: ColumnData::MultiChunkCiphertext(chunks),
    })
}

fn check_capacity(context: &HeContext, simd_capacity: usize) -> Result<()> {
    if simd_capacity == 0 || simd_capacity > context.slot_count() {
        return Err(Error::InvalidParameters(format!(
            "SIMD capacity {simd_capacity} outside 1..={}",
            context.slot_count()
        )));
    }
    Ok(())
}

fn build_metadata(columns: &BTreeMap<String, EncryptedColumn>, simd_capacity: usize) -> ColumnMetadata {
    ColumnMetadata {
        column_names: columns.keys().cloned().collect(),
        actual_counts: columns
            .iter()
            .map(|(f, c)| (f.clone(), c.actual_count))
            .collect(),
        chunk_counts: columns
            .iter()
            .map(|(f, c)| (f.clone(), c.chunk_count()))
            .collect(),
        simd_slot_count: simd_capacity,
        total_records: columns.values().map(|c| c.actual_count).max().unwrap_or(0),
        encryption_mode: EncryptionMode::ColumnarSimd,
    }
}

/// Field names become file names.
pub fn validate_field_name(field: &str) -> Result<()> {
    let valid = !field.is_empty()
        && field
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidFieldName(field.to_string()))
    }
}

pub fn column_path(field: &str, directory: &Path) -> PathBuf {
    directory.join(format!("{field}.bin"))
}

/// Serialize a column into its tagged file form.
pub fn column_to_bytes(column: &EncryptedColumn) -> Result<Vec<u8>> {
    let count = u32::try_from(column.actual_count)
        .map_err(|_| Error::InvalidCount(column.actual_count))?;
    let mut out = Vec::new();
    match &column.data {
        ColumnData::SingleCiphertext(ct) => {
            out.push(TAG_SINGLE);
            out.extend_from_slice(&count.to_le_bytes());
            out.extend(ciphertext_to_bytes(ct));
        }
        ColumnData::MultiChunkCiphertext(chunks) => {
            out.push(TAG_MULTI);
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
            for chunk in chunks {
                let bytes = ciphertext_to_bytes(chunk);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend(bytes);
            }
        }
        ColumnData::PlaintextVector(values) => {
            out.push(TAG_PLAINTEXT);
            out.extend_from_slice(&count.to_le_bytes());
            for v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    Ok(out)
}

/// Parse a tagged column file. `origin` only labels errors.
pub fn column_from_bytes(bytes: &[u8], context: &HeContext, origin: &str) -> Result<EncryptedColumn> {
    let malformed = |reason: String| Error::MalformedColumnFile {
        path: origin.to_string(),
        reason,
    };
    let mut cursor = Cursor { bytes, pos: 0 };
    let tag = cursor.take(1).map_err(&malformed)?[0];
    let actual_count = cursor.u32().map_err(&malformed)? as usize;

    let data = match tag {
        TAG_SINGLE => {
            if actual_count > context.slot_count() {
                return Err(malformed(format!(
                    "{actual_count} values cannot fit one ciphertext of {} slots",
                    context.slot_count()
                )));
            }
            let ct = context
                .deserialize_ciphertext(cursor.rest())
                .map_err(|e| malformed(e.to_string()))?;
            ColumnData::SingleCiphertext(ct)
        }
        TAG_MULTI => {
            let chunk_count = cursor.u32().map_err(&malformed)? as usize;
            if chunk_count < 2 {
                return Err(malformed(format!("multi-chunk file with {chunk_count} chunks")));
            }
            if actual_count > chunk_count.saturating_mul(context.slot_count())
                || actual_count < chunk_count
            {
                return Err(malformed(format!(
                    "{actual_count} values inconsistent with {chunk_count} chunks"
                )));
            }
            // Every chunk carries at least its 4-byte length prefix.
            if cursor.remaining() < chunk_count.saturating_mul(4) {
                return Err(malformed(format!(
                    "{} bytes cannot hold {chunk_count} chunks",
                    cursor.remaining()
                )));
            }
            let mut chunks = Vec::with_capacity(chunk_count);
            for i in 0..chunk_count {
                let len = cursor.u32().map_err(&malformed)? as usize;
                let chunk = cursor.take(len).map_err(&malformed)?;
                let ct = context
                    .deserialize_ciphertext(chunk)
                    .map_err(|e| malformed(format!("chunk {i}: {e}")))?;
                chunks.push(ct);
            }
            if !cursor.rest().is_empty() {
                return Err(malformed("trailing bytes after last chunk".into()));
            }
            ColumnData::MultiChunkCiphertext(chunks)
        }
        TAG_PLAINTEXT => {
            let body = cursor.rest();
            if body.len() != actual_count.saturating_mul(8) {
                return Err(malformed(format!(
                    "{} body bytes for {actual_count} plaintext values",
                    body.len()
                )));
            }
            let values = body
                .chunks_exact(8)
                .map(|c| {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(c);
                    f64::from_le_bytes(word)
                })
                .collect();
            ColumnData::PlaintextVector(values)
        }
        other => return Err(malformed(format!("unknown format tag {other}"))),
    };
    Ok(EncryptedColumn { actual_count, data })
}

/// Write `<directory>/<field>.bin` through a temporary file and an atomic rename.
pub fn save_column(field: &str, column: &EncryptedColumn, directory: &Path) -> Result<PathBuf> {
    validate_field_name(field)?;
    fs::create_dir_all(directory)?;
    let bytes = column_to_bytes(column)?;
    let path = column_path(field, directory);

    let mut tmp = NamedTempFile::new_in(directory)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    debug!("saved column {field} ({} bytes) to {}", bytes.len(), path.display());
    Ok(path)
}

pub fn load_column(field: &str, directory: &Path, context: &HeContext) -> Result<EncryptedColumn> {
    validate_field_name(field)?;
    let path = column_path(field, directory);
    let bytes = fs::read(&path)?;
    column_from_bytes(&bytes, context, &path.display().to_string())
}

/// Write `columns/<field>.bin` for every column plus `metadata.json`.
pub fn save_dataset(
    directory: &Path,
    columns: &BTreeMap<String, EncryptedColumn>,
    metadata: &ColumnMetadata,
) -> Result<()> {
    let columns_dir = directory.join(COLUMNS_DIR);
    for (field, column) in columns {
        save_column(field, column, &columns_dir)?;
    }
    let mut tmp = NamedTempFile::new_in(directory)?;
    serde_json::to_writer_pretty(&mut tmp, metadata)?;
    tmp.persist(directory.join(METADATA_FILE)).map_err(|e| e.error)?;
    info!("saved {} columns to {}", columns.len(), columns_dir.display());
    Ok(())
}

pub fn load_dataset(
    directory: &Path,
    context: &HeContext,
) -> Result<(BTreeMap<String, EncryptedColumn>, ColumnMetadata)> {
    let raw = fs::read_to_string(directory.join(METADATA_FILE))?;
    let metadata: ColumnMetadata = serde_json::from_str(&raw)?;
    let columns_dir = directory.join(COLUMNS_DIR);
    if metadata.encryption_mode != EncryptionMode::ColumnarSimd {
        return Err(Error::MalformedColumnFile {
            path: directory.join(METADATA_FILE).display().to_string(),
            reason: format!(
                "dataset is stored as {:?}, not as SIMD columns",
                metadata.encryption_mode
            ),
        });
    }

    let mut columns = BTreeMap::new();
    for field in &metadata.column_names {
        let column = load_column(field, &columns_dir, context)?;
        let malformed = |reason: String| Error::MalformedColumnFile {
            path: column_path(field, &columns_dir).display().to_string(),
            reason,
        };
        if metadata.actual_counts.get(field) != Some(&column.actual_count) {
            return Err(malformed("actual count disagrees with metadata".into()));
        }
        if metadata.chunk_counts.get(field) != Some(&column.chunk_count()) {
            return Err(malformed("chunk count disagrees with metadata".into()));
        }
        check_chunk_layout(&column, metadata.simd_slot_count).map_err(malformed)?;
        columns.insert(field.clone(), column);
    }
    Ok((columns, metadata))
}

/// Every chunk but the last must be full and the last must fit: with c
/// chunks of capacity k, (c - 1)·k < actual_count <= c·k.
fn check_chunk_layout(column: &EncryptedColumn, capacity: usize) -> std::result::Result<(), String> {
    if !column.is_encrypted() {
        return Ok(());
    }
    let chunks = column.chunk_count();
    let n = column.actual_count;
    let upper = chunks.saturating_mul(capacity);
    let lower = (chunks - 1).saturating_mul(capacity);
    if n > upper || (chunks > 1 && n <= lower) {
        return Err(format!(
            "{n} values do not fill {chunks} chunks of capacity {capacity}"
        ));
    }
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], String> {
        let end = self.pos.saturating_add(len);
        if end > self.bytes.len() {
            return Err(format!(
                "truncated at offset {}: need {len} bytes, have {}",
                self.pos,
                self.bytes.len() - self.pos
            ));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(word))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}
