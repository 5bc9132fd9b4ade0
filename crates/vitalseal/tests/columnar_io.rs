use std::collections::BTreeMap;
use std::fs;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use vitalseal::columnar::{
    column_path, encrypt_column, encrypt_columns, load_column, load_dataset, save_column,
    save_dataset, NumericColumns,
};
use vitalseal::context::create_context_with_rng;
use vitalseal::statistics::{dispatch, finalize, plaintext_statistic, Operation};
use vitalseal::{CkksParams, ColumnData, EncryptedColumn, EncryptionMode, Error, HeContext};

fn context() -> &'static HeContext {
    static CONTEXT: OnceLock<HeContext> = OnceLock::new();
    CONTEXT.get_or_init(|| {
        let params = CkksParams::custom(2048, &[60, 40, 40, 60], 2f64.powi(40)).unwrap();
        create_context_with_rng(params, &mut StdRng::seed_from_u64(77)).unwrap()
    })
}

#[test]
fn test_single_column_roundtrip() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let column = encrypt_column("bmi", &[22.5, 31.0, 27.25], ctx, ctx.slot_count()).unwrap();
    let path = save_column("bmi", &column, dir.path()).unwrap();
    assert_eq!(path, column_path("bmi", dir.path()));

    let loaded = load_column("bmi", dir.path(), ctx).unwrap();
    assert_eq!(loaded, column);
    let mean = finalize(ctx, &dispatch(ctx, &loaded, "mean").unwrap()).unwrap();
    assert!((mean - 26.916_666).abs() < 1e-3, "mean {mean}");
}

#[test]
fn test_multi_chunk_roundtrip() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let slots = ctx.slot_count();
    let mut rng = StdRng::seed_from_u64(5);
    let values: Vec<f64> = (0..2 * slots + 17).map(|_| rng.gen_range(3.0..9.0)).collect();
    let column = encrypt_column("cholesterol", &values, ctx, slots).unwrap();
    assert_eq!(column.chunk_count(), 3);

    save_column("cholesterol", &column, dir.path()).unwrap();
    let loaded = load_column("cholesterol", dir.path(), ctx).unwrap();
    assert!(matches!(loaded.data, ColumnData::MultiChunkCiphertext(ref c) if c.len() == 3));
    assert_eq!(loaded.actual_count, values.len());

    for op in Operation::ALL {
        let expected = plaintext_statistic(&values, op).unwrap();
        let got = finalize(ctx, &dispatch(ctx, &loaded, op.as_str()).unwrap()).unwrap();
        let tol = 1e-6 * expected.abs() + 1e-2;
        assert!((got - expected).abs() < tol, "{op}: {got} vs {expected}");
    }
}

#[test]
fn test_plaintext_column_file() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let column = EncryptedColumn::plaintext(vec![4.0, 8.0]);
    save_column("temperature", &column, dir.path()).unwrap();
    let loaded = load_column("temperature", dir.path(), ctx).unwrap();
    assert_eq!(loaded, column);
    assert_eq!(finalize(ctx, &dispatch(ctx, &loaded, "variance").unwrap()).unwrap(), 4.0);
}

#[test]
fn test_truncated_file_is_malformed() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let column = encrypt_column("glucose", &[1.0; 5], ctx, 4).unwrap();
    let path = save_column("glucose", &column, dir.path()).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 100]).unwrap();
    assert!(matches!(
        load_column("glucose", dir.path(), ctx),
        Err(Error::MalformedColumnFile { .. })
    ));
    assert!(matches!(load_column("missing", dir.path(), ctx), Err(Error::Io(_))));
    assert!(matches!(
        save_column("../escape", &column, dir.path()),
        Err(Error::InvalidFieldName(_))
    ));
}

#[test]
fn test_dataset_roundtrip() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let mut numeric = NumericColumns::new();
    numeric.insert("heart_rate".into(), vec![70.0, 75.0, 80.0]);
    numeric.insert("glucose".into(), (0..ctx.slot_count() + 1).map(|i| (i % 7) as f64).collect());

    let (columns, metadata) = encrypt_columns(&numeric, ctx, ctx.slot_count()).unwrap();
    save_dataset(dir.path(), &columns, &metadata).unwrap();
    let (loaded, loaded_meta): (BTreeMap<String, EncryptedColumn>, _) =
        load_dataset(dir.path(), ctx).unwrap();
    assert_eq!(loaded_meta, metadata);
    assert_eq!(loaded, columns);

    let raw = fs::read_to_string(dir.path().join("metadata.json")).unwrap();
    assert!(raw.contains("columnar_simd"), "{raw}");
}

#[test]
fn test_legacy_tagged_dataset_refused() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let mut numeric = NumericColumns::new();
    numeric.insert("heart_rate".into(), vec![70.0, 75.0]);
    let (columns, mut metadata) = encrypt_columns(&numeric, ctx, ctx.slot_count()).unwrap();
    metadata.encryption_mode = EncryptionMode::LegacyPerRecord;
    save_dataset(dir.path(), &columns, &metadata).unwrap();

    let raw = fs::read_to_string(dir.path().join("metadata.json")).unwrap();
    assert!(raw.contains("legacy_per_record"), "{raw}");
    assert!(matches!(
        load_dataset(dir.path(), ctx),
        Err(Error::MalformedColumnFile { .. })
    ));
}

#[test]
fn test_dataset_with_underfilled_chunks_refused() {
    let ctx = context();
    let dir = tempdir().unwrap();
    let mut numeric = NumericColumns::new();
    numeric.insert("glucose".into(), vec![5.0; 10]);
    let (columns, mut metadata) = encrypt_columns(&numeric, ctx, 4).unwrap();
    assert_eq!(metadata.chunk_counts["glucose"], 3);

    // Three chunks cannot hold 10 values if each held 8: the third would be empty.
    metadata.simd_slot_count = 8;
    save_dataset(dir.path(), &columns, &metadata).unwrap();
    assert!(matches!(
        load_dataset(dir.path(), ctx),
        Err(Error::MalformedColumnFile { .. })
    ));

    metadata.simd_slot_count = 4;
    save_dataset(dir.path(), &columns, &metadata).unwrap();
    assert_eq!(load_dataset(dir.path(), ctx).unwrap().0, columns);
}
