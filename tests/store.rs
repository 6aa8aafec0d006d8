use std::fs;

use camino::Utf8PathBuf;

use crabbit::domain::ScalarKind;
use crabbit::store::{JsonStyle, OutputStore};

fn temp_store() -> (tempfile::TempDir, OutputStore) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("out")).unwrap();
    (dir, OutputStore::new(root))
}

#[test]
fn commit_moves_units_into_place() {
    let (_dir, store) = temp_store();
    let mut staged = store.stage().unwrap();
    staged
        .write_json("ScalarArrays/armA.json", &serde_json::json!([]), JsonStyle::Compact)
        .unwrap();
    staged.create_dir("CategoricalArrays").unwrap();
    staged
        .write_bytes("ScalarMetaData.json", b"{}")
        .unwrap();
    let committed = staged.commit(&store).unwrap();

    assert_eq!(committed.len(), 3);
    assert!(store.array_dir(ScalarKind::Scalar).join("armA.json").is_file());
    assert!(store.array_dir(ScalarKind::Categorical).is_dir());
    assert_eq!(fs::read_to_string(store.metadata_path()).unwrap(), "{}");
    let leftovers: Vec<_> = fs::read_dir(store.root())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".crabbit-stage"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn commit_replaces_previous_directory() {
    let (_dir, store) = temp_store();
    let stale = store.array_dir(ScalarKind::Scalar).join("old-arm.json");
    OutputStore::write_bytes_atomic(&stale, b"[]").unwrap();

    let mut staged = store.stage().unwrap();
    staged.write_bytes("ScalarArrays/armA.json", b"[]").unwrap();
    staged.commit(&store).unwrap();

    assert!(!stale.exists());
    assert!(store.array_dir(ScalarKind::Scalar).join("armA.json").exists());
}

#[test]
fn atomic_write_leaves_no_temp_file() {
    let (_dir, store) = temp_store();
    OutputStore::write_json_atomic(
        &store.scorings_path(),
        &serde_json::json!({"objectives": []}),
        JsonStyle::Pretty,
    )
    .unwrap();
    assert!(store.scorings_path().is_file());
    assert!(!store.scorings_path().with_extension("tmp").exists());
}
