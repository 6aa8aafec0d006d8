use std::path::Path;

use assert_matches::assert_matches;

use crabbit::merge::{CsvMergeOutcome, CsvTable, CsvTableMerger, MANDATORY_COLUMNS};

fn load(name: &str) -> CsvTable {
    CsvTable::from_path(&Path::new("tests/fixtures").join(name)).unwrap()
}

#[test]
fn merge_csv_success() {
    let outcome = CsvTableMerger::merge(&[load("csv-A.csv"), load("csv-B.csv")]);
    let expected = load("csv-merged.csv");
    assert_matches!(outcome, CsvMergeOutcome::Single { table, trimmed: false } => {
        assert_eq!(table.headers, expected.headers);
        assert_eq!(table.rows, expected.rows);
    });
}

#[test]
fn merge_csv_conflict() {
    let outcome = CsvTableMerger::merge(&[load("csv-A.csv"), load("csv-D.csv")]);
    assert_matches!(outcome, CsvMergeOutcome::Conflict(conflict) => {
        assert_eq!(conflict.artifact, "csv-D.csv");
    });
}

#[test]
fn extra_columns_fall_back_to_mandatory_ones() {
    let outcome = CsvTableMerger::merge(&[load("csv-A.csv"), load("csv-C.csv")]);
    assert_matches!(outcome, CsvMergeOutcome::Single { table, trimmed: true } => {
        let mut expected: Vec<String> = MANDATORY_COLUMNS.iter().map(|c| c.to_string()).collect();
        expected.push("dataTableID".to_string());
        assert_eq!(table.headers, expected);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0].last().unwrap(), "csv-A");
        assert_eq!(table.rows[2][3], "0.6");
        assert_eq!(table.rows[2].last().unwrap(), "csv-C");
    });
}

#[test]
fn single_table_is_returned_unchanged() {
    let table = load("csv-C.csv");
    assert_eq!(
        CsvTableMerger::merge(std::slice::from_ref(&table)),
        CsvMergeOutcome::Single {
            table,
            trimmed: false
        }
    );
}

#[test]
fn download_policy_keeps_conflicting_tables_separate() {
    let outcome =
        CsvTableMerger::merge_or_keep_separate(vec![load("csv-A.csv"), load("csv-D.csv")]);
    assert_matches!(outcome, CsvMergeOutcome::Separate(tables) => {
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["csv-A.csv", "csv-D.csv"]);
    });
}
