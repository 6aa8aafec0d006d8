use std::io::{Cursor, Read};

use serde_json::Value;
use zip::ZipArchive;

use crate::error::CrabbitError;
use crate::merge::CsvTable;

/// Inputs of a calibration or trial, as shipped in its bundle archive.
#[derive(Debug, Clone, Default)]
pub struct InputBundle {
    pub data_tables: Vec<CsvTable>,
    pub scorings: Vec<Value>,
}

/// Reads `data_tables/*.csv` and `scorings/*` from an in-memory bundle, in archive order.
pub fn read_bundle(bytes: &[u8]) -> Result<InputBundle, CrabbitError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| CrabbitError::malformed("bundle", err.to_string()))?;

    let mut bundle = InputBundle::default();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CrabbitError::malformed("bundle", err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        if let Some(rest) = name.strip_prefix("data_tables/") {
            if !rest.ends_with(".csv") {
                continue;
            }
            let table_name = rest.split('/').next().unwrap_or(rest).to_string();
            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|err| CrabbitError::malformed(&name, err.to_string()))?;
            bundle
                .data_tables
                .push(CsvTable::from_reader(&table_name, content.as_bytes())?);
        } else if name.starts_with("scorings") {
            let scoring: Value = serde_json::from_reader(&mut entry)
                .map_err(|err| CrabbitError::malformed(&name, err.to_string()))?;
            bundle.scorings.push(scoring);
        }
    }
    Ok(bundle)
}

/// Reads every `*.csv` entry of an in-memory archive, named after the entry's file name.
pub fn read_csv_archive(source: &str, bytes: &[u8]) -> Result<Vec<CsvTable>, CrabbitError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| CrabbitError::malformed(source, err.to_string()))?;

    let mut tables = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CrabbitError::malformed(source, err.to_string()))?;
        let name = entry.name().to_string();
        if entry.is_dir() || !name.ends_with(".csv") {
            continue;
        }
        let file_name = name.rsplit('/').next().unwrap_or(&name).to_string();
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|err| CrabbitError::malformed(&name, err.to_string()))?;
        tables.push(CsvTable::from_reader(&file_name, content.as_bytes())?);
    }
    Ok(tables)
}

/// Concatenates the `objectives` of every scoring file.
pub fn merge_objectives(scorings: &[Value]) -> Vec<Value> {
    scorings
        .iter()
        .filter_map(|scoring| scoring.get("objectives").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect()
}
