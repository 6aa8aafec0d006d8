use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::Conflict;
use crate::error::CrabbitError;
use crate::identity::IdentityKeyExtractor;

/// Columns every reference data table carries; the trimming fallback keeps only these.
pub const MANDATORY_COLUMNS: [&str; 8] = [
    "armScope",
    "obsId",
    "time",
    "value",
    "narrowRangeLowBound",
    "narrowRangeHighBound",
    "wideRangeLowBound",
    "wideRangeHighBound",
];

/// Column added by the trimming fallback, naming the table each row came from.
pub const PROVENANCE_COLUMN: &str = "dataTableID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Reads a table with a header row. Ragged rows are kept as-is; the merger decides about them.
    pub fn from_reader<R: Read>(name: &str, reader: R) -> Result<Self, CrabbitError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| CrabbitError::malformed(name, err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.is_empty() {
            return Err(CrabbitError::malformed(name, "missing header row"));
        }
        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|record| record.iter().map(str::to_string).collect())
                    .map_err(|err| CrabbitError::malformed(name, err.to_string()))
            })
            .collect::<Result<Vec<Vec<String>>, _>>()?;
        Ok(Self::new(name, headers, rows))
    }

    pub fn from_path(path: &Path) -> Result<Self, CrabbitError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)
            .map_err(|err| CrabbitError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_reader(&name, file)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), CrabbitError> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::CRLF)
            .from_writer(writer);
        writer
            .write_record(&self.headers)
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CrabbitError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == column)
    }

    fn ragged_row(&self) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.len() != self.headers.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CsvMergeOutcome {
    /// One table; `trimmed` is set when only the mandatory columns survived.
    Single { table: CsvTable, trimmed: bool },
    /// The inputs, unchanged, one per file.
    Separate(Vec<CsvTable>),
    Conflict(Conflict),
}

pub struct CsvTableMerger;

impl CsvTableMerger {
    /// Concatenates tables sharing a column set, falling back to the mandatory columns.
    ///
    /// Schema disagreements and malformed shapes are both reported as
    /// [`CsvMergeOutcome::Conflict`].
    pub fn merge(tables: &[CsvTable]) -> CsvMergeOutcome {
        match tables {
            [] => {
                return CsvMergeOutcome::Conflict(Conflict::new(
                    "data tables",
                    "nothing to merge",
                ));
            }
            [single] => {
                return CsvMergeOutcome::Single {
                    table: single.clone(),
                    trimmed: false,
                };
            }
            _ => {}
        }

        let direct = match Self::concatenate(tables) {
            Ok(table) => {
                debug!(tables = tables.len(), rows = table.rows.len(), "tables concatenated");
                return CsvMergeOutcome::Single {
                    table,
                    trimmed: false,
                };
            }
            Err(conflict) => conflict,
        };

        match Self::trim_and_concatenate(tables) {
            Ok(table) => {
                warn!(
                    reason = %direct,
                    "data tables trimmed to the mandatory columns before merging"
                );
                CsvMergeOutcome::Single {
                    table,
                    trimmed: true,
                }
            }
            Err(conflict) => {
                warn!(%conflict, "data tables cannot be merged");
                CsvMergeOutcome::Conflict(conflict)
            }
        }
    }

    /// Call-site policy of the download job: a conflict keeps every table in its own file.
    pub fn merge_or_keep_separate(tables: Vec<CsvTable>) -> CsvMergeOutcome {
        match Self::merge(&tables) {
            CsvMergeOutcome::Conflict(_) => CsvMergeOutcome::Separate(tables),
            outcome => outcome,
        }
    }

    fn concatenate(tables: &[CsvTable]) -> Result<CsvTable, Conflict> {
        let first = &tables[0];
        let columns: HashSet<&str> = first.headers.iter().map(String::as_str).collect();
        if columns.len() != first.headers.len() {
            return Err(Conflict::new(&first.name, "duplicated column name"));
        }

        let total = tables.iter().map(|table| table.rows.len()).sum();
        let mut rows: Vec<Vec<String>> = Vec::with_capacity(total);
        for table in tables {
            if let Some(index) = table.ragged_row() {
                return Err(Conflict::new(
                    &table.name,
                    format!("row {} does not match the header width", index + 1),
                ));
            }
            let other: HashSet<&str> = table.headers.iter().map(String::as_str).collect();
            if other != columns || table.headers.len() != first.headers.len() {
                return Err(Conflict::new(
                    &table.name,
                    format!("columns differ from {}", first.name),
                ));
            }
            // Later tables may list the same columns in another order.
            let order: Vec<usize> = first
                .headers
                .iter()
                .filter_map(|column| table.column_index(column))
                .collect();
            rows.extend(
                table
                    .rows
                    .iter()
                    .map(|row| order.iter().map(|&index| row[index].clone()).collect()),
            );
        }

        Ok(CsvTable::new(first.name.clone(), first.headers.clone(), rows))
    }

    fn trim_and_concatenate(tables: &[CsvTable]) -> Result<CsvTable, Conflict> {
        let mut headers: Vec<String> = MANDATORY_COLUMNS.iter().map(|c| c.to_string()).collect();
        headers.push(PROVENANCE_COLUMN.to_string());

        let mut rows = Vec::new();
        for table in tables {
            let indexes = MANDATORY_COLUMNS
                .iter()
                .map(|column| {
                    table.column_index(column).ok_or_else(|| {
                        Conflict::new(
                            &table.name,
                            format!("lacks the mandatory column \"{column}\""),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let data_table_id = IdentityKeyExtractor::data_table_id(&table.name);
            for (number, row) in table.rows.iter().enumerate() {
                let mut projected = Vec::with_capacity(headers.len());
                for &index in &indexes {
                    let cell = row.get(index).ok_or_else(|| {
                        Conflict::new(
                            &table.name,
                            format!("row {} is shorter than the mandatory columns", number + 1),
                        )
                    })?;
                    projected.push(cell.clone());
                }
                projected.push(data_table_id.clone());
                rows.push(projected);
            }
        }

        Ok(CsvTable::new(tables[0].name.clone(), headers, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, text: &str) -> CsvTable {
        CsvTable::from_reader(name, text.as_bytes()).unwrap()
    }

    #[test]
    fn reordered_columns_are_aligned_on_the_first_table() {
        let a = table("a.csv", "x,y\n1,2\n");
        let b = table("b.csv", "y,x\n4,3\n");
        let CsvMergeOutcome::Single { table, trimmed } = CsvTableMerger::merge(&[a, b]) else {
            panic!("expected a merged table");
        };
        assert!(!trimmed);
        assert_eq!(table.rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }

    #[test]
    fn ragged_table_is_not_concatenated() {
        let a = table("a.csv", "x,y\n1,2\n");
        let b = table("b.csv", "x,y\n1\n");
        assert!(matches!(
            CsvTableMerger::merge(&[a, b]),
            CsvMergeOutcome::Conflict(_)
        ));
    }

    #[test]
    fn written_rows_end_with_crlf() {
        let a = table("a.csv", "x,y\n1,2\n");
        let bytes = a.to_bytes().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "x,y\r\n1,2\r\n");
    }

    #[test]
    fn keep_separate_policy_returns_inputs() {
        let a = table("a.csv", "x\n1\n");
        let b = table("b.csv", "z\n2\n");
        let outcome = CsvTableMerger::merge_or_keep_separate(vec![a.clone(), b.clone()]);
        assert_eq!(outcome, CsvMergeOutcome::Separate(vec![a, b]));
    }
}
