use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::{Builder, TempDir};
use tracing::debug;

use crate::domain::ScalarKind;
use crate::error::CrabbitError;

pub const REFERENCE_TABLE_FILE: &str = "ReferenceTimeSeries.csv";
pub const SCORINGS_FILE: &str = "Scorings.json";
pub const METADATA_FILE: &str = "ScalarMetaData.json";
pub const TIMESERIES_DIR: &str = "ModelResult";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStyle {
    Compact,
    /// Four-space indentation, used for merged artifacts meant to be read by people.
    Pretty,
}

pub fn to_json_bytes<T: Serialize>(value: &T, style: JsonStyle) -> Result<Vec<u8>, CrabbitError> {
    match style {
        JsonStyle::Compact => {
            serde_json::to_vec(value).map_err(|err| CrabbitError::Filesystem(err.to_string()))
        }
        JsonStyle::Pretty => {
            let mut buffer = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
            value
                .serialize(&mut serializer)
                .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
            Ok(buffer)
        }
    }
}

/// Output directory of one job.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn reference_table_path(&self) -> Utf8PathBuf {
        self.root.join(REFERENCE_TABLE_FILE)
    }

    pub fn scorings_path(&self) -> Utf8PathBuf {
        self.root.join(SCORINGS_FILE)
    }

    pub fn metadata_path(&self) -> Utf8PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn array_dir(&self, kind: ScalarKind) -> Utf8PathBuf {
        self.root.join(kind.array_dir())
    }

    pub fn ensure_root(&self) -> Result<(), CrabbitError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CrabbitError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_json_atomic<T: Serialize>(
        path: &Utf8Path,
        value: &T,
        style: JsonStyle,
    ) -> Result<(), CrabbitError> {
        let content = to_json_bytes(value, style)?;
        Self::write_bytes_atomic(path, &content)
    }

    /// Opens a staging area inside the output directory; nothing is visible until commit.
    pub fn stage(&self) -> Result<StagedOutput, CrabbitError> {
        self.ensure_root()?;
        let dir = Builder::new()
            .prefix(".crabbit-stage")
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| CrabbitError::Filesystem("invalid staging dir".to_string()))?;
        Ok(StagedOutput {
            _dir: dir,
            path,
            units: Vec::new(),
        })
    }
}

/// Files and directories written for one job, committed unit by unit with renames.
#[derive(Debug)]
pub struct StagedOutput {
    _dir: TempDir,
    path: Utf8PathBuf,
    units: Vec<String>,
}

impl StagedOutput {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Writes `relative` (e.g. `ScalarArrays/armA.json`) and records its top-level unit.
    pub fn write_bytes(&mut self, relative: &str, content: &[u8]) -> Result<(), CrabbitError> {
        let unit = relative.split('/').next().unwrap_or(relative).to_string();
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        }
        fs::write(target.as_std_path(), content)
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        if !self.units.contains(&unit) {
            self.units.push(unit);
        }
        Ok(())
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.path.join(relative).exists()
    }

    pub fn write_json<T: Serialize>(
        &mut self,
        relative: &str,
        value: &T,
        style: JsonStyle,
    ) -> Result<(), CrabbitError> {
        let content = to_json_bytes(value, style)?;
        self.write_bytes(relative, &content)
    }

    /// Declares an empty directory unit so it is created even without files.
    pub fn create_dir(&mut self, relative: &str) -> Result<(), CrabbitError> {
        fs::create_dir_all(self.path.join(relative).as_std_path())
            .map_err(|err| CrabbitError::Filesystem(err.to_string()))?;
        let unit = relative.split('/').next().unwrap_or(relative).to_string();
        if !self.units.contains(&unit) {
            self.units.push(unit);
        }
        Ok(())
    }

    /// Moves every unit into the output directory, replacing existing ones.
    pub fn commit(self, store: &OutputStore) -> Result<Vec<Utf8PathBuf>, CrabbitError> {
        let mut committed = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let from = self.path.join(unit);
            let to = store.root().join(unit);
            atomic_rename(from.as_std_path(), to.as_std_path())
                .map_err(|err| CrabbitError::Filesystem(format!("commit {to}: {err}")))?;
            debug!(path = %to, "output committed");
            committed.push(to);
        }
        Ok(committed)
    }
}

pub fn atomic_rename(from: &Path, to: &Path) -> io::Result<()> {
    if to.is_dir() {
        fs::remove_dir_all(to)?;
    } else if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}
