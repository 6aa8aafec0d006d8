//! Structural mergers for virtual populations, virtual-population designs and data tables.
//!
//! A merger never resolves a disagreement between its inputs: it either produces one merged
//! artifact or reports a [`Conflict`] and leaves the decision to the caller.

use std::fmt;

pub mod design;
pub mod table;
pub mod vpop;

pub use self::design::{VpopDesign, VpopDesignMerger};
pub use self::table::{CsvMergeOutcome, CsvTable, CsvTableMerger, MANDATORY_COLUMNS};
pub use self::vpop::{Patient, VirtualPopulation, VpopMerger};

/// Why two inputs could not be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The artifact (file, table, dimension or patient) the disagreement was found on.
    pub artifact: String,
    pub reason: String,
}

impl Conflict {
    pub fn new(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.artifact, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum MergeOutcome<T> {
    Merged(T),
    Conflict(Conflict),
}

impl<T> MergeOutcome<T> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeOutcome::Conflict(_))
    }

    pub fn merged(self) -> Option<T> {
        match self {
            MergeOutcome::Merged(value) => Some(value),
            MergeOutcome::Conflict(_) => None,
        }
    }
}
