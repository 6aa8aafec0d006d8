//! Flattened, scalar-id-indexed description of calibration results (`ScalarMetaData.json`).

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{CROSS_ARM, ScalarKind};
use crate::reshape::ScalarRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarMetadataEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub scalar_type: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Value>,
    #[serde(default)]
    pub description: String,
    /// Arms the scalar was observed under; absent for cross-arm entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arms: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataIndex {
    pub arms: Vec<String>,
    pub patients: Vec<String>,
    pub scalars: Vec<ScalarMetadataEntry>,
    pub categoricals: Vec<ScalarMetadataEntry>,
    pub scalars_cross_arm: Vec<ScalarMetadataEntry>,
    pub categoricals_cross_arm: Vec<ScalarMetadataEntry>,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    scalar_type: Value,
    unit: Option<Value>,
    description: String,
    arms: IndexSet<String>,
}

impl PendingEntry {
    fn flatten(self, id: String, cross_arm: bool) -> ScalarMetadataEntry {
        ScalarMetadataEntry {
            id,
            scalar_type: self.scalar_type,
            unit: self.unit,
            description: self.description,
            arms: (!cross_arm).then(|| self.arms.into_iter().collect()),
        }
    }
}

type EntryMap = IndexMap<String, PendingEntry>;

/// Accumulates metadata while results are reshaped; every collection keeps insertion order.
#[derive(Debug, Clone, Default)]
pub struct MetadataAggregator {
    arms: IndexSet<String>,
    patients: IndexSet<String>,
    scalars: EntryMap,
    categoricals: EntryMap,
    scalars_cross_arm: EntryMap,
    categoricals_cross_arm: EntryMap,
}

impl MetadataAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a known arm order (the results summary's); observed arms are appended after it.
    pub fn with_arms<I, S>(arms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut aggregator = Self::new();
        for arm in arms {
            let arm = arm.into();
            if arm != CROSS_ARM {
                aggregator.arms.insert(arm);
            }
        }
        aggregator
    }

    pub fn add_patient(&mut self, label: impl Into<String>) {
        self.patients.insert(label.into());
    }

    pub fn observe(&mut self, record: &ScalarRecord, arm: &str, kind: ScalarKind) {
        let cross_arm = arm == CROSS_ARM;
        if !cross_arm {
            self.arms.insert(arm.to_string());
        }
        let entries = match (kind, cross_arm) {
            (ScalarKind::Scalar, false) => &mut self.scalars,
            (ScalarKind::Categorical, false) => &mut self.categoricals,
            (ScalarKind::Scalar, true) => &mut self.scalars_cross_arm,
            (ScalarKind::Categorical, true) => &mut self.categoricals_cross_arm,
        };
        let entry = entries
            .entry(record.id.clone())
            .or_insert_with(|| PendingEntry {
                scalar_type: record.scalar_type.clone(),
                unit: if kind.carries_units() {
                    record.unit.clone()
                } else {
                    None
                },
                description: record.description.clone().unwrap_or_default(),
                arms: IndexSet::new(),
            });
        if !cross_arm {
            entry.arms.insert(arm.to_string());
        }
    }

    pub fn finalize(self) -> MetadataIndex {
        fn flatten(entries: EntryMap, cross_arm: bool) -> Vec<ScalarMetadataEntry> {
            entries
                .into_iter()
                .map(|(id, entry)| entry.flatten(id, cross_arm))
                .collect()
        }

        MetadataIndex {
            arms: self.arms.into_iter().collect(),
            patients: self.patients.into_iter().collect(),
            scalars: flatten(self.scalars, false),
            categoricals: flatten(self.categoricals, false),
            scalars_cross_arm: flatten(self.scalars_cross_arm, true),
            categoricals_cross_arm: flatten(self.categoricals_cross_arm, true),
        }
    }
}
