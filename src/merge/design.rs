use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Conflict, MergeOutcome};
use crate::error::CrabbitError;
use crate::identity::{DimensionKey, IdentityKeyExtractor};

#[derive(Debug, Clone, PartialEq)]
enum Section {
    /// Array of dimension records (`marginalDistributions`, `correlations`, ...).
    List(IndexMap<DimensionKey, Value>),
    /// Object keyed by dimension id.
    Mapping(IndexMap<DimensionKey, Value>),
    Single(Value),
}

impl Section {
    fn kind(&self) -> &'static str {
        match self {
            Section::List(_) => "list",
            Section::Mapping(_) => "mapping",
            Section::Single(_) => "value",
        }
    }

    fn dimension_count(&self) -> usize {
        match self {
            Section::List(dims) | Section::Mapping(dims) => dims.len(),
            Section::Single(_) => 1,
        }
    }

    /// Adds the dimensions of `other` that are not present yet; a shared dimension must be equal.
    fn absorb(&mut self, name: &str, other: &Section, source: &str) -> Result<(), Conflict> {
        match (self, other) {
            (Section::List(dims), Section::List(incoming))
            | (Section::Mapping(dims), Section::Mapping(incoming)) => {
                for (key, value) in incoming {
                    match dims.get(key) {
                        Some(existing) if !same_dimension(key, existing, value) => {
                            return Err(Conflict::new(
                                format!("dimension {key} of \"{name}\""),
                                format!("redefined differently by {source}"),
                            ));
                        }
                        Some(_) => {}
                        None => {
                            dims.insert(key.clone(), value.clone());
                        }
                    }
                }
                Ok(())
            }
            (Section::Single(existing), Section::Single(value)) => {
                if existing != value {
                    return Err(Conflict::new(
                        format!("\"{name}\""),
                        format!("redefined differently by {source}"),
                    ));
                }
                Ok(())
            }
            (current, other) => Err(Conflict::new(
                format!("\"{name}\""),
                format!(
                    "is a {} but {source} defines it as a {}",
                    current.kind(),
                    other.kind()
                ),
            )),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Section::List(dims) => Value::Array(dims.values().cloned().collect()),
            Section::Mapping(dims) => Value::Object(
                dims.iter()
                    .map(|(key, value)| (key.to_string(), value.clone()))
                    .collect(),
            ),
            Section::Single(value) => value.clone(),
        }
    }
}

/// Correlations are symmetric: `{x: a, y: b}` and `{x: b, y: a}` describe the same dimension.
fn same_dimension(key: &DimensionKey, left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    let (DimensionKey::Pair(..), Some(right)) = (key, right.as_object()) else {
        return false;
    };
    let mut swapped = right.clone();
    let x = swapped.get("x").cloned();
    let y = swapped.get("y").cloned();
    if let (Some(x), Some(y)) = (x, y) {
        swapped.insert("x".to_string(), y);
        swapped.insert("y".to_string(), x);
    }
    left.as_object() == Some(&swapped)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VpopDesign {
    pub name: String,
    sections: IndexMap<String, Section>,
}

impl VpopDesign {
    pub fn from_json(name: &str, value: &Value) -> Result<Self, CrabbitError> {
        let object = value
            .as_object()
            .ok_or_else(|| CrabbitError::malformed(name, "a design must be a JSON object"))?;

        let mut sections = IndexMap::with_capacity(object.len());
        for (section, content) in object {
            let parsed = match content {
                Value::Array(records) => {
                    let mut dims = IndexMap::with_capacity(records.len());
                    for record in records {
                        let key = IdentityKeyExtractor::dimension_key(section, record)
                            .map_err(|reason| CrabbitError::malformed(name, reason))?;
                        if dims.contains_key(&key) {
                            return Err(CrabbitError::malformed(
                                name,
                                format!("dimension {key} appears twice in \"{section}\""),
                            ));
                        }
                        dims.insert(key, record.clone());
                    }
                    Section::List(dims)
                }
                Value::Object(entries) => Section::Mapping(
                    entries
                        .iter()
                        .map(|(key, value)| (DimensionKey::Id(key.clone()), value.clone()))
                        .collect(),
                ),
                other => Section::Single(other.clone()),
            };
            sections.insert(section.clone(), parsed);
        }

        Ok(Self {
            name: name.to_string(),
            sections,
        })
    }

    pub fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .sections
            .iter()
            .map(|(name, section)| (name.clone(), section.to_json()))
            .collect();
        Value::Object(object)
    }

    pub fn dimension_count(&self) -> usize {
        self.sections.values().map(Section::dimension_count).sum()
    }
}

pub struct VpopDesignMerger;

impl VpopDesignMerger {
    /// All-or-nothing union of designs: one mismatching dimension rejects the whole merge.
    pub fn merge(designs: &[VpopDesign]) -> MergeOutcome<VpopDesign> {
        let Some(first) = designs.first() else {
            return MergeOutcome::Merged(VpopDesign {
                name: String::new(),
                sections: IndexMap::new(),
            });
        };
        if designs.len() == 1 {
            return MergeOutcome::Merged(first.clone());
        }

        let mut sections: IndexMap<String, Section> = IndexMap::new();
        for design in designs {
            for (name, section) in &design.sections {
                match sections.entry(name.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(section.clone());
                    }
                    Entry::Occupied(mut slot) => {
                        if let Err(conflict) = slot.get_mut().absorb(name, section, &design.name)
                        {
                            warn!(design = %design.name, %conflict, "design merge rejected");
                            return MergeOutcome::Conflict(conflict);
                        }
                    }
                }
            }
            debug!(design = %design.name, "design absorbed");
        }

        MergeOutcome::Merged(VpopDesign {
            name: first.name.clone(),
            sections,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn swapped_correlation_is_not_a_conflict() {
        let a = VpopDesign::from_json(
            "a",
            &json!({"correlations": [{"x": "k1", "y": "k2", "correlation": 0.5}]}),
        )
        .unwrap();
        let b = VpopDesign::from_json(
            "b",
            &json!({"correlations": [{"x": "k2", "y": "k1", "correlation": 0.5}]}),
        )
        .unwrap();
        let merged = VpopDesignMerger::merge(&[a.clone(), b]).merged().unwrap();
        assert_eq!(merged.to_json(), a.to_json());
    }

    #[test]
    fn section_kind_mismatch_is_a_conflict() {
        let a = VpopDesign::from_json("a", &json!({"marginalDistributions": []})).unwrap();
        let b = VpopDesign::from_json("b", &json!({"marginalDistributions": {}})).unwrap();
        assert!(VpopDesignMerger::merge(&[a, b]).is_conflict());
    }

    #[test]
    fn duplicate_dimension_inside_one_design_is_malformed() {
        let err = VpopDesign::from_json(
            "dup",
            &json!({"marginalDistributions": [{"id": "k"}, {"id": "k"}]}),
        )
        .unwrap_err();
        assert!(matches!(err, CrabbitError::MalformedInput { .. }));
    }
}
