use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Conflict, MergeOutcome};
use crate::error::CrabbitError;
use crate::identity::{IdentityKeyExtractor, PatientKey};

#[derive(Debug, Clone, PartialEq)]
pub struct Patient {
    pub id: String,
    key: PatientKey,
    id_field: &'static str,
    id_value: Value,
    /// Every field of the patient record except its identity.
    pub parameter_values: Map<String, Value>,
}

impl Patient {
    pub fn new(id: impl Into<String>, parameter_values: Map<String, Value>) -> Self {
        let id = id.into();
        Self {
            id_value: Value::String(id.clone()),
            key: PatientKey::Text(id.clone()),
            id,
            id_field: "patientIndex",
            parameter_values,
        }
    }

    fn from_json(source: &str, value: &Value) -> Result<Self, CrabbitError> {
        let object = value
            .as_object()
            .ok_or_else(|| CrabbitError::malformed(source, "patient entry is not an object"))?;
        let (id_field, key) = IdentityKeyExtractor::patient_key(object).ok_or_else(|| {
            CrabbitError::malformed(source, "patient entry has no \"patientIndex\" field")
        })?;
        let mut parameter_values = object.clone();
        let id_value = parameter_values.shift_remove(id_field).unwrap_or(Value::Null);
        Ok(Self {
            id: key.to_string(),
            key,
            id_field,
            id_value,
            parameter_values,
        })
    }

    fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.parameter_values.len() + 1);
        object.insert(self.id_field.to_string(), self.id_value.clone());
        object.extend(
            self.parameter_values
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum VpopShape {
    /// `{"patients": [...], ...}`, keeping the other top-level fields.
    Wrapped(Map<String, Value>),
    /// A bare array of patients.
    Bare,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualPopulation {
    pub name: String,
    pub patients: Vec<Patient>,
    shape: VpopShape,
}

impl VirtualPopulation {
    pub fn new(name: impl Into<String>, patients: Vec<Patient>) -> Self {
        Self {
            name: name.into(),
            patients,
            shape: VpopShape::Wrapped(Map::new()),
        }
    }

    pub fn from_json(name: &str, value: &Value) -> Result<Self, CrabbitError> {
        let (entries, shape) = match value {
            Value::Array(entries) => (entries, VpopShape::Bare),
            Value::Object(object) => {
                let entries = object
                    .get("patients")
                    .and_then(Value::as_array)
                    .ok_or_else(|| CrabbitError::malformed(name, "missing \"patients\" array"))?;
                let mut rest = object.clone();
                rest.shift_remove("patients");
                (entries, VpopShape::Wrapped(rest))
            }
            _ => {
                return Err(CrabbitError::malformed(
                    name,
                    "expected an object or an array of patients",
                ));
            }
        };
        let patients = entries
            .iter()
            .map(|entry| Patient::from_json(name, entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            patients,
            shape,
        })
    }

    pub fn to_json(&self) -> Value {
        let patients = Value::Array(self.patients.iter().map(Patient::to_json).collect());
        match &self.shape {
            VpopShape::Bare => patients,
            VpopShape::Wrapped(rest) => {
                let mut object = Map::with_capacity(rest.len() + 1);
                object.insert("patients".to_string(), patients);
                object.extend(rest.iter().map(|(key, value)| (key.clone(), value.clone())));
                Value::Object(object)
            }
        }
    }
}

pub struct VpopMerger;

impl VpopMerger {
    /// Merges populations keyed by patient identity.
    ///
    /// The first copy of a patient wins its position; later identical copies are dropped and a
    /// later copy with different parameter values makes the whole merge a conflict.
    pub fn merge(vpops: &[VirtualPopulation]) -> MergeOutcome<VirtualPopulation> {
        let Some(first) = vpops.first() else {
            return MergeOutcome::Merged(VirtualPopulation::new("", Vec::new()));
        };
        if vpops.len() == 1 {
            return MergeOutcome::Merged(first.clone());
        }

        let mut by_id: IndexMap<&PatientKey, (&str, &Patient)> = IndexMap::new();
        for vpop in vpops {
            for patient in &vpop.patients {
                match by_id.entry(&patient.key) {
                    Entry::Vacant(slot) => {
                        slot.insert((vpop.name.as_str(), patient));
                    }
                    Entry::Occupied(seen) => {
                        let (seen_in, seen_patient) = *seen.get();
                        if seen_patient.parameter_values != patient.parameter_values {
                            warn!(
                                patient = %patient.id,
                                first = seen_in,
                                second = %vpop.name,
                                "conflicting patient definitions"
                            );
                            return MergeOutcome::Conflict(Conflict::new(
                                format!("patient {}", patient.id),
                                format!(
                                    "defined differently in {seen_in} and {}",
                                    vpop.name
                                ),
                            ));
                        }
                        debug!(
                            patient = %patient.id,
                            source = %vpop.name,
                            "dropping duplicate patient"
                        );
                    }
                }
            }
        }

        let patients = by_id
            .into_values()
            .map(|(_, patient)| patient.clone())
            .collect();
        MergeOutcome::Merged(VirtualPopulation {
            name: first.name.clone(),
            patients,
            shape: first.shape.clone(),
        })
    }
}
