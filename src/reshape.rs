//! Single-patient calibration results reshaped into the multi-patient array layout.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::ScalarKind;
use crate::error::CrabbitError;
use crate::metadata::{MetadataAggregator, MetadataIndex};

/// Body of the per-patient scalar results endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarResultResponse {
    #[serde(default)]
    pub outputs: Vec<ArmOutput>,
    #[serde(default)]
    pub outputs_categorical: Vec<ArmOutput>,
}

/// Results of one patient in one arm.
#[derive(Debug, Clone, Deserialize)]
pub struct ArmOutput {
    #[serde(default)]
    pub group: Vec<GroupEntry>,
    #[serde(default)]
    pub indexes: Option<OutputIndexes>,
    #[serde(default)]
    pub res: Vec<ScalarRecord>,
}

impl ArmOutput {
    pub fn arm_name(&self) -> Option<&str> {
        self.group.first().and_then(|group| group.contents.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupEntry {
    #[serde(default)]
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputIndexes {
    #[serde(default)]
    pub patient_number: Option<Value>,
}

impl OutputIndexes {
    fn patient(&self) -> Option<String> {
        match self.patient_number.as_ref()? {
            Value::String(number) => Some(number.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

/// One measurement for one patient in one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    #[serde(alias = "scalarId")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub scalar_type: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `None` only when the key is absent; an explicit `null` is kept.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A record in the array layout: `value`/`error` become parallel arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub scalar_type: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorical_levels: Option<Vec<Value>>,
    pub errors: Vec<Value>,
}

impl ArrayRecord {
    pub fn from_record(record: ScalarRecord, kind: ScalarKind) -> Self {
        let values: Vec<Value> = record.value.into_iter().collect();
        let errors: Vec<Value> = record.error.into_iter().collect();
        let (scalar_values, categorical_levels) = match kind {
            ScalarKind::Scalar => (Some(values), None),
            ScalarKind::Categorical => (None, Some(values)),
        };
        Self {
            id: record.id,
            scalar_type: record.scalar_type,
            unit: record.unit,
            description: record.description,
            extra: record.extra,
            scalar_values,
            categorical_levels,
            errors,
        }
    }

    pub fn values(&self) -> &[Value] {
        self.scalar_values
            .as_deref()
            .or(self.categorical_levels.as_deref())
            .unwrap_or_default()
    }
}

/// Reshaped records of one kind, one array per arm in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReshapedResults {
    pub kind: ScalarKind,
    pub arms: IndexMap<String, Vec<ArrayRecord>>,
}

impl ReshapedResults {
    pub fn record_count(&self) -> usize {
        self.arms.values().map(Vec::len).sum()
    }
}

/// Reshapes one patient's results and feeds the metadata index in the same pass.
///
/// The reshaper owns its aggregator, so a failed reshape drops every partial observation
/// together with the reshaper.
#[derive(Debug)]
pub struct ScalarResultReshaper {
    patient_number: String,
    aggregator: MetadataAggregator,
}

impl ScalarResultReshaper {
    pub fn new(patient_number: impl Into<String>, aggregator: MetadataAggregator) -> Self {
        Self {
            patient_number: patient_number.into(),
            aggregator,
        }
    }

    pub fn reshape(
        &mut self,
        arm_results: &[ArmOutput],
        kind: ScalarKind,
    ) -> Result<ReshapedResults, CrabbitError> {
        let mut arms: IndexMap<String, Vec<ArrayRecord>> = IndexMap::new();
        for (position, output) in arm_results.iter().enumerate() {
            let arm = output.arm_name().ok_or_else(|| {
                CrabbitError::malformed(
                    format!("{kind} results"),
                    format!("output #{position} has no group[0].contents arm name"),
                )
            })?;
            let patient = output
                .indexes
                .as_ref()
                .and_then(OutputIndexes::patient)
                .ok_or_else(|| {
                    CrabbitError::invariant(
                        format!("{kind} results of arm {arm}"),
                        "missing indexes.patientNumber",
                    )
                })?;
            if patient != self.patient_number {
                return Err(CrabbitError::invariant(
                    format!("{kind} results of arm {arm}"),
                    format!(
                        "patient number mismatch: requested {}, received {patient}",
                        self.patient_number
                    ),
                ));
            }

            let records = arms.entry(arm.to_string()).or_default();
            for record in &output.res {
                self.aggregator.observe(record, arm, kind);
                records.push(ArrayRecord::from_record(record.clone(), kind));
            }
            debug!(%kind, arm, records = output.res.len(), "arm reshaped");
        }
        Ok(ReshapedResults { kind, arms })
    }

    /// Reshapes both the scalar and the categorical outputs of a response.
    pub fn reshape_response(
        &mut self,
        response: &ScalarResultResponse,
    ) -> Result<(ReshapedResults, ReshapedResults), CrabbitError> {
        let scalars = self.reshape(&response.outputs, ScalarKind::Scalar)?;
        let categoricals = self.reshape(&response.outputs_categorical, ScalarKind::Categorical)?;
        Ok((scalars, categoricals))
    }

    pub fn aggregator_mut(&mut self) -> &mut MetadataAggregator {
        &mut self.aggregator
    }

    pub fn finish(self) -> MetadataIndex {
        self.aggregator.finalize()
    }
}
