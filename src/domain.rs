use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CrabbitError;

/// Arm name the platform uses for patient-level scalars that belong to no single arm.
pub const CROSS_ARM: &str = "crossArms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Scalar,
    Categorical,
}

impl ScalarKind {
    /// Name of the per-arm array field in the reshaped records.
    pub fn values_field(self) -> &'static str {
        match self {
            ScalarKind::Scalar => "scalarValues",
            ScalarKind::Categorical => "categoricalLevels",
        }
    }

    /// Directory holding one JSON array per arm.
    pub fn array_dir(self) -> &'static str {
        match self {
            ScalarKind::Scalar => "ScalarArrays",
            ScalarKind::Categorical => "CategoricalArrays",
        }
    }

    pub fn carries_units(self) -> bool {
        matches!(self, ScalarKind::Scalar)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Scalar => write!(f, "scalar"),
            ScalarKind::Categorical => write!(f, "categorical"),
        }
    }
}

/// Short id and optional revision of a project item, parsed from its web URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectItemUrl {
    pub sid: String,
    pub revision: Option<u32>,
}

impl FromStr for ProjectItemUrl {
    type Err = CrabbitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^https?://[^/?#]+/([^/?#]+)/?(?:\?(.*))?$").unwrap();
        let captures = re
            .captures(value.trim())
            .ok_or_else(|| CrabbitError::InvalidProjectItemUrl(value.to_string()))?;
        let sid = captures[1].to_string();
        if !sid.contains('-') {
            return Err(CrabbitError::InvalidProjectItemUrl(value.to_string()));
        }

        let mut revision = None;
        if let Some(query) = captures.get(2) {
            for pair in query.as_str().split('&') {
                if let Some(raw) = pair.strip_prefix("revision=") {
                    let parsed = raw
                        .parse()
                        .map_err(|_| CrabbitError::InvalidProjectItemUrl(value.to_string()))?;
                    revision = Some(parsed);
                }
            }
        }
        Ok(Self { sid, revision })
    }
}

impl fmt::Display for ProjectItemUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision {
            Some(revision) => write!(f, "{}?revision={revision}", self.sid),
            None => write!(f, "{}", self.sid),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreItemId {
    pub id: String,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectItem {
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub core_id: Option<CoreItemId>,
    #[serde(default)]
    pub version: Option<ItemVersion>,
}

impl ProjectItem {
    /// Label of a named version, if the item points at one.
    pub fn version_label(&self) -> Option<&str> {
        self.version
            .as_ref()
            .and_then(|version| version.label.as_deref())
            .filter(|label| !label.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemVersion {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStatus {
    NotLaunched,
    Running,
    Completed,
    Other,
}

impl CalibrationStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "not_launched" => CalibrationStatus::NotLaunched,
            "running" => CalibrationStatus::Running,
            "completed" => CalibrationStatus::Completed,
            _ => CalibrationStatus::Other,
        }
    }
}

/// A calibration patient as returned by the sorted-patients endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationPatient {
    #[serde(deserialize_with = "string_or_number")]
    pub patient_number: String,
    pub iteration: u64,
}

/// Patient numbers come back as strings or integers depending on the endpoint.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or a number, found {other}"
        ))),
    }
}
