use std::fmt;

use serde_json::{Map, Value};

/// Field names accepted as a patient's identity, in lookup order.
pub const PATIENT_ID_FIELDS: [&str; 2] = ["patientIndex", "patientId"];

/// Identity of one dimension inside a virtual-population design.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimensionKey {
    /// Marginal records (`marginalDistributions`, `marginalCategoricals`, mapping keys).
    Id(String),
    /// Correlation between two dimensions, stored with the smaller name first.
    Pair(String, String),
    /// A top-level design value that is neither a list nor a mapping.
    Section(String),
}

impl DimensionKey {
    pub fn pair(x: &str, y: &str) -> Self {
        if x <= y {
            DimensionKey::Pair(x.to_string(), y.to_string())
        } else {
            DimensionKey::Pair(y.to_string(), x.to_string())
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionKey::Id(id) => write!(f, "{id}"),
            DimensionKey::Pair(x, y) => write!(f, "({x}, {y})"),
            DimensionKey::Section(name) => write!(f, "{name}"),
        }
    }
}

/// Identity of a patient. `3` and `"3"` are different patients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatientKey {
    Text(String),
    Number(String),
}

impl fmt::Display for PatientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientKey::Text(id) | PatientKey::Number(id) => write!(f, "{id}"),
        }
    }
}

pub struct IdentityKeyExtractor;

impl IdentityKeyExtractor {
    /// Returns the identity field name and the typed key found under it.
    pub fn patient_key(patient: &Map<String, Value>) -> Option<(&'static str, PatientKey)> {
        PATIENT_ID_FIELDS.iter().find_map(|field| {
            let key = match patient.get(*field)? {
                Value::String(value) => PatientKey::Text(value.clone()),
                Value::Number(value) => PatientKey::Number(value.to_string()),
                _ => return None,
            };
            Some((*field, key))
        })
    }

    pub fn dimension_key(section: &str, record: &Value) -> Result<DimensionKey, String> {
        let object = record
            .as_object()
            .ok_or_else(|| format!("entry of \"{section}\" is not an object"))?;

        let x = object.get("x").and_then(Value::as_str);
        let y = object.get("y").and_then(Value::as_str);
        if let (Some(x), Some(y)) = (x, y) {
            return Ok(DimensionKey::pair(x, y));
        }
        if let Some(id) = object.get("id").and_then(Value::as_str) {
            return Ok(DimensionKey::Id(id.to_string()));
        }
        Err(format!(
            "entry of \"{section}\" has neither an \"id\" nor an \"x\"/\"y\" pair"
        ))
    }

    /// Provenance tag of a data table: its file name without directories or the `.csv` suffix.
    pub fn data_table_id(table_name: &str) -> String {
        let file_name = table_name.rsplit(['/', '\\']).next().unwrap_or(table_name);
        match file_name.split_once(".csv") {
            Some((stem, _)) => stem.to_string(),
            None => file_name.to_string(),
        }
    }
}
