use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::CrabbitError;

pub const DEFAULT_BASE_URL: &str = "https://api.jinko.ai";
pub const DEFAULT_PATIENT_LABEL: &str = "CalibratedPatient";
pub const CONFIG_FILE: &str = "crabbit.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub patient_label: Option<String>,
}

/// Connection context passed explicitly to the platform client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub base_url: String,
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub patient_label: String,
}

impl Session {
    pub fn credentials(&self) -> Result<(&str, &str), CrabbitError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CrabbitError::MissingCredential("API key (JINKO_API_KEY)".to_string()))?;
        let project_id = self.project_id.as_deref().ok_or_else(|| {
            CrabbitError::MissingCredential("project id (JINKO_PROJECT_ID)".to_string())
        })?;
        Ok((api_key, project_id))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: None,
            api_key: None,
            patient_label: DEFAULT_PATIENT_LABEL.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `--config <path>`, else the first existing default config file,
    /// then applies the `JINKO_*` environment variables.
    pub fn resolve(path: Option<&str>) -> Result<Session, CrabbitError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => match Self::default_paths().into_iter().find(|path| path.exists()) {
                Some(path) => Self::read(path)?,
                None => Config::default(),
            },
        };
        Ok(Self::resolve_config(config, |key| std::env::var(key).ok()))
    }

    /// `./crabbit.json`, then `<user config dir>/crabbit/crabbit.json`.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dirs) = BaseDirs::new() {
            paths.push(dirs.config_dir().join("crabbit").join(CONFIG_FILE));
        }
        paths
    }

    fn read(path: PathBuf) -> Result<Config, CrabbitError> {
        let content =
            fs::read_to_string(&path).map_err(|_| CrabbitError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| CrabbitError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config<F>(config: Config, env: F) -> Session
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, file_value: Option<String>| {
            env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| file_value.filter(|value| !value.trim().is_empty()))
        };

        Session {
            base_url: pick("JINKO_BASE_URL", config.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            project_id: pick("JINKO_PROJECT_ID", config.project_id),
            api_key: pick("JINKO_API_KEY", config.api_key),
            patient_label: config
                .patient_label
                .unwrap_or_else(|| DEFAULT_PATIENT_LABEL.to_string()),
        }
    }
}
