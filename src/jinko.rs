use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Session;
use crate::domain::{
    CalibrationPatient, CalibrationStatus, CoreItemId, ProjectItem, ProjectItemUrl,
    string_or_number,
};
use crate::error::CrabbitError;
use crate::reshape::ScalarResultResponse;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSummary {
    #[serde(default)]
    pub arms: Vec<String>,
    #[serde(default)]
    pub scalars: Vec<SummaryItem>,
    #[serde(default)]
    pub scalars_cross_arm: Vec<SummaryItem>,
    #[serde(default)]
    pub categoricals: Vec<SummaryItem>,
    #[serde(default)]
    pub categoricals_cross_arm: Vec<SummaryItem>,
    #[serde(default)]
    pub timeseries: Vec<SummaryItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryItem {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarsRequest {
    pub patient_number: String,
    pub iteration: u64,
    pub arms: Vec<String>,
    pub scalars: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categoricals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesRequest {
    pub patient_id: String,
    pub iteration: u64,
    pub select: Vec<String>,
}

/// Time series of one patient in one arm.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmTimeseries {
    pub scenario_arm: String,
    #[serde(deserialize_with = "string_or_number")]
    pub patient_number: String,
    pub res: Value,
}

/// Calls the platform needs to answer for the download job.
pub trait JinkoClient: Send + Sync {
    fn project_item(&self, url: &ProjectItemUrl) -> Result<ProjectItem, CrabbitError>;
    fn calibration_status(&self, core_id: &CoreItemId) -> Result<CalibrationStatus, CrabbitError>;
    /// Zip archive holding the calibration's data tables and scorings.
    fn calibration_bundle(&self, core_id: &CoreItemId) -> Result<Vec<u8>, CrabbitError>;
    /// Patient with the highest `optimizationWeightedScore`, if any.
    fn best_calibration_patient(
        &self,
        core_id: &CoreItemId,
    ) -> Result<Option<CalibrationPatient>, CrabbitError>;
    fn results_summary(&self, core_id: &CoreItemId) -> Result<ResultsSummary, CrabbitError>;
    fn scalars_per_patient(
        &self,
        core_id: &CoreItemId,
        request: &ScalarsRequest,
    ) -> Result<ScalarResultResponse, CrabbitError>;
    /// Zip archive of the data tables augmented with the patient's simulated values.
    fn augmented_data_tables(
        &self,
        core_id: &CoreItemId,
        patient: &CalibrationPatient,
    ) -> Result<Vec<u8>, CrabbitError>;
    fn timeseries_per_patient(
        &self,
        core_id: &CoreItemId,
        request: &TimeseriesRequest,
    ) -> Result<Vec<ArmTimeseries>, CrabbitError>;
    /// The `model` part of a computational model snapshot.
    fn computational_model(&self, core_id: &CoreItemId) -> Result<Value, CrabbitError>;
}

#[derive(Clone)]
pub struct JinkoHttpClient {
    client: Client,
    base_url: String,
}

impl JinkoHttpClient {
    pub fn new(session: &Session) -> Result<Self, CrabbitError> {
        let (api_key, project_id) = session.credentials()?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("crabbit/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CrabbitError::ApiHttp(err.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|err| CrabbitError::ApiHttp(err.to_string()))?,
        );
        headers.insert(
            "x-jinko-project-id",
            HeaderValue::from_str(project_id)
                .map_err(|err| CrabbitError::ApiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| CrabbitError::ApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: session.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, CrabbitError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Self::handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && (err.is_timeout() || err.is_connect()) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CrabbitError::ApiHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(response: Response) -> Result<Response, CrabbitError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "platform request failed".to_string());
        Err(CrabbitError::ApiStatus { status, message })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CrabbitError> {
        let url = self.url(path);
        debug!(%url, "GET");
        self.send_with_retries(|| self.client.get(&url))?
            .json()
            .map_err(|err| CrabbitError::ApiHttp(err.to_string()))
    }

    fn post_bytes<B: Serialize>(&self, path: &str, body: &B) -> Result<Vec<u8>, CrabbitError> {
        let url = self.url(path);
        debug!(%url, "POST");
        let bytes = self
            .send_with_retries(|| self.client.post(&url).json(body))?
            .bytes()
            .map_err(|err| CrabbitError::ApiHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CrabbitError> {
        let url = self.url(path);
        debug!(%url, "POST");
        self.send_with_retries(|| self.client.post(&url).json(body))?
            .json()
            .map_err(|err| CrabbitError::ApiHttp(err.to_string()))
    }

    fn calibration_path(manager: &str, core_id: &CoreItemId, tail: &str) -> String {
        format!(
            "/core/v2/{manager}/calibration/{}/snapshots/{}/{tail}",
            core_id.id, core_id.snapshot_id
        )
    }
}

impl JinkoClient for JinkoHttpClient {
    fn project_item(&self, url: &ProjectItemUrl) -> Result<ProjectItem, CrabbitError> {
        let path = match url.revision {
            Some(revision) => format!("/app/v1/project-item/{}?revision={revision}", url.sid),
            None => format!("/app/v1/project-item/{}", url.sid),
        };
        self.get_json(&path)
    }

    fn calibration_status(&self, core_id: &CoreItemId) -> Result<CalibrationStatus, CrabbitError> {
        let path = Self::calibration_path("calibration_manager", core_id, "status");
        let body: Value = self.get_json(&path)?;
        let status = body
            .as_str()
            .or_else(|| body.get("status").and_then(Value::as_str))
            .unwrap_or_default();
        Ok(CalibrationStatus::parse(status))
    }

    fn calibration_bundle(&self, core_id: &CoreItemId) -> Result<Vec<u8>, CrabbitError> {
        let url = self.url(&Self::calibration_path("calibration_manager", core_id, "bundle"));
        let bytes = self
            .send_with_retries(|| self.client.get(&url))?
            .bytes()
            .map_err(|err| CrabbitError::ApiHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn best_calibration_patient(
        &self,
        core_id: &CoreItemId,
    ) -> Result<Option<CalibrationPatient>, CrabbitError> {
        let path = Self::calibration_path("result_manager", core_id, "sorted_patients");
        let patients: Vec<CalibrationPatient> =
            self.post_json(&path, &json!({"sortBy": "optimizationWeightedScore"}))?;
        Ok(patients.into_iter().next())
    }

    fn results_summary(&self, core_id: &CoreItemId) -> Result<ResultsSummary, CrabbitError> {
        self.get_json(&Self::calibration_path(
            "calibration_manager",
            core_id,
            "results_summary",
        ))
    }

    fn scalars_per_patient(
        &self,
        core_id: &CoreItemId,
        request: &ScalarsRequest,
    ) -> Result<ScalarResultResponse, CrabbitError> {
        let path = Self::calibration_path("result_manager", core_id, "scalars/per_patient");
        self.post_json(&path, request)
    }

    fn augmented_data_tables(
        &self,
        core_id: &CoreItemId,
        patient: &CalibrationPatient,
    ) -> Result<Vec<u8>, CrabbitError> {
        let path = Self::calibration_path("result_manager", core_id, "augment_data_tables");
        self.post_bytes(
            &path,
            &json!({"patientId": patient.patient_number, "iteration": patient.iteration}),
        )
    }

    fn timeseries_per_patient(
        &self,
        core_id: &CoreItemId,
        request: &TimeseriesRequest,
    ) -> Result<Vec<ArmTimeseries>, CrabbitError> {
        let path = Self::calibration_path("result_manager", core_id, "timeseries/per_patient");
        self.post_json(&path, request)
    }

    fn computational_model(&self, core_id: &CoreItemId) -> Result<Value, CrabbitError> {
        let path = format!(
            "/core/v2/model_manager/jinko_model/{}/snapshots/{}",
            core_id.id, core_id.snapshot_id
        );
        let mut snapshot: Value = self.get_json(&path)?;
        snapshot
            .get_mut("model")
            .map(Value::take)
            .ok_or_else(|| CrabbitError::malformed(path, "model snapshot has no \"model\" field"))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
