use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::Session;
use crate::domain::{
    CROSS_ARM, CalibrationPatient, CalibrationStatus, CoreItemId, ProjectItem, ProjectItemUrl,
    ScalarKind,
};
use crate::error::CrabbitError;
use crate::fs_util::{InputBundle, merge_objectives, read_bundle, read_csv_archive};
use crate::jinko::{JinkoClient, ResultsSummary, ScalarsRequest, SummaryItem, TimeseriesRequest};
use crate::merge::{
    Conflict, CsvMergeOutcome, CsvTable, CsvTableMerger, MergeOutcome, VirtualPopulation,
    VpopDesign, VpopDesignMerger, VpopMerger,
};
use crate::metadata::{MetadataAggregator, MetadataIndex};
use crate::reshape::{ArmOutput, ReshapedResults, ScalarResultReshaper, ScalarResultResponse};
use crate::store::{
    JsonStyle, METADATA_FILE, OutputStore, REFERENCE_TABLE_FILE, SCORINGS_FILE, StagedOutput,
    TIMESERIES_DIR,
};

const CALIBRATION_ITEM_TYPE: &str = "Calibration";
const MODEL_ITEM_TYPE: &str = "ComputationalModel";
/// Series the platform always simulates; without it the time series are unusable.
const TIME_SERIES_ID: &str = "Time";
const DESIGN_FILE_MARKER: &str = "VpopDesign";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    Vpop,
    VpopDesign,
    Csv,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub kind: MergeKind,
    pub inputs: Vec<String>,
    pub output: String,
    /// Patients, design dimensions or data rows in the merged artifact.
    pub items: usize,
    /// Set when the data tables only agreed on their mandatory columns.
    pub trimmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTables {
    None,
    Merged,
    Trimmed,
    Separate,
}

/// Outcome of a download job, tagged with the project item type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "itemType")]
pub enum DownloadReport {
    Calibration(CalibrationReport),
    ComputationalModel(ModelReport),
}

impl DownloadReport {
    pub fn files(&self) -> &[String] {
        match self {
            DownloadReport::Calibration(report) => &report.files,
            DownloadReport::ComputationalModel(report) => &report.files,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub item: String,
    pub patient_number: String,
    pub iteration: u64,
    pub reference_tables: ReferenceTables,
    /// Data tables augmented with the best patient's simulated values.
    pub augmented_tables: Vec<String>,
    /// Arms whose time series were saved under `ModelResult/`.
    pub timeseries_arms: Vec<String>,
    pub arms: Vec<String>,
    pub scalars: usize,
    pub categoricals: usize,
    pub files: Vec<String>,
    pub downloaded_at: String,
    pub tool: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub item: String,
    pub version_label: String,
    pub files: Vec<String>,
    pub downloaded_at: String,
    pub tool: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReshapeReport {
    pub response: String,
    pub patient_number: String,
    pub arms: Vec<String>,
    pub scalars: usize,
    pub categoricals: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    fn phase(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<J: JinkoClient> {
    jinko: J,
    session: Session,
}

impl<J: JinkoClient> App<J> {
    pub fn new(jinko: J, session: Session) -> Self {
        Self { jinko, session }
    }

    /// Merges two or more local files of the same kind into `output`.
    pub fn merge(
        &self,
        inputs: &[Utf8PathBuf],
        output: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<MergeReport, CrabbitError> {
        let (files, extension) = check_merge_inputs(inputs, output)?;
        let names: Vec<String> = files.iter().map(ToString::to_string).collect();
        sink.event(ProgressEvent::phase(format!(
            "phase=Merge; merging {} {extension} files",
            files.len()
        )));

        let report = if extension == "csv" {
            let tables = files
                .iter()
                .map(|path| CsvTable::from_path(path.as_std_path()))
                .collect::<Result<Vec<_>, _>>()?;
            let (table, trimmed) = match CsvTableMerger::merge(&tables) {
                CsvMergeOutcome::Single { table, trimmed } => (table, trimmed),
                CsvMergeOutcome::Conflict(conflict) => {
                    return Err(conflict_error(conflict, &names));
                }
                CsvMergeOutcome::Separate(_) => {
                    return Err(CrabbitError::MergeConflict {
                        artifact: names.join(", "),
                        reason: "data tables cannot be combined".to_string(),
                    });
                }
            };
            OutputStore::write_bytes_atomic(output, &table.to_bytes()?)?;
            MergeReport {
                kind: MergeKind::Csv,
                inputs: names,
                output: output.to_string(),
                items: table.rows.len(),
                trimmed,
            }
        } else if files[0]
            .file_name()
            .is_some_and(|name| name.contains(DESIGN_FILE_MARKER))
        {
            let designs = files
                .iter()
                .map(|path| VpopDesign::from_json(path.as_str(), &read_json(path)?))
                .collect::<Result<Vec<_>, _>>()?;
            let merged = match VpopDesignMerger::merge(&designs) {
                MergeOutcome::Merged(design) => design,
                MergeOutcome::Conflict(conflict) => return Err(conflict_error(conflict, &names)),
            };
            OutputStore::write_json_atomic(output, &merged.to_json(), JsonStyle::Pretty)?;
            MergeReport {
                kind: MergeKind::VpopDesign,
                inputs: names,
                output: output.to_string(),
                items: merged.dimension_count(),
                trimmed: false,
            }
        } else {
            let vpops = files
                .iter()
                .map(|path| VirtualPopulation::from_json(path.as_str(), &read_json(path)?))
                .collect::<Result<Vec<_>, _>>()?;
            let merged = match VpopMerger::merge(&vpops) {
                MergeOutcome::Merged(vpop) => vpop,
                MergeOutcome::Conflict(conflict) => return Err(conflict_error(conflict, &names)),
            };
            OutputStore::write_json_atomic(output, &merged.to_json(), JsonStyle::Pretty)?;
            MergeReport {
                kind: MergeKind::Vpop,
                inputs: names,
                output: output.to_string(),
                items: merged.patients.len(),
                trimmed: false,
            }
        };

        info!(output = %report.output, items = report.items, "merge written");
        Ok(report)
    }

    /// Downloads a calibration or a computational model into `store`.
    ///
    /// Every file of the job is staged first and committed only once all requests succeeded.
    pub fn download(
        &self,
        url: &ProjectItemUrl,
        store: &OutputStore,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, CrabbitError> {
        let start = Instant::now();
        sink.event(ProgressEvent::phase(format!(
            "phase=Resolve; project item {url}"
        )));
        let item = self.jinko.project_item(url)?;
        let report = match item.item_type.as_deref().unwrap_or("unknown") {
            CALIBRATION_ITEM_TYPE => {
                DownloadReport::Calibration(self.download_calibration(url, &item, store, sink)?)
            }
            MODEL_ITEM_TYPE => {
                DownloadReport::ComputationalModel(self.download_model(url, &item, store, sink)?)
            }
            other => return Err(CrabbitError::UnsupportedItemType(other.to_string())),
        };
        sink.event(ProgressEvent {
            message: format!("phase=Done; {} files written", report.files().len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    fn download_calibration(
        &self,
        url: &ProjectItemUrl,
        item: &ProjectItem,
        store: &OutputStore,
        sink: &dyn ProgressSink,
    ) -> Result<CalibrationReport, CrabbitError> {
        let core_id = core_id_of(url, item)?;
        match self.jinko.calibration_status(core_id)? {
            CalibrationStatus::NotLaunched => {
                return Err(CrabbitError::Download(
                    "calibration is not launched (is it the correct version?)".to_string(),
                ));
            }
            CalibrationStatus::Completed => {}
            status => warn!(?status, "calibration is not completed, results may be partial"),
        }

        sink.event(ProgressEvent::phase("phase=Inputs; downloading calibration bundle"));
        let bundle = read_bundle(&self.jinko.calibration_bundle(core_id)?)?;
        let mut staged = store.stage()?;
        let reference_tables = stage_inputs(&mut staged, bundle)?;

        sink.event(ProgressEvent::phase("phase=Results; fetching best patient results"));
        let patient = self
            .jinko
            .best_calibration_patient(core_id)?
            .ok_or_else(|| {
                CrabbitError::Download(
                    "best patient cannot be found (is it the correct version?)".to_string(),
                )
            })?;
        info!(
            patient = %patient.patient_number,
            iteration = patient.iteration,
            "best calibration patient"
        );

        let augmented = read_csv_archive(
            "augmented data tables",
            &self.jinko.augmented_data_tables(core_id, &patient)?,
        )?;
        let mut augmented_tables = Vec::with_capacity(augmented.len());
        for table in augmented {
            check_file_name(&table.name, "augmented data tables")?;
            if staged.contains(&table.name) {
                warn!(table = %table.name, "augmented data table replaces a bundle table");
            }
            staged.write_bytes(&table.name, &table.to_bytes()?)?;
            augmented_tables.push(table.name);
        }

        let summary = self.jinko.results_summary(core_id)?;
        let timeseries_arms = self.stage_timeseries(&mut staged, core_id, &patient, &summary)?;

        let per_arm = ScalarsRequest {
            patient_number: patient.patient_number.clone(),
            iteration: patient.iteration,
            arms: summary.arms.clone(),
            scalars: summary_ids(&summary.scalars),
            categoricals: summary_ids(&summary.categoricals),
        };
        let cross_arm = ScalarsRequest {
            arms: vec![CROSS_ARM.to_string()],
            scalars: summary_ids(&summary.scalars_cross_arm),
            categoricals: summary_ids(&summary.categoricals_cross_arm),
            ..per_arm.clone()
        };
        let per_arm = self.jinko.scalars_per_patient(core_id, &per_arm)?;
        let cross_arm = self.jinko.scalars_per_patient(core_id, &cross_arm)?;

        let mut aggregator = MetadataAggregator::with_arms(summary.arms.iter().cloned());
        aggregator.add_patient(self.session.patient_label.clone());
        let mut reshaper = ScalarResultReshaper::new(patient.patient_number.clone(), aggregator);
        let scalars = reshaper.reshape(
            &chain_outputs(&per_arm.outputs, &cross_arm.outputs),
            ScalarKind::Scalar,
        )?;
        let categoricals = reshaper.reshape(
            &chain_outputs(&per_arm.outputs_categorical, &cross_arm.outputs_categorical),
            ScalarKind::Categorical,
        )?;
        let index = reshaper.finish();
        stage_scalar_outputs(&mut staged, &[&scalars, &categoricals], &index)?;

        sink.event(ProgressEvent::phase("phase=Commit; writing downloaded files"));
        let files = staged.commit(store)?;
        Ok(CalibrationReport {
            item: url.to_string(),
            patient_number: patient.patient_number,
            iteration: patient.iteration,
            reference_tables,
            augmented_tables,
            timeseries_arms,
            arms: index.arms,
            scalars: scalars.record_count(),
            categoricals: categoricals.record_count(),
            files: files.iter().map(ToString::to_string).collect(),
            downloaded_at: iso_timestamp(),
            tool: tool_name(),
        })
    }

    /// Stages `ModelResult/<patient>_<arm>.json` for every arm and returns the arm names.
    ///
    /// A failed request or a summary without a `Time` series skips the time series; results
    /// for another patient abort the job.
    fn stage_timeseries(
        &self,
        staged: &mut StagedOutput,
        core_id: &CoreItemId,
        patient: &CalibrationPatient,
        summary: &ResultsSummary,
    ) -> Result<Vec<String>, CrabbitError> {
        let select = summary_ids(&summary.timeseries);
        if !select.iter().any(|id| id == TIME_SERIES_ID) {
            warn!("results summary has no \"Time\" series, time series skipped");
            return Ok(Vec::new());
        }
        let request = TimeseriesRequest {
            patient_id: patient.patient_number.clone(),
            iteration: patient.iteration,
            select,
        };
        let arms = match self.jinko.timeseries_per_patient(core_id, &request) {
            Ok(arms) => arms,
            Err(err @ (CrabbitError::ApiHttp(_) | CrabbitError::ApiStatus { .. })) => {
                warn!(error = %err, "failed to download the time series, skipped");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let label = &self.session.patient_label;
        let mut names = Vec::with_capacity(arms.len());
        for arm in arms {
            if arm.patient_number != patient.patient_number {
                return Err(CrabbitError::invariant(
                    format!("time series of arm {}", arm.scenario_arm),
                    format!(
                        "patient number {} does not match the requested {}",
                        arm.patient_number, patient.patient_number
                    ),
                ));
            }
            let file_name = format!("{label}_{}.json", arm.scenario_arm);
            check_file_name(&file_name, "time series")?;
            staged.write_json(
                &format!("{TIMESERIES_DIR}/{file_name}"),
                &json!({ "res": arm.res }),
                JsonStyle::Compact,
            )?;
            names.push(arm.scenario_arm);
        }
        info!(arms = names.len(), "time series downloaded");
        Ok(names)
    }

    fn download_model(
        &self,
        url: &ProjectItemUrl,
        item: &ProjectItem,
        store: &OutputStore,
        sink: &dyn ProgressSink,
    ) -> Result<ModelReport, CrabbitError> {
        let core_id = core_id_of(url, item)?;
        let label = item.version_label().ok_or_else(|| {
            CrabbitError::Download(
                "cannot download a computational model that is not a named version".to_string(),
            )
        })?;
        let file_name = format!("{label}.json");
        check_file_name(&file_name, "model version label")?;

        sink.event(ProgressEvent::phase("phase=Model; downloading model snapshot"));
        let model = self.jinko.computational_model(core_id)?;
        let mut staged = store.stage()?;
        staged.write_json(&file_name, &model, JsonStyle::Pretty)?;
        let files = staged.commit(store)?;
        Ok(ModelReport {
            item: url.to_string(),
            version_label: label.to_string(),
            files: files.iter().map(ToString::to_string).collect(),
            downloaded_at: iso_timestamp(),
            tool: tool_name(),
        })
    }

    /// Reshapes a scalar-result response saved on disk, one kind or both.
    pub fn reshape(
        &self,
        response_file: &Utf8Path,
        patient_number: &str,
        kind: Option<ScalarKind>,
        store: &OutputStore,
        sink: &dyn ProgressSink,
    ) -> Result<ReshapeReport, CrabbitError> {
        sink.event(ProgressEvent::phase(format!(
            "phase=Reshape; reading {response_file}"
        )));
        let response: ScalarResultResponse =
            serde_json::from_value(read_json(response_file)?).map_err(|err| {
                CrabbitError::malformed(response_file.as_str(), err.to_string())
            })?;

        let mut aggregator = MetadataAggregator::new();
        aggregator.add_patient(self.session.patient_label.clone());
        let mut reshaper = ScalarResultReshaper::new(patient_number, aggregator);
        let mut results = Vec::with_capacity(2);
        for current in [ScalarKind::Scalar, ScalarKind::Categorical] {
            if kind.is_some_and(|wanted| wanted != current) {
                continue;
            }
            let outputs = match current {
                ScalarKind::Scalar => &response.outputs,
                ScalarKind::Categorical => &response.outputs_categorical,
            };
            results.push(reshaper.reshape(outputs, current)?);
        }
        let index = reshaper.finish();

        let count = |wanted: ScalarKind| -> usize {
            results
                .iter()
                .filter(|result| result.kind == wanted)
                .map(ReshapedResults::record_count)
                .sum()
        };
        let scalars = count(ScalarKind::Scalar);
        let categoricals = count(ScalarKind::Categorical);
        let mut staged = store.stage()?;
        stage_scalar_outputs(&mut staged, &results.iter().collect::<Vec<_>>(), &index)?;
        let files = staged.commit(store)?;
        Ok(ReshapeReport {
            response: response_file.to_string(),
            patient_number: patient_number.to_string(),
            arms: index.arms,
            scalars,
            categoricals,
            files: files.iter().map(ToString::to_string).collect(),
        })
    }
}

/// Existing inputs, sorted, together with their shared extension.
fn check_merge_inputs(
    inputs: &[Utf8PathBuf],
    output: &Utf8Path,
) -> Result<(Vec<Utf8PathBuf>, String), CrabbitError> {
    let mut files: Vec<Utf8PathBuf> = inputs
        .iter()
        .filter(|path| {
            let exists = path.is_file();
            if !exists {
                warn!(path = %path, "input file not found, skipped");
            }
            exists
        })
        .cloned()
        .collect();
    match files.len() {
        0 => return Err(CrabbitError::InvalidOptions("no input file was found".to_string())),
        1 => {
            return Err(CrabbitError::InvalidOptions(
                "only one input file was found, at least two are required".to_string(),
            ));
        }
        _ => {}
    }
    files.sort();

    let mut extensions: Vec<String> = inputs.iter().map(|path| extension_of(path)).collect();
    extensions.sort();
    extensions.dedup();
    let [extension] = extensions.as_slice() else {
        return Err(CrabbitError::InvalidOptions(
            "only files of the same extension (JSON or CSV) can be merged".to_string(),
        ));
    };
    if extension != "json" && extension != "csv" {
        return Err(CrabbitError::InvalidOptions(format!(
            "unsupported extension \"{extension}\", only JSON or CSV files can be merged"
        )));
    }
    if &extension_of(output) != extension {
        return Err(CrabbitError::InvalidOptions(format!(
            "the output file must have the same extension as the inputs (.{extension})"
        )));
    }
    Ok((files, extension.clone()))
}

fn extension_of(path: &Utf8Path) -> String {
    path.extension().unwrap_or_default().to_ascii_lowercase()
}

fn read_json(path: &Utf8Path) -> Result<Value, CrabbitError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| CrabbitError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content)
        .map_err(|err| CrabbitError::malformed(path.as_str(), err.to_string()))
}

fn conflict_error(conflict: Conflict, inputs: &[String]) -> CrabbitError {
    CrabbitError::MergeConflict {
        artifact: conflict.artifact,
        reason: format!("{} (inputs: {})", conflict.reason, inputs.join(", ")),
    }
}

fn summary_ids(items: &[SummaryItem]) -> Vec<String> {
    items.iter().map(|item| item.id.clone()).collect()
}

fn chain_outputs(per_arm: &[ArmOutput], cross_arm: &[ArmOutput]) -> Vec<ArmOutput> {
    per_arm.iter().chain(cross_arm).cloned().collect()
}

fn core_id_of<'a>(
    url: &ProjectItemUrl,
    item: &'a ProjectItem,
) -> Result<&'a CoreItemId, CrabbitError> {
    item.core_id
        .as_ref()
        .ok_or_else(|| CrabbitError::Download(format!("project item {url} has no core id")))
}

/// Rejects names that would escape the output directory.
fn check_file_name(name: &str, artifact: &str) -> Result<(), CrabbitError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(CrabbitError::malformed(
            artifact,
            format!("\"{name}\" cannot be used as a file name"),
        ));
    }
    Ok(())
}

/// Stages `Scorings.json` and the reference data tables of a calibration bundle.
fn stage_inputs(
    staged: &mut StagedOutput,
    bundle: InputBundle,
) -> Result<ReferenceTables, CrabbitError> {
    if bundle.data_tables.is_empty() && bundle.scorings.is_empty() {
        return Err(CrabbitError::invariant(
            "calibration bundle",
            "no scoring nor data table in the calibration inputs",
        ));
    }

    let objectives = merge_objectives(&bundle.scorings);
    if !objectives.is_empty() {
        staged.write_json(
            SCORINGS_FILE,
            &json!({ "objectives": objectives }),
            JsonStyle::Compact,
        )?;
    } else if !bundle.scorings.is_empty() {
        warn!(file = SCORINGS_FILE, "scorings carry no objectives, nothing written");
    }

    if bundle.data_tables.is_empty() {
        return Ok(ReferenceTables::None);
    }
    let reference_tables = match CsvTableMerger::merge_or_keep_separate(bundle.data_tables) {
        CsvMergeOutcome::Single { table, trimmed } => {
            staged.write_bytes(REFERENCE_TABLE_FILE, &table.to_bytes()?)?;
            if trimmed {
                ReferenceTables::Trimmed
            } else {
                ReferenceTables::Merged
            }
        }
        CsvMergeOutcome::Separate(tables) => {
            warn!(count = tables.len(), "data tables cannot be merged, kept separate");
            for table in tables {
                check_file_name(&table.name, "calibration bundle")?;
                staged.write_bytes(&table.name, &table.to_bytes()?)?;
            }
            ReferenceTables::Separate
        }
        CsvMergeOutcome::Conflict(conflict) => {
            return Err(CrabbitError::MergeConflict {
                artifact: conflict.artifact,
                reason: conflict.reason,
            });
        }
    };
    Ok(reference_tables)
}

/// Stages `<Kind>Arrays/<arm>.json` for every result plus `ScalarMetaData.json`.
fn stage_scalar_outputs(
    staged: &mut StagedOutput,
    results: &[&ReshapedResults],
    index: &MetadataIndex,
) -> Result<(), CrabbitError> {
    for result in results {
        let dir = result.kind.array_dir();
        staged.create_dir(dir)?;
        for (arm, records) in &result.arms {
            check_file_name(arm, &format!("{} results", result.kind))?;
            staged.write_json(&format!("{dir}/{arm}.json"), records, JsonStyle::Compact)?;
        }
    }
    staged.write_json(METADATA_FILE, index, JsonStyle::Compact)
}

fn tool_name() -> String {
    format!("crabbit/{}", env!("CARGO_PKG_VERSION"))
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
