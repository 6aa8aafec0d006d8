use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crabbit::app::{App, ProgressSink};
use crabbit::config::{ConfigLoader, Session};
use crabbit::domain::{
    CalibrationPatient, CalibrationStatus, CoreItemId, ProjectItem, ProjectItemUrl, ScalarKind,
};
use crabbit::error::CrabbitError;
use crabbit::jinko::{
    ArmTimeseries, JinkoClient, JinkoHttpClient, ResultsSummary, ScalarsRequest, TimeseriesRequest,
};
use crabbit::output::{JsonOutput, OutputMode, TextOutput};
use crabbit::reshape::ScalarResultResponse;
use crabbit::store::OutputStore;

#[derive(Parser)]
#[command(name = "crabbit")]
#[command(about = "Download and merge simulation-platform artifacts into analysis-ready files")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download a calibration's best-patient results or a named model version")]
    Download(DownloadArgs),
    #[command(about = "Merge virtual populations, designs or data tables")]
    Merge(MergeArgs),
    #[command(about = "Reshape a saved per-patient scalar results response")]
    Reshape(ReshapeArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// Project item URL, e.g. https://app.jinko.ai/ca-foo-bar?revision=2
    url: String,

    #[arg(short, long)]
    output: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct MergeArgs {
    #[arg(required = true, num_args = 2..)]
    inputs: Vec<Utf8PathBuf>,

    #[arg(short, long)]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct ReshapeArgs {
    response: Utf8PathBuf,

    #[arg(long)]
    patient: String,

    /// Only reshape one kind of results
    #[arg(long)]
    kind: Option<ScalarKind>,

    #[arg(short, long)]
    output: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CrabbitError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CrabbitError) -> u8 {
    match error {
        CrabbitError::InvalidOptions(_)
        | CrabbitError::MalformedInput { .. }
        | CrabbitError::InvalidProjectItemUrl(_)
        | CrabbitError::UnsupportedItemType(_)
        | CrabbitError::MissingCredential(_)
        | CrabbitError::MergeConflict { .. }
        | CrabbitError::Download(_) => 2,
        CrabbitError::ApiHttp(_) | CrabbitError::ApiStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Download(args) => {
            let url: ProjectItemUrl = args.url.parse()?;
            let session = ConfigLoader::resolve(args.config.as_deref())?;
            let app = App::new(JinkoHttpClient::new(&session)?, session);
            let store = OutputStore::new(args.output);
            let report = app.download(&url, &store, sink(output_mode))?;
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_download(&report),
                OutputMode::Interactive => TextOutput::print_download(&report),
            };
            printed.into_diagnostic()
        }
        Commands::Merge(args) => {
            let app = App::new(NopJinko, Session::default());
            let report = app.merge(&args.inputs, &args.output, sink(output_mode))?;
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_merge(&report),
                OutputMode::Interactive => TextOutput::print_merge(&report),
            };
            printed.into_diagnostic()
        }
        Commands::Reshape(args) => {
            let session = ConfigLoader::resolve(args.config.as_deref())?;
            let app = App::new(NopJinko, session);
            let store = OutputStore::new(args.output);
            let report = app.reshape(
                &args.response,
                &args.patient,
                args.kind,
                &store,
                sink(output_mode),
            )?;
            let printed = match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_reshape(&report),
                OutputMode::Interactive => TextOutput::print_reshape(&report),
            };
            printed.into_diagnostic()
        }
    }
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &TextOutput,
    }
}

/// Stands in for the platform client in offline commands.
struct NopJinko;

fn offline() -> CrabbitError {
    CrabbitError::ApiHttp("platform client not configured".to_string())
}

impl JinkoClient for NopJinko {
    fn project_item(&self, _url: &ProjectItemUrl) -> Result<ProjectItem, CrabbitError> {
        Err(offline())
    }

    fn calibration_status(&self, _core_id: &CoreItemId) -> Result<CalibrationStatus, CrabbitError> {
        Err(offline())
    }

    fn calibration_bundle(&self, _core_id: &CoreItemId) -> Result<Vec<u8>, CrabbitError> {
        Err(offline())
    }

    fn best_calibration_patient(
        &self,
        _core_id: &CoreItemId,
    ) -> Result<Option<CalibrationPatient>, CrabbitError> {
        Err(offline())
    }

    fn results_summary(&self, _core_id: &CoreItemId) -> Result<ResultsSummary, CrabbitError> {
        Err(offline())
    }

    fn scalars_per_patient(
        &self,
        _core_id: &CoreItemId,
        _request: &ScalarsRequest,
    ) -> Result<ScalarResultResponse, CrabbitError> {
        Err(offline())
    }

    fn augmented_data_tables(
        &self,
        _core_id: &CoreItemId,
        _patient: &CalibrationPatient,
    ) -> Result<Vec<u8>, CrabbitError> {
        Err(offline())
    }

    fn timeseries_per_patient(
        &self,
        _core_id: &CoreItemId,
        _request: &TimeseriesRequest,
    ) -> Result<Vec<ArmTimeseries>, CrabbitError> {
        Err(offline())
    }

    fn computational_model(&self, _core_id: &CoreItemId) -> Result<Value, CrabbitError> {
        Err(offline())
    }
}
