use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DownloadReport, MergeReport, ProgressEvent, ProgressSink, ReshapeReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_merge(report: &MergeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_download(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_reshape(report: &ReshapeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Short human-readable summaries and progress lines on stderr.
pub struct TextOutput;

impl TextOutput {
    pub fn print_merge(report: &MergeReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "merged {} files into {} ({} items)",
            report.inputs.len(),
            report.output,
            report.items
        )?;
        if report.trimmed {
            writeln!(
                stdout,
                "note: data tables only shared their mandatory columns, other columns were dropped"
            )?;
        }
        Ok(())
    }

    pub fn print_download(report: &DownloadReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        match report {
            DownloadReport::Calibration(report) => {
                writeln!(
                    stdout,
                    "downloaded {} (patient {}, iteration {})",
                    report.item, report.patient_number, report.iteration
                )?;
                writeln!(
                    stdout,
                    "{} arms, {} scalar and {} categorical records, time series for {} arms",
                    report.arms.len(),
                    report.scalars,
                    report.categoricals,
                    report.timeseries_arms.len()
                )?;
            }
            DownloadReport::ComputationalModel(report) => {
                writeln!(
                    stdout,
                    "downloaded model {} (version {})",
                    report.item, report.version_label
                )?;
            }
        }
        for file in report.files() {
            writeln!(stdout, "  {file}")?;
        }
        Ok(())
    }

    pub fn print_reshape(report: &ReshapeReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "reshaped {} for patient {}: {} scalar and {} categorical records",
            report.response, report.patient_number, report.scalars, report.categoricals
        )?;
        for file in &report.files {
            writeln!(stdout, "  {file}")?;
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
