//! Command implementations

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::AppContainer;
use crate::cli::args::{ConvertArgs, DetectArgs, ReportFormat};
use crate::domain::model::{BatchPhase, BatchReport, FileFormat};
use crate::utils::path::collect_inputs;

/// Exit status of a cancelled batch, as for SIGINT
pub const EXIT_CANCELLED: i32 = 130;

/// Execute the convert command, returning the process exit status
pub async fn convert(container: &dyn AppContainer, args: &ConvertArgs) -> Result<i32> {
    let inputs = collect_inputs(&args.inputs);
    info!(inputs = inputs.len(), "Starting convert operation");

    let (orchestrator, controller) = container.batch_interactor();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling batch");
            controller.request_cancel();
        }
    });

    let result = orchestrator.run(inputs).await;
    interrupt.abort();
    let report = result.context("Failed to run batch")?;

    let rendered = render_report(&report, args.report)?;
    println!("{}", rendered);
    Ok(exit_code(&report))
}

#[derive(Debug, Serialize)]
struct DetectedFile {
    path: PathBuf,
    format: FileFormat,
}

/// Execute the detect command
pub async fn detect(container: &dyn AppContainer, args: &DetectArgs) -> Result<()> {
    let sniffer = container.format_sniffer();
    let mut detected = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let format = sniffer.detect(path).await;
        detected.push(DetectedFile {
            path: path.clone(),
            format,
        });
    }

    if args.json {
        let json = serde_json::to_string_pretty(&detected)
            .context("Failed to serialize detected formats to JSON")?;
        println!("{}", json);
    } else {
        for file in &detected {
            println!("{}: {}", file.path.display(), file.format);
        }
    }
    Ok(())
}

/// 0 when every item succeeded, 1 when any failed, [`EXIT_CANCELLED`] when cancelled
pub fn exit_code(report: &BatchReport) -> i32 {
    match report.phase {
        BatchPhase::Cancelled => EXIT_CANCELLED,
        _ if report.fail_count > 0 => 1,
        _ => 0,
    }
}

pub fn render_report(report: &BatchReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(report)
            .context("Failed to serialize batch report to JSON"),
        ReportFormat::Yaml => {
            serde_yaml::to_string(report).context("Failed to serialize batch report to YAML")
        }
        ReportFormat::Text => Ok(render_text(report)),
    }
}

fn render_text(report: &BatchReport) -> String {
    let mut out = String::new();
    let elapsed = report.finished_at - report.started_at;
    let _ = writeln!(
        out,
        "{} of {} files fixed, {} failed ({:?}, {:.1}s)",
        report.success_count,
        report.total,
        report.fail_count,
        report.phase,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    for item in &report.items {
        let format = item.format.map(|f| f.name()).unwrap_or("-");
        let _ = match &item.destination {
            Some(destination) => writeln!(
                out,
                "  [{}] {} ({}) -> {}",
                item.index,
                item.path.display(),
                format,
                destination.display()
            ),
            None => writeln!(
                out,
                "  [{}] {} ({}) failed",
                item.index,
                item.path.display(),
                format
            ),
        };
    }
    out.trim_end().to_string()
}
