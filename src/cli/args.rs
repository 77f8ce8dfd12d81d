//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::utils::logging::LogLevel;

/// Arguments for the convert command
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Input files, or directories whose files are converted
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory receiving the fixed GIFs
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Format of the batch report printed on stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

/// Arguments for the detect command
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Files to classify
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Batch report rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
    Yaml,
}

pub fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    LogLevel::parse(value).ok_or_else(|| {
        format!(
            "unknown log level '{}' (expected error, warn, info, debug or trace)",
            value
        )
    })
}
