//! CLI module for GifFix
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config_initialization::ConfigOverrides;
use crate::utils::logging::LogLevel;

pub mod args;
pub mod commands;

pub use args::{ConvertArgs, DetectArgs, ReportFormat};

/// GifFix
///
/// Converts animated WebP, HEIF and other images or clips into standard GIF
/// files. Inputs that already are standard GIFs are copied unchanged.
#[derive(Parser, Debug)]
#[command(name = "giffix")]
#[command(about = "GifFix - Turn animated images into standard GIFs")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_parser = args::parse_log_level)]
    pub log_level: Option<LogLevel>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (default: ./giffix.toml when present)
    #[arg(long, global = true, env = "GIFFIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert files into standard GIFs
    Convert(ConvertArgs),
    /// Print the detected container format of files
    Detect(DetectArgs),
}

impl Cli {
    /// The configuration layer contributed by the command line
    pub fn overrides(&self) -> ConfigOverrides {
        let output_dir = match &self.command {
            Commands::Convert(args) => args.output.clone(),
            Commands::Detect(_) => None,
        };
        ConfigOverrides {
            config_file: self.config.clone(),
            output_dir,
            log_level: self.log_level,
            log_json: self.log_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_convert_overrides() {
        let cli = Cli::try_parse_from([
            "giffix",
            "--log-level",
            "debug",
            "convert",
            "a.webp",
            "b.heic",
            "-o",
            "out",
            "--report",
            "json",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.output_dir, Some(PathBuf::from("out")));
        assert_eq!(overrides.log_level, Some(LogLevel::Debug));
        match cli.command {
            Commands::Convert(args) => {
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.report, ReportFormat::Json);
            }
            Commands::Detect(_) => panic!("expected convert"),
        }
    }

    #[test]
    fn test_convert_requires_inputs() {
        assert!(Cli::try_parse_from(["giffix", "convert"]).is_err());
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        assert!(Cli::try_parse_from(["giffix", "--log-level", "loud", "detect", "a"]).is_err());
    }
}
