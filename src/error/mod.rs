//! Error handling module for GifFix

use thiserror::Error;

use crate::domain::model::FileFormat;

/// Main error type for caller-level GifFix failures
#[derive(Error, Debug)]
pub enum GifFixError {
    /// A batch was started without any input
    #[error("No input files selected")]
    EmptyBatch,

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// The orchestrator was asked to run twice
    #[error("Batch orchestrator has already run")]
    AlreadyRun,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for GifFix operations
pub type GifFixResult<T> = std::result::Result<T, GifFixError>;

/// Per-item failure taxonomy. Every variant becomes one failCount increment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error("Input file does not exist: {path}")]
    InputMissing { path: String },

    #[error("Cannot read input file: {path}")]
    InputUnreadable { path: String },

    #[error("Input file is empty: {path}")]
    InputEmpty { path: String },

    #[error("Failed to get media information for {path}")]
    ProbeFailure { path: String },

    #[error("Frame extraction failed: {message}")]
    ExtractionFailure { message: String },

    #[error("Command is empty for {format}")]
    SynthesisFailure { format: FileFormat },

    #[error("Conversion from {format} failed with return code {return_code:?}")]
    EngineFailure {
        format: FileFormat,
        return_code: Option<i32>,
    },

    #[error("Output file not created or empty: {path}")]
    OutputMissingOrEmpty { path: String },

    #[error("Conversion timeout after {timeout_secs}s for {format}")]
    EngineTimeout { format: FileFormat, timeout_secs: u64 },

    #[error("Failed to deliver output: {message}")]
    DeliveryFailure { message: String },
}

impl ItemError {
    /// Pipeline stage the error belongs to, used as a structured log field
    pub fn stage(&self) -> &'static str {
        match self {
            ItemError::InputMissing { .. }
            | ItemError::InputUnreadable { .. }
            | ItemError::InputEmpty { .. } => "preflight",
            ItemError::ProbeFailure { .. } => "probe",
            ItemError::ExtractionFailure { .. } => "extract",
            ItemError::SynthesisFailure { .. } => "synthesize",
            ItemError::EngineFailure { .. }
            | ItemError::OutputMissingOrEmpty { .. }
            | ItemError::EngineTimeout { .. } => "transcode",
            ItemError::DeliveryFailure { .. } => "deliver",
        }
    }
}
