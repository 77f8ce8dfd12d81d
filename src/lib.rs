//! GifFix Library
//!
//! Batch conversion of animated WebP, HEIF and other media into standard
//! GIF files. Each input is classified from its header bytes; standard GIFs
//! are copied as-is and everything else is transcoded by an external
//! backend, with animated WebP first sampled into a frame sequence.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod engine;
pub mod error;
pub mod output;
pub mod planner;
pub mod ports;
pub mod probe;
pub mod utils;

// Re-export commonly used types
pub use app::{AppContainer, BatchOrchestrator, BatchPorts, BatchSettings, DefaultAppContainer};
pub use config_initialization::GifFixConfig;
pub use domain::errors::DomainError;
pub use domain::model::{BatchPhase, BatchReport, FileFormat};
pub use error::{GifFixError, GifFixResult, ItemError};
