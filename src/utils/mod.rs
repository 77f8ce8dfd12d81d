//! Common utilities and helpers

pub mod logging;
pub mod path;

pub use logging::{init_logging, LogLevel, LoggingSettings};
pub use path::collect_inputs;
