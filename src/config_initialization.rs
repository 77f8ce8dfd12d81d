//! Configuration initialization and hierarchy management
//!
//! Precedence, highest first: command line, `GIFFIX_*` environment
//! variables, configuration file, built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::BatchSettings;
use crate::domain::rules::TimeoutPolicy;
use crate::engine::ExtractionSettings;
use crate::error::{GifFixError, GifFixResult};
use crate::utils::logging::{LogLevel, LoggingSettings};

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "giffix.toml";

/// `[backend]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// `[timeouts]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub heif_secs: u64,
    pub default_secs: u64,
    /// Bound on a single ffprobe run
    pub probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            heif_secs: 60,
            default_secs: 30,
            probe_secs: 30,
        }
    }
}

/// `[extraction]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub sample_interval_ms: u64,
    pub max_samples: usize,
    pub setup_timeout_ms: u64,
    pub sampling_timeout_ms: u64,
    pub cleanup_timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 33,
            max_samples: 1000,
            setup_timeout_ms: 2000,
            sampling_timeout_ms: 10_000,
            cleanup_timeout_ms: 1000,
        }
    }
}

/// `[output]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where delivered GIFs land
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GifFixConfig {
    pub backend: BackendConfig,
    pub timeouts: TimeoutConfig,
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
    pub logging: LoggingSettings,
}

/// Values taken from the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub log_json: bool,
}

impl GifFixConfig {
    pub fn from_toml_str(content: &str) -> GifFixResult<Self> {
        toml::from_str(content).map_err(|e| GifFixError::ConfigError {
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> GifFixResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GifFixError::ConfigError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `GIFFIX_*` variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> GifFixResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;

        if let Some(value) = lookup("GIFFIX_FFMPEG") {
            self.backend.ffmpeg = PathBuf::from(value);
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_FFPROBE") {
            self.backend.ffprobe = PathBuf::from(value);
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(value);
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_HEIF_TIMEOUT_SECS") {
            self.timeouts.heif_secs = parse_env("GIFFIX_HEIF_TIMEOUT_SECS", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_TIMEOUT_SECS") {
            self.timeouts.default_secs = parse_env("GIFFIX_TIMEOUT_SECS", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_PROBE_TIMEOUT_SECS") {
            self.timeouts.probe_secs = parse_env("GIFFIX_PROBE_TIMEOUT_SECS", &value)?;
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&value)
                .ok_or_else(|| invalid_env("GIFFIX_LOG_LEVEL", &value))?;
            applied += 1;
        }
        if let Some(value) = lookup("GIFFIX_LOG_JSON") {
            self.logging.json = parse_env("GIFFIX_LOG_JSON", &value)?;
            applied += 1;
        }

        Ok(applied)
    }

    pub fn apply_cli(&mut self, overrides: &ConfigOverrides) -> usize {
        let mut applied = 0;
        if let Some(directory) = &overrides.output_dir {
            self.output.directory = directory.clone();
            applied += 1;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
            applied += 1;
        }
        if overrides.log_json {
            self.logging.json = true;
            applied += 1;
        }
        applied
    }

    pub fn validate(&self) -> GifFixResult<()> {
        let invalid = |message: &str| {
            Err(GifFixError::ConfigError {
                message: message.to_string(),
            })
        };
        let t = &self.timeouts;
        if t.heif_secs == 0 || t.default_secs == 0 || t.probe_secs == 0 {
            return invalid("timeouts must be positive");
        }
        if self.extraction.sample_interval_ms == 0 {
            return invalid("extraction.sample_interval_ms must be positive");
        }
        if self.extraction.max_samples == 0 {
            return invalid("extraction.max_samples must be positive");
        }
        if self.backend.ffmpeg.as_os_str().is_empty()
            || self.backend.ffprobe.as_os_str().is_empty()
        {
            return invalid("backend paths must not be empty");
        }
        Ok(())
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            heif: Duration::from_secs(self.timeouts.heif_secs),
            default: Duration::from_secs(self.timeouts.default_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.probe_secs)
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        let e = &self.extraction;
        ExtractionSettings {
            sample_interval: Duration::from_millis(e.sample_interval_ms),
            max_samples: e.max_samples,
            setup_timeout: Duration::from_millis(e.setup_timeout_ms),
            sampling_timeout: Duration::from_millis(e.sampling_timeout_ms),
            cleanup_timeout: Duration::from_millis(e.cleanup_timeout_ms),
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            timeouts: self.timeout_policy(),
            extraction: self.extraction_settings(),
        }
    }
}

fn invalid_env(name: &str, value: &str) -> GifFixError {
    GifFixError::ConfigError {
        message: format!("invalid value for {}: {:?}", name, value),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> GifFixResult<T> {
    value.trim().parse().map_err(|_| invalid_env(name, value))
}

/// Locate the configuration file: the explicit one must exist, the default one may not
fn load_config_file(explicit: Option<&Path>) -> GifFixResult<Option<(PathBuf, GifFixConfig)>> {
    if let Some(path) = explicit {
        return GifFixConfig::from_file(path).map(|config| Some((path.to_path_buf(), config)));
    }
    let default = Path::new(DEFAULT_CONFIG_FILE);
    if default.is_file() {
        return GifFixConfig::from_file(default).map(|config| Some((default.to_path_buf(), config)));
    }
    Ok(None)
}

/// Resolve the configuration hierarchy against the process environment
pub fn initialize_configuration_hierarchy(overrides: &ConfigOverrides) -> GifFixResult<GifFixConfig> {
    resolve_configuration(overrides, |name| std::env::var(name).ok())
}

/// Resolve the configuration hierarchy with an explicit environment lookup
pub fn resolve_configuration<F>(overrides: &ConfigOverrides, env: F) -> GifFixResult<GifFixConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match load_config_file(overrides.config_file.as_deref())? {
        Some((path, config)) => {
            debug!(path = %path.display(), "Loaded configuration file");
            config
        }
        None => {
            debug!("No configuration file, using defaults");
            GifFixConfig::default()
        }
    };

    let env_overrides = config.apply_env(env)?;
    let cli_overrides = config.apply_cli(overrides);
    config.validate()?;

    debug!(env_overrides, cli_overrides, "Configuration hierarchy initialized");
    Ok(config)
}
