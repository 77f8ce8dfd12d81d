//! FFprobe adapter for stream metadata
//!
//! Runs `ffprobe -print_format json -show_streams` and deserializes the
//! stream list with serde. Any failure, including a run longer than the
//! configured timeout, yields `None`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::model::*;
use crate::ports::*;

#[derive(Debug, Deserialize, Default)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<StreamDescriptor>,
}

/// Upper bound for one ffprobe run
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// `ffprobe`-backed media prober
pub struct FfprobeJsonAdapter {
    binary: PathBuf,
    timeout: Duration,
}

impl FfprobeJsonAdapter {
    pub fn new() -> Self {
        Self::with_binary("ffprobe")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parse ffprobe's JSON output
    pub fn parse(json: &str) -> Option<ProbeResult> {
        match serde_json::from_str::<FfprobeOutput>(json) {
            Ok(output) => Some(ProbeResult {
                streams: output.streams,
            }),
            Err(e) => {
                warn!(error = %e, "FFprobe JSON parse error");
                None
            }
        }
    }
}

impl Default for FfprobeJsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProbePort for FfprobeJsonAdapter {
    async fn probe(&self, path: &Path) -> Option<ProbeResult> {
        let mut command = Command::new(&self.binary);
        command
            .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
            .arg(path)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                warn!(
                    input = %path.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "FFprobe timed out, killed"
                );
                return None;
            }
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                warn!(
                    input = %path.display(),
                    return_code = ?output.status.code(),
                    "FFprobe failed: non-zero exit"
                );
                return None;
            }
            Ok(Err(e)) => {
                warn!(input = %path.display(), error = %e, "FFprobe could not be started");
                return None;
            }
        };

        let json = match String::from_utf8(output.stdout) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "FFprobe output is not UTF-8");
                return None;
            }
        };
        debug!(input = %path.display(), bytes = json.len(), "FFprobe finished");
        Self::parse(&json)
    }
}
