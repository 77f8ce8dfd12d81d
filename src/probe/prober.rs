//! Frame-rate probing

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::model::ProbeResult;
use crate::domain::rules::FrameRateResolver;
use crate::error::ItemError;
use crate::ports::MediaProbePort;

/// Wraps the media probe port and resolves frame rates from its result
pub struct MediaProber {
    probe: Arc<dyn MediaProbePort>,
}

impl MediaProber {
    pub fn new(probe: Arc<dyn MediaProbePort>) -> Self {
        Self { probe }
    }

    /// Stream metadata, or [`ItemError::ProbeFailure`] when the file could not be analyzed
    pub async fn probe(&self, path: &Path) -> Result<ProbeResult, ItemError> {
        match self.probe.probe(path).await {
            Some(result) => {
                debug!(path = %path.display(), streams = result.streams.len(), "Probed media");
                Ok(result)
            }
            None => {
                warn!(path = %path.display(), "Failed to get media information");
                Err(ItemError::ProbeFailure {
                    path: path.display().to_string(),
                })
            }
        }
    }

    /// Probe and resolve the frame rate in one step
    pub async fn frame_rate(&self, path: &Path) -> Result<f64, ItemError> {
        let result = self.probe(path).await?;
        let fps = FrameRateResolver::resolve(&result);
        debug!(path = %path.display(), fps, "Resolved frame rate");
        Ok(fps)
    }
}
