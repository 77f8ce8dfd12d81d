//! Header-based format detection

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::model::FileFormat;
use crate::domain::rules::{FormatClassifier, HEADER_LEN};
use crate::ports::FsPort;

/// Classifies files by their leading bytes
pub struct FormatSniffer {
    fs: Arc<dyn FsPort>,
}

impl FormatSniffer {
    pub fn new(fs: Arc<dyn FsPort>) -> Self {
        Self { fs }
    }

    /// Detect the format of `path`. Never fails: unreadable or short files are
    /// [`FileFormat::Other`].
    pub async fn detect(&self, path: &Path) -> FileFormat {
        match self.fs.read_header(path, HEADER_LEN).await {
            Ok(header) => {
                let format = FormatClassifier::classify(&header);
                debug!(path = %path.display(), bytes = header.len(), %format, "Detected format");
                format
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read header, treating as OTHER");
                FileFormat::Other
            }
        }
    }
}
