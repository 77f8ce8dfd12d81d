//! Output artifact checks

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::ports::FsPort;

/// Existence and size of a declared output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactFacts {
    pub exists: bool,
    pub size: u64,
}

impl ArtifactFacts {
    /// A usable artifact exists and is not empty
    pub fn is_complete(&self) -> bool {
        self.exists && self.size > 0
    }
}

/// Looks at backend outputs without trusting the backend's status
pub struct ArtifactVerifier {
    fs: Arc<dyn FsPort>,
}

impl ArtifactVerifier {
    pub fn new(fs: Arc<dyn FsPort>) -> Self {
        Self { fs }
    }

    /// Collect facts about `path`; I/O errors read as "missing"
    pub async fn inspect(&self, path: &Path) -> ArtifactFacts {
        let exists = self.fs.file_exists(path).await.unwrap_or(false);
        let size = if exists {
            self.fs.get_file_size(path).await.unwrap_or(0)
        } else {
            0
        };
        debug!(path = %path.display(), exists, size, "Checked output artifact");
        ArtifactFacts { exists, size }
    }
}
