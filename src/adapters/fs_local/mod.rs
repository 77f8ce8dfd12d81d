// Local filesystem adapter - File system operations and output allocation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::domain::errors::*;
use crate::ports::*;

/// Filesystem adapter rooted at an output directory
pub struct LocalFsAdapter {
    output_dir: PathBuf,
}

impl LocalFsAdapter {
    /// Adapter that delivers into the working directory
    pub fn new() -> Self {
        Self::with_output_dir(".")
    }

    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn candidate(&self, stem: &str, extension: &str, attempt: usize) -> PathBuf {
        let name = if attempt == 0 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{} ({}).{}", stem, attempt, extension)
        };
        self.output_dir.join(name)
    }
}

impl Default for LocalFsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_NAME_ATTEMPTS: usize = 10_000;

#[async_trait]
impl FsPort for LocalFsAdapter {
    async fn file_exists(&self, path: &Path) -> Result<bool, DomainError> {
        Ok(fs::try_exists(path).await.unwrap_or(false) && path.is_file())
    }

    async fn is_readable(&self, path: &Path) -> Result<bool, DomainError> {
        Ok(fs::File::open(path).await.is_ok())
    }

    async fn get_file_size(&self, path: &Path) -> Result<u64, DomainError> {
        let metadata = fs::metadata(path).await?;
        Ok(metadata.len())
    }

    async fn read_header(&self, path: &Path, len: usize) -> Result<Vec<u8>, DomainError> {
        let file = fs::File::open(path).await?;
        let mut header = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut header).await?;
        Ok(header)
    }

    async fn create_directory(&self, path: &Path) -> Result<(), DomainError> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| DomainError::FsFail(format!("Failed to create directory: {}", e)))
    }

    async fn create_output_file(
        &self,
        stem: &str,
        extension: &str,
    ) -> Result<PathBuf, DomainError> {
        self.create_directory(&self.output_dir).await?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.candidate(stem, extension, attempt);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    debug!(path = %path.display(), "Allocated output file");
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(DomainError::FsFail(format!(
                        "Failed to create output file {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        Err(DomainError::FsFail(format!(
            "No free output name for {}.{}",
            stem, extension
        )))
    }

    async fn copy_file(
        &self,
        from: &Path,
        to: &Path,
        delete_source: bool,
    ) -> Result<(), DomainError> {
        if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.create_directory(parent).await?;
        }

        fs::copy(from, to).await.map_err(|e| {
            DomainError::FsFail(format!(
                "Failed to copy file from {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;

        if delete_source {
            if let Err(e) = fs::remove_file(from).await {
                warn!(path = %from.display(), error = %e, "Failed to delete copied source");
            }
        }
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<(), DomainError> {
        fs::remove_file(path)
            .await
            .map_err(|e| DomainError::FsFail(format!("Failed to delete file: {}", e)))
    }
}
