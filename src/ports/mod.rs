// Ports - Interface definitions (contracts) for every external collaborator

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::sync::{mpsc, oneshot};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::engine::affinity::ContextHandle;

/// Streaming diagnostic lines of a backend session
pub type LogSink = mpsc::UnboundedSender<String>;

/// Single-fire completion signal of a backend session
pub type CompletionReceiver = oneshot::Receiver<SessionResult>;

/// What the backend reports when a session finishes
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    /// Process return code, `None` when killed by a signal or cancelled
    pub return_code: Option<i32>,
    pub success: bool,
    /// Full diagnostic log text
    pub logs: String,
}

/// Port for the transcoding backend
#[async_trait]
pub trait TranscodePort: Send + Sync {
    /// Start `job` asynchronously. The returned receiver fires once when the
    /// session ends; log lines are streamed to `log_sink` meanwhile.
    async fn submit(
        &self,
        job: &TranscodeJob,
        log_sink: LogSink,
    ) -> Result<CompletionReceiver, DomainError>;

    /// Abort every in-flight session
    fn cancel(&self);

    /// Forget finished and aborted sessions
    fn clear_sessions(&self);

    /// Whether the native demuxer understands WebP animation chunks
    fn decodes_animated_webp(&self) -> bool;
}

/// Port for media metadata probing
#[async_trait]
pub trait MediaProbePort: Send + Sync {
    /// Stream metadata of `path`, `None` when the file could not be analyzed
    async fn probe(&self, path: &Path) -> Option<ProbeResult>;
}

/// Options passed to the animated-image decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    /// Request pixel memory that can be read back by the CPU
    pub software_allocation: bool,
}

/// Receives animation start/end notifications on the affine context
pub trait AnimationCallback: Send + Sync {
    fn on_animation_start(&self) {}

    fn on_animation_end(&self);
}

/// A decoded, possibly animated image that plays against wall-clock time.
///
/// Every method except [`AnimatedDrawable::is_animated`] and
/// [`AnimatedDrawable::intrinsic_size`] must be called on the affine context
/// whose handle is passed to `start`/`stop`.
pub trait AnimatedDrawable: Send {
    fn is_animated(&self) -> bool;

    /// Natural size; may be non-positive when unknown
    fn intrinsic_size(&self) -> (i32, i32);

    fn register_animation_callback(&mut self, callback: Arc<dyn AnimationCallback>);

    fn unregister_animation_callback(&mut self);

    /// Begin playback; notifications are posted to `context`
    fn start(&mut self, context: &ContextHandle);

    /// Freeze playback and withdraw pending notifications
    fn stop(&mut self, context: &ContextHandle);

    fn is_running(&self) -> bool;

    /// Render the current frame onto `canvas`, scaled to its bounds
    fn draw(&self, canvas: &mut RgbaImage);
}

/// Port for the animated-image decoder
pub trait AnimatedDecoderPort: Send + Sync {
    fn decode(
        &self,
        path: &Path,
        options: DecodeOptions,
    ) -> Result<Box<dyn AnimatedDrawable>, DomainError>;
}

/// Port for file system operations
#[async_trait]
pub trait FsPort: Send + Sync {
    /// Check if file exists
    async fn file_exists(&self, path: &Path) -> Result<bool, DomainError>;

    /// Check if file can be opened for reading
    async fn is_readable(&self, path: &Path) -> Result<bool, DomainError>;

    /// Get file size
    async fn get_file_size(&self, path: &Path) -> Result<u64, DomainError>;

    /// Read up to `len` leading bytes
    async fn read_header(&self, path: &Path, len: usize) -> Result<Vec<u8>, DomainError>;

    /// Create directory (including parent directories)
    async fn create_directory(&self, path: &Path) -> Result<(), DomainError>;

    /// Allocate a fresh destination `<stem>.<extension>` that does not overwrite anything
    async fn create_output_file(&self, stem: &str, extension: &str)
        -> Result<PathBuf, DomainError>;

    /// Copy bytes, optionally deleting the source afterwards
    async fn copy_file(&self, from: &Path, to: &Path, delete_source: bool)
        -> Result<(), DomainError>;

    /// Delete file
    async fn delete_file(&self, path: &Path) -> Result<(), DomainError>;
}

/// Port for progress and summary presentation
pub trait ProgressPort: Send + Sync {
    /// Published before each item starts
    fn on_progress(&self, snapshot: &BatchSnapshot);

    /// Published once after the last item of a completed batch
    fn on_summary(&self, summary: &BatchSummary);
}
