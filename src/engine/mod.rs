//! Conversion engine: thread-affine context, frame extraction, backend execution and cancellation

pub mod affinity;
pub mod cancel;
pub mod executor;
pub mod extractor;

pub use affinity::{AffineContext, ContextError, ContextHandle, TaskToken};
pub use cancel::{CancellationController, CancellationToken};
pub use executor::TranscodeExecutor;
pub use extractor::{ExtractionSettings, FrameExtractor};
