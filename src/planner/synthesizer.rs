//! Backend command synthesis
//!
//! Maps a detected format, an optional extracted frame sequence and the probed
//! frame rate to a [`TranscodeJob`]. The choice between the frame-sequence job
//! and the direct pass over the original file is made by
//! [`CommandSynthesizer::with_fallback`].

use std::path::Path;

use tracing::{debug, warn};

use crate::domain::model::{
    ExtractedFrames, FileFormat, Filter, FilterChain, JobSource, TranscodeJob,
};
use crate::error::ItemError;

/// What the pipeline does with an item
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionPlan {
    /// Byte-level copy of the source; no backend involvement
    CopyOnly,
    Transcode(TranscodeJob),
}

/// Pure job builder
pub struct CommandSynthesizer;

impl CommandSynthesizer {
    /// Build the plan for one item. `frames` is only honored for WEBP.
    pub fn synthesize(
        format: FileFormat,
        frames: Option<&ExtractedFrames>,
        source: &Path,
        probed_fps: f64,
        output: &Path,
    ) -> ConversionPlan {
        let job = match (format, frames) {
            (FileFormat::StandardGif, _) => return ConversionPlan::CopyOnly,
            (FileFormat::Webp, Some(frames)) => Self::frame_sequence_job(frames, output),
            _ => Self::direct_pass_job(format, source, probed_fps, output),
        };
        debug!(%format, args = job.to_args().len(), "Synthesized job");
        ConversionPlan::Transcode(job)
    }

    /// Indexed PNG sequence at the extracted frame rate, quantized with a
    /// transparency-preserving palette
    pub fn frame_sequence_job(frames: &ExtractedFrames, output: &Path) -> TranscodeJob {
        TranscodeJob::gif(
            JobSource::FrameSequence {
                pattern: frames.pattern(),
                framerate: frames.fps,
            },
            FilterChain::new(vec![Filter::TransparentPalette]),
            output,
        )
    }

    /// Single pass over the original file. HEIF additionally keeps its alpha
    /// through quantization.
    pub fn direct_pass_job(
        format: FileFormat,
        source: &Path,
        fps: f64,
        output: &Path,
    ) -> TranscodeJob {
        let mut filters = vec![Filter::Fps(fps), Filter::LanczosScale];
        if format == FileFormat::Heif {
            filters.push(Filter::TransparentPalette);
        }
        TranscodeJob::gif(
            JobSource::File(source.to_path_buf()),
            FilterChain::new(filters),
            output,
        )
    }

    /// Frame-sequence job when extraction succeeded, otherwise the direct pass
    /// over the original WEBP
    pub fn with_fallback(
        extraction: Result<ExtractedFrames, ItemError>,
        source: &Path,
        probed_fps: f64,
        output: &Path,
    ) -> TranscodeJob {
        extraction
            .map(|frames| Self::frame_sequence_job(&frames, output))
            .unwrap_or_else(|e| {
                warn!(error = %e, "Frame extraction failed, falling back to direct conversion");
                Self::direct_pass_job(FileFormat::Webp, source, probed_fps, output)
            })
    }
}
