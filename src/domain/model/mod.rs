// Domain models - Core types and data structures

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// Container format of an input file, decided once per item from its header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileFormat {
    /// GIF87a or GIF89a
    StandardGif,
    /// HEIF image or image sequence (ftypheic / ftypmsf1)
    Heif,
    /// RIFF....WEBP container
    Webp,
    /// Anything else; left to the backend to auto-detect
    Other,
}

impl FileFormat {
    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::StandardGif => "STANDARD_GIF",
            FileFormat::Heif => "HEIF",
            FileFormat::Webp => "WEBP",
            FileFormat::Other => "OTHER",
        }
    }

    /// Whether the item is satisfied by a byte-level copy
    pub fn is_copy_only(&self) -> bool {
        matches!(self, FileFormat::StandardGif)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One input of a batch with its 1-based position
#[derive(Debug, Clone, PartialEq)]
pub struct InputItem {
    pub path: PathBuf,
    pub index: usize,
    pub total: usize,
}

impl InputItem {
    /// Build the immutable item list for a batch
    pub fn batch<I, P>(paths: I) -> Vec<InputItem>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        let total = paths.len();
        paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| InputItem {
                path,
                index: i + 1,
                total,
            })
            .collect()
    }

    /// File name without extension, used to name the delivered GIF
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("converted_{}", self.index))
    }
}

/// One stream entry reported by the media prober
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    #[serde(default, rename = "codec_type")]
    pub kind: Option<String>,
    #[serde(default, rename = "avg_frame_rate")]
    pub average_frame_rate: Option<String>,
}

impl StreamDescriptor {
    pub fn video(average_frame_rate: Option<&str>) -> Self {
        Self {
            kind: Some("video".to_string()),
            average_frame_rate: average_frame_rate.map(str::to_string),
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind.as_deref() == Some("video")
    }
}

/// Media metadata for one input; created per item and discarded after fps resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
}

impl ProbeResult {
    pub fn first_video_stream(&self) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.is_video())
    }
}

/// A rasterized animation sample and the wall-clock time since the previous sample
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    pub image: RgbaImage,
    pub duration_ms: u64,
}

/// An on-disk frame sequence produced by the frame extractor
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrames {
    pub directory: PathBuf,
    pub count: usize,
    pub fps: f64,
}

impl ExtractedFrames {
    /// Printf-style name pattern of the persisted frames
    pub const NAME_PATTERN: &'static str = "%06d.png";

    /// Name of the 1-based frame `number`
    pub fn frame_name(number: usize) -> String {
        format!("{:06}.png", number)
    }

    pub fn pattern(&self) -> PathBuf {
        self.directory.join(Self::NAME_PATTERN)
    }
}

/// Input side of a backend invocation
#[derive(Debug, Clone, PartialEq)]
pub enum JobSource {
    /// The original input file, demuxed by the backend
    File(PathBuf),
    /// An indexed image sequence read at a fixed rate
    FrameSequence { pattern: PathBuf, framerate: f64 },
}

impl JobSource {
    pub fn path(&self) -> &Path {
        match self {
            JobSource::File(path) => path,
            JobSource::FrameSequence { pattern, .. } => pattern,
        }
    }
}

/// One stage of the backend processing chain
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Frame-rate resampling
    Fps(f64),
    /// Identity-size Lanczos resampling
    LanczosScale,
    /// Palette generation with a reserved transparent slot followed by palette application
    TransparentPalette,
}

impl Filter {
    fn render(&self) -> String {
        match self {
            Filter::Fps(fps) => format!("fps={}", format_rate(*fps)),
            Filter::LanczosScale => "scale=iw:ih:flags=lanczos".to_string(),
            Filter::TransparentPalette => {
                "split[s0][s1];[s0]palettegen=reserve_transparent=1[p];[s1][p]paletteuse"
                    .to_string()
            }
        }
    }
}

/// Ordered filter chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain(pub Vec<Filter>);

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, filter: &Filter) -> bool {
        self.0.contains(filter)
    }

    /// Render as a filtergraph string
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(Filter::render)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Fully resolved description of one backend invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub source: JobSource,
    pub filters: FilterChain,
    pub codec: String,
    pub output: PathBuf,
}

impl TranscodeJob {
    pub const GIF_CODEC: &'static str = "gif";

    pub fn gif(source: JobSource, filters: FilterChain, output: impl Into<PathBuf>) -> Self {
        Self {
            source,
            filters,
            codec: Self::GIF_CODEC.to_string(),
            output: output.into(),
        }
    }

    /// Frame rate the job reads its input at, if it pins one
    pub fn input_framerate(&self) -> Option<f64> {
        match &self.source {
            JobSource::FrameSequence { framerate, .. } => Some(*framerate),
            JobSource::File(_) => None,
        }
    }

    /// Backend command-line arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string()];
        if let JobSource::FrameSequence { framerate, .. } = &self.source {
            args.push("-framerate".to_string());
            args.push(format_rate(*framerate));
        }
        args.push("-i".to_string());
        args.push(self.source.path().to_string_lossy().to_string());
        if !self.filters.is_empty() {
            args.push("-vf".to_string());
            args.push(self.filters.render());
        }
        args.push("-an".to_string());
        args.push("-c:v".to_string());
        args.push(self.codec.clone());
        args.push("-y".to_string());
        args.push(self.output.to_string_lossy().to_string());
        args
    }

    /// A job with no input, output or codec cannot be run
    pub fn is_runnable(&self) -> bool {
        !self.source.path().as_os_str().is_empty()
            && !self.output.as_os_str().is_empty()
            && !self.codec.is_empty()
    }

    /// Single-line command text, for logging
    pub fn command_line(&self) -> String {
        self.to_args()
            .iter()
            .map(|arg| {
                if arg.contains(' ') || arg.contains(';') {
                    format!("\"{}\"", arg)
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Render a frame rate without a trailing `.0`
pub fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 && rate.abs() < 1e15 {
        format!("{}", rate as i64)
    } else {
        format!("{}", rate)
    }
}

/// How a backend run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    Failure,
    TimedOutSalvaged,
    TimedOutFailed,
}

/// Result of one backend run with the facts used to resolve it
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub kind: OutcomeKind,
    pub return_code: Option<i32>,
    pub log: String,
    pub output_exists: bool,
    pub output_size: u64,
}

impl ExecutionOutcome {
    /// Whether the artifact may be delivered
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Success | OutcomeKind::TimedOutSalvaged)
    }
}

/// Final disposition of one item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Already a standard GIF; copied to the destination
    Copied { destination: PathBuf },
    /// Converted by the backend and delivered
    Converted {
        destination: PathBuf,
        kind: OutcomeKind,
    },
    /// Counted as a failure
    Failed(ItemError),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ItemOutcome::Failed(_))
    }
}

/// Running success/failure counters of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    pub success_count: usize,
    pub fail_count: usize,
}

impl BatchCounters {
    /// Account one item outcome; each item lands in exactly one counter
    pub fn record(&mut self, outcome: &ItemOutcome) {
        if outcome.is_success() {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
    }

    pub fn processed(&self) -> usize {
        self.success_count + self.fail_count
    }
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl BatchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchPhase::Completed | BatchPhase::Cancelled)
    }
}

/// Read-only progress view published before each item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSnapshot {
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    pub counters: BatchCounters,
}

/// Aggregate notification pair emitted once a batch completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub had_success: bool,
    pub had_failure: bool,
}

impl From<BatchCounters> for BatchSummary {
    fn from(counters: BatchCounters) -> Self {
        Self {
            had_success: counters.success_count > 0,
            had_failure: counters.fail_count > 0,
        }
    }
}

/// Per-item line of the batch report
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub index: usize,
    pub path: PathBuf,
    pub format: Option<FileFormat>,
    pub success: bool,
    pub destination: Option<PathBuf>,
    pub outcome: Option<OutcomeKind>,
    pub error: Option<String>,
}

impl ItemReport {
    pub fn new(item: &InputItem, format: Option<FileFormat>, outcome: &ItemOutcome) -> Self {
        let (destination, kind, error) = match outcome {
            ItemOutcome::Copied { destination } => (Some(destination.clone()), None, None),
            ItemOutcome::Converted { destination, kind } => {
                (Some(destination.clone()), Some(*kind), None)
            }
            ItemOutcome::Failed(err) => (None, None, Some(err.to_string())),
        };
        Self {
            index: item.index,
            path: item.path.clone(),
            format,
            success: outcome.is_success(),
            destination,
            outcome: kind,
            error,
        }
    }
}

/// What a finished batch run reports to its caller
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub phase: BatchPhase,
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            had_success: self.success_count > 0,
            had_failure: self.fail_count > 0,
        }
    }
}
