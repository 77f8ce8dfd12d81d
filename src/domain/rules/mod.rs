// Business rules - Pure decision logic of the conversion pipeline

use std::time::Duration;

use crate::domain::model::*;

/// Frame rate used whenever none can be determined
pub const DEFAULT_FPS: f64 = 10.0;

/// Frame-rate string assumed when a video stream does not declare one
pub const DEFAULT_FRAME_RATE_STRING: &str = "10/1";

/// Number of leading bytes inspected by format classification
pub const HEADER_LEN: usize = 12;

/// Classifies a file from its leading bytes
pub struct FormatClassifier;

impl FormatClassifier {
    /// Classify up to [`HEADER_LEN`] leading bytes.
    ///
    /// GIF is checked first, then WEBP, then HEIF; anything else, including a
    /// header shorter than six bytes, is [`FileFormat::Other`].
    pub fn classify(header: &[u8]) -> FileFormat {
        let header = &header[..header.len().min(HEADER_LEN)];
        if header.len() < 6 {
            return FileFormat::Other;
        }

        if &header[0..6] == b"GIF87a" || &header[0..6] == b"GIF89a" {
            return FileFormat::StandardGif;
        }

        if header.len() < HEADER_LEN {
            return FileFormat::Other;
        }

        if &header[0..4] == b"RIFF" && &header[8..12] == b"WEBP" {
            return FileFormat::Webp;
        }

        if contains(header, b"ftypmsf1") || contains(header, b"ftypheic") {
            return FileFormat::Heif;
        }

        FileFormat::Other
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Resolves the frame rate a conversion runs at
pub struct FrameRateResolver;

impl FrameRateResolver {
    /// Parse an `N/D` rate string. `None` when it is not exactly two numeric
    /// parts, the denominator is zero, or the quotient is not a positive finite
    /// number; ffmpeg rejects `fps=0` and negative rates.
    pub fn parse(rate: &str) -> Option<f64> {
        let parts: Vec<&str> = rate.trim().split('/').collect();
        if parts.len() != 2 {
            return None;
        }
        let numerator = parts[0].trim().parse::<f64>().ok()?;
        let denominator = parts[1].trim().parse::<f64>().ok()?;
        if denominator == 0.0 {
            return None;
        }
        let fps = numerator / denominator;
        (fps.is_finite() && fps > 0.0).then_some(fps)
    }

    /// Frame rate of the first video stream, [`DEFAULT_FPS`] on any failure
    pub fn resolve(probe: &ProbeResult) -> f64 {
        probe
            .first_video_stream()
            .map(|stream| {
                stream
                    .average_frame_rate
                    .as_deref()
                    .unwrap_or(DEFAULT_FRAME_RATE_STRING)
            })
            .and_then(Self::parse)
            .unwrap_or(DEFAULT_FPS)
    }

    /// Frame rate implied by sampled frame durations; `fallback` when no
    /// positive duration was recorded
    pub fn from_durations(durations_ms: &[u64], fallback: f64) -> f64 {
        if durations_ms.is_empty() {
            return fallback;
        }
        let average = durations_ms.iter().sum::<u64>() as f64 / durations_ms.len() as f64;
        if average > 0.0 {
            1000.0 / average
        } else {
            fallback
        }
    }
}

/// Deadline for one backend run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub heif: Duration,
    pub default: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            heif: Duration::from_secs(60),
            default: Duration::from_secs(30),
        }
    }
}

impl TimeoutPolicy {
    pub fn for_format(&self, format: FileFormat) -> Duration {
        match format {
            FileFormat::Heif => self.heif,
            _ => self.default,
        }
    }
}

/// Progress percentage published before item `current` of `total`, clamped to 0..=99
pub fn progress_percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (current.saturating_mul(100) / total).min(99) as u8
}

/// Fold item outcomes into batch counters
pub fn fold_outcomes<'a, I>(outcomes: I) -> BatchCounters
where
    I: IntoIterator<Item = &'a ItemOutcome>,
{
    outcomes
        .into_iter()
        .fold(BatchCounters::default(), |mut counters, outcome| {
            counters.record(outcome);
            counters
        })
}
