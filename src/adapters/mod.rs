// Adapters - External system implementations

pub mod console_progress;
pub mod ffmpeg_cli;
pub mod ffprobe_json;
pub mod fs_local;
pub mod image_decoder;

// Re-export adapters
pub use console_progress::{ConsoleProgressAdapter, NullProgress};
pub use ffmpeg_cli::FfmpegCliAdapter;
pub use ffprobe_json::FfprobeJsonAdapter;
pub use fs_local::LocalFsAdapter;
pub use image_decoder::ImagePlaybackDecoder;
