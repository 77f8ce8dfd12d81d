//! Animated image decoder backed by the `image` crate
//!
//! WebP animations are decoded up front into composited RGBA frames. The
//! resulting drawable plays that timeline against the wall clock once
//! started, and reports the end of the first pass through the affine
//! execution context it was started on.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, ImageFormat, ImageReader, RgbaImage};
use tracing::debug;

use crate::domain::errors::*;
use crate::engine::affinity::{ContextHandle, TaskToken};
use crate::ports::*;

/// Delays under this are played at [`DEFAULT_FRAME_DELAY`], as browsers do
const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

struct PlaybackFrame {
    image: RgbaImage,
    delay: Duration,
}

/// Decodes files into [`PlaybackDrawable`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct ImagePlaybackDecoder;

impl ImagePlaybackDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_frames(path: &Path) -> Result<Vec<PlaybackFrame>, DomainError> {
        let reader = ImageReader::open(path)?
            .with_guessed_format()
            .map_err(|e| DomainError::DecodeFail(e.to_string()))?;

        if reader.format() == Some(ImageFormat::WebP) {
            let decoder = WebPDecoder::new(BufReader::new(File::open(path)?)).map_err(decode_fail)?;
            if decoder.has_animation() {
                let frames = decoder.into_frames().collect_frames().map_err(decode_fail)?;
                return Ok(frames
                    .into_iter()
                    .map(|frame| {
                        let (numer, denom) = frame.delay().numer_denom_ms();
                        let millis = if denom == 0 { 0 } else { numer / denom };
                        PlaybackFrame {
                            image: frame.into_buffer(),
                            delay: normalize_delay(Duration::from_millis(millis as u64)),
                        }
                    })
                    .collect());
            }
        }

        let image = reader.decode().map_err(decode_fail)?.to_rgba8();
        Ok(vec![PlaybackFrame {
            image,
            delay: Duration::ZERO,
        }])
    }
}

fn decode_fail(err: image::ImageError) -> DomainError {
    DomainError::DecodeFail(err.to_string())
}

fn normalize_delay(delay: Duration) -> Duration {
    if delay < MIN_FRAME_DELAY {
        DEFAULT_FRAME_DELAY
    } else {
        delay
    }
}

impl AnimatedDecoderPort for ImagePlaybackDecoder {
    fn decode(
        &self,
        path: &Path,
        options: DecodeOptions,
    ) -> Result<Box<dyn AnimatedDrawable>, DomainError> {
        // Frames always live in main memory, so `software_allocation` holds trivially.
        let frames = Self::decode_frames(path)?;
        if frames.is_empty() {
            return Err(DomainError::DecodeFail(format!(
                "{} contains no frames",
                path.display()
            )));
        }
        debug!(
            path = %path.display(),
            frames = frames.len(),
            software = options.software_allocation,
            "Decoded image"
        );
        Ok(Box::new(PlaybackDrawable::new(frames)))
    }
}

/// Plays decoded frames against wall-clock time
pub struct PlaybackDrawable {
    frames: Vec<PlaybackFrame>,
    duration: Duration,
    started_at: Option<Instant>,
    frozen_at: Duration,
    callback: Option<Arc<dyn AnimationCallback>>,
    end_token: Option<TaskToken>,
}

impl PlaybackDrawable {
    fn new(frames: Vec<PlaybackFrame>) -> Self {
        let duration = frames.iter().map(|f| f.delay).sum();
        Self {
            frames,
            duration,
            started_at: None,
            frozen_at: Duration::ZERO,
            callback: None,
            end_token: None,
        }
    }

    fn position(&self) -> Duration {
        self.started_at
            .map(|started| started.elapsed())
            .unwrap_or(self.frozen_at)
    }

    /// Frame shown at `position`; the last frame once the timeline is exhausted
    fn frame_index(&self, position: Duration) -> usize {
        let mut elapsed = Duration::ZERO;
        for (index, frame) in self.frames.iter().enumerate() {
            elapsed += frame.delay;
            if position < elapsed {
                return index;
            }
        }
        self.frames.len().saturating_sub(1)
    }
}

impl AnimatedDrawable for PlaybackDrawable {
    fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    fn intrinsic_size(&self) -> (i32, i32) {
        self.frames
            .first()
            .map(|f| (f.image.width() as i32, f.image.height() as i32))
            .unwrap_or((0, 0))
    }

    fn register_animation_callback(&mut self, callback: Arc<dyn AnimationCallback>) {
        self.callback = Some(callback);
    }

    fn unregister_animation_callback(&mut self) {
        self.callback = None;
    }

    fn start(&mut self, context: &ContextHandle) {
        if self.started_at.is_some() {
            return;
        }
        self.started_at = Some(Instant::now());

        if let Some(callback) = self.callback.clone() {
            let on_start = Arc::clone(&callback);
            let _ = context.post(move |_| on_start.on_animation_start());

            if self.is_animated() {
                let token = context.new_token();
                let _ = context.post_delayed(token, self.duration, move |_| {
                    callback.on_animation_end()
                });
                self.end_token = Some(token);
            }
        }
    }

    fn stop(&mut self, context: &ContextHandle) {
        if let Some(token) = self.end_token.take() {
            context.remove_callbacks(token);
        }
        if let Some(started) = self.started_at.take() {
            self.frozen_at = started.elapsed();
        }
    }

    fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    fn draw(&self, canvas: &mut RgbaImage) {
        let Some(frame) = self.frames.get(self.frame_index(self.position())) else {
            return;
        };

        if frame.image.dimensions() == canvas.dimensions() {
            imageops::replace(canvas, &frame.image, 0, 0);
        } else {
            let scaled = imageops::resize(
                &frame.image,
                canvas.width(),
                canvas.height(),
                FilterType::Lanczos3,
            );
            imageops::replace(canvas, &scaled, 0, 0);
        }
    }
}
