//! Frame extraction from animated images
//!
//! The decoder's drawable only plays on the affine execution context, so
//! sampling runs there as a self-rescheduling tick. The async worker performs
//! bounded handoffs to set it up and tear it down and otherwise just waits for
//! the animation to end, the sample cap, or the sampling deadline.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use image::{ImageFormat, RgbaImage};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{ExtractedFrame, ExtractedFrames};
use crate::domain::rules::FrameRateResolver;
use crate::engine::affinity::{ContextHandle, TaskToken};
use crate::error::ItemError;
use crate::ports::{AnimatedDecoderPort, AnimatedDrawable, AnimationCallback, DecodeOptions};

/// Sampling cadence and the deadlines of each handoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSettings {
    pub sample_interval: Duration,
    pub max_samples: usize,
    pub setup_timeout: Duration,
    pub sampling_timeout: Duration,
    pub cleanup_timeout: Duration,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(33),
            max_samples: 1000,
            setup_timeout: Duration::from_secs(2),
            sampling_timeout: Duration::from_secs(10),
            cleanup_timeout: Duration::from_secs(1),
        }
    }
}

/// Decodes animated images and rasterizes them into an on-disk frame sequence
pub struct FrameExtractor {
    decoder: Arc<dyn AnimatedDecoderPort>,
    context: ContextHandle,
    settings: ExtractionSettings,
}

impl FrameExtractor {
    pub fn new(
        decoder: Arc<dyn AnimatedDecoderPort>,
        context: ContextHandle,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            decoder,
            context,
            settings,
        }
    }

    /// Extract the frames of `source` into `frames_dir` as `000001.png`,
    /// `000002.png`, ... and report the frame rate they should play at.
    /// `fallback_fps` applies when no sample duration was observed.
    pub async fn extract(
        &self,
        source: &Path,
        frames_dir: &Path,
        fallback_fps: f64,
    ) -> Result<ExtractedFrames, ItemError> {
        info!(source = %source.display(), "Extracting frames");

        let decoder = Arc::clone(&self.decoder);
        let path = source.to_path_buf();
        let drawable = tokio::task::spawn_blocking(move || {
            decoder.decode(
                &path,
                DecodeOptions {
                    software_allocation: true,
                },
            )
        })
        .await
        .map_err(|e| extraction_failure(format!("decoder task failed: {}", e)))?
        .map_err(|e| extraction_failure(e.to_string()))?;

        let frames = if drawable.is_animated() {
            self.sample(drawable).await?
        } else {
            debug!("Static image, rasterizing a single frame");
            let image = self
                .context
                .call(self.settings.setup_timeout, move |_| rasterize(drawable.as_ref()))
                .await
                .map_err(|e| extraction_failure(format!("failed to draw image: {}", e)))?;
            vec![ExtractedFrame {
                image,
                duration_ms: 0,
            }]
        };

        if frames.is_empty() {
            return Err(extraction_failure("no frames extracted".to_string()));
        }

        let durations: Vec<u64> = frames.iter().map(|f| f.duration_ms).collect();
        let fps = FrameRateResolver::from_durations(&durations, fallback_fps);
        let count = frames.len();

        let directory = frames_dir.to_path_buf();
        let target = directory.clone();
        tokio::task::spawn_blocking(move || persist_frames(&frames, &target))
            .await
            .map_err(|e| extraction_failure(format!("frame writer failed: {}", e)))?
            .map_err(|e| extraction_failure(e.to_string()))?;

        info!(frames = count, fps, directory = %directory.display(), "Frames extracted");
        Ok(ExtractedFrames {
            directory,
            count,
            fps,
        })
    }

    async fn sample(
        &self,
        drawable: Box<dyn AnimatedDrawable>,
    ) -> Result<Vec<ExtractedFrame>, ItemError> {
        let (done_tx, done_rx) = oneshot::channel();
        let session = Arc::new(SamplingSession::new(
            drawable,
            self.context.new_token(),
            &self.settings,
            done_tx,
        ));
        let mut guard = TeardownGuard {
            session: Arc::clone(&session),
            context: self.context.clone(),
            armed: true,
        };

        let callback: Arc<dyn AnimationCallback> = Arc::new(EndListener {
            session: Arc::downgrade(&session),
        });
        let setup_session = Arc::clone(&session);
        let registered = self
            .context
            .call(self.settings.setup_timeout, move |ctx| {
                {
                    let mut state = setup_session.lock();
                    state.drawable.register_animation_callback(callback);
                    state.callback_registered = true;
                    state.drawable.start(ctx);
                }
                schedule_tick(setup_session, ctx, Duration::ZERO);
                true
            })
            .await;

        if let Err(e) = registered {
            warn!(error = %e, "Animation setup did not complete");
            self.teardown(&session).await;
            guard.armed = false;
            return Err(extraction_failure(
                "failed to register animation callback".to_string(),
            ));
        }

        if tokio::time::timeout(self.settings.sampling_timeout, done_rx)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.settings.sampling_timeout.as_millis() as u64,
                "Animation timeout, using extracted frames"
            );
        }

        self.teardown(&session).await;
        guard.armed = false;

        let frames = std::mem::take(&mut session.lock().frames);
        debug!(frames = frames.len(), "Sampling finished");
        Ok(frames)
    }

    async fn teardown(&self, session: &Arc<SamplingSession>) {
        let session = Arc::clone(session);
        if let Err(e) = self
            .context
            .call(self.settings.cleanup_timeout, move |ctx| session.close(ctx))
            .await
        {
            warn!(error = %e, "Error during animation cleanup");
        }
    }
}

struct SamplingState {
    drawable: Box<dyn AnimatedDrawable>,
    frames: Vec<ExtractedFrame>,
    last_tick: Instant,
    animation_ended: bool,
    callback_registered: bool,
    closed: bool,
    done: Option<oneshot::Sender<()>>,
}

struct SamplingSession {
    state: Mutex<SamplingState>,
    tick_token: TaskToken,
    interval: Duration,
    max_samples: usize,
}

impl SamplingSession {
    fn new(
        drawable: Box<dyn AnimatedDrawable>,
        tick_token: TaskToken,
        settings: &ExtractionSettings,
        done: oneshot::Sender<()>,
    ) -> Self {
        Self {
            state: Mutex::new(SamplingState {
                drawable,
                frames: Vec::new(),
                last_tick: Instant::now(),
                animation_ended: false,
                callback_registered: false,
                closed: false,
                done: Some(done),
            }),
            tick_token,
            interval: settings.sample_interval,
            max_samples: settings.max_samples,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SamplingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs on the context
    fn close(&self, ctx: &ContextHandle) {
        ctx.remove_callbacks(self.tick_token);
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if state.callback_registered {
            state.drawable.unregister_animation_callback();
            state.callback_registered = false;
        }
        if !state.animation_ended {
            state.drawable.stop(ctx);
        }
        finish(&mut state);
    }
}

fn finish(state: &mut SamplingState) {
    if let Some(done) = state.done.take() {
        let _ = done.send(());
    }
}

struct EndListener {
    session: Weak<SamplingSession>,
}

impl AnimationCallback for EndListener {
    fn on_animation_start(&self) {
        debug!("Animation started");
    }

    fn on_animation_end(&self) {
        if let Some(session) = self.session.upgrade() {
            let mut state = session.lock();
            state.animation_ended = true;
            debug!(frames = state.frames.len(), "Animation ended");
            finish(&mut state);
        }
    }
}

/// Posts an asynchronous teardown if the extraction future is dropped mid-sampling
struct TeardownGuard {
    session: Arc<SamplingSession>,
    context: ContextHandle,
    armed: bool,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.armed {
            let session = Arc::clone(&self.session);
            let _ = self.context.post(move |ctx| session.close(ctx));
        }
    }
}

fn schedule_tick(session: Arc<SamplingSession>, ctx: &ContextHandle, delay: Duration) {
    let token = session.tick_token;
    let _ = ctx.post_delayed(token, delay, move |ctx| sample_tick(session, ctx));
}

fn sample_tick(session: Arc<SamplingSession>, ctx: &ContextHandle) {
    let mut state = session.lock();
    if state.closed {
        return;
    }

    if state.frames.len() >= session.max_samples || state.animation_ended {
        if !state.animation_ended {
            state.drawable.stop(ctx);
        }
        finish(&mut state);
        return;
    }

    let now = Instant::now();
    let duration_ms = now.duration_since(state.last_tick).as_millis() as u64;
    state.last_tick = now;

    let drawable = state.drawable.as_ref();
    match panic::catch_unwind(AssertUnwindSafe(|| rasterize(drawable))) {
        Ok(image) => {
            state.frames.push(ExtractedFrame { image, duration_ms });
            drop(state);
            let interval = session.interval;
            schedule_tick(session, ctx, interval);
        }
        Err(_) => {
            warn!("Error extracting frame, stopping sampling");
            state.animation_ended = true;
            finish(&mut state);
        }
    }
}

/// Draw the current frame onto a transparent canvas of the intrinsic size
fn rasterize(drawable: &dyn AnimatedDrawable) -> RgbaImage {
    let (width, height) = drawable.intrinsic_size();
    let mut canvas = RgbaImage::new(width.max(1) as u32, height.max(1) as u32);
    drawable.draw(&mut canvas);
    canvas
}

fn persist_frames(frames: &[ExtractedFrame], directory: &Path) -> Result<(), DomainError> {
    std::fs::create_dir_all(directory)?;
    for (i, frame) in frames.iter().enumerate() {
        let path = directory.join(ExtractedFrames::frame_name(i + 1));
        frame
            .image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| DomainError::FsFail(format!("{}: {}", path.display(), e)))?;
    }
    Ok(())
}

fn extraction_failure(message: String) -> ItemError {
    ItemError::ExtractionFailure { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::affinity::AffineContext;
    use image::Rgba;
    use tempfile::TempDir;

    /// Plays `frames` solid colors of `frame_ms` each, once or forever
    struct FakeDrawable {
        colors: Vec<Rgba<u8>>,
        frame_ms: u64,
        size: (i32, i32),
        loops_forever: bool,
        started_at: Option<Instant>,
        callback: Option<Arc<dyn AnimationCallback>>,
        end_token: Option<TaskToken>,
    }

    impl AnimatedDrawable for FakeDrawable {
        fn is_animated(&self) -> bool {
            self.colors.len() > 1
        }

        fn intrinsic_size(&self) -> (i32, i32) {
            self.size
        }

        fn register_animation_callback(&mut self, callback: Arc<dyn AnimationCallback>) {
            self.callback = Some(callback);
        }

        fn unregister_animation_callback(&mut self) {
            self.callback = None;
        }

        fn start(&mut self, context: &ContextHandle) {
            self.started_at = Some(Instant::now());
            if let Some(callback) = self.callback.clone() {
                callback.on_animation_start();
                if !self.loops_forever {
                    let token = context.new_token();
                    let total = Duration::from_millis(self.frame_ms * self.colors.len() as u64);
                    let _ = context.post_delayed(token, total, move |_| callback.on_animation_end());
                    self.end_token = Some(token);
                }
            }
        }

        fn stop(&mut self, context: &ContextHandle) {
            if let Some(token) = self.end_token.take() {
                context.remove_callbacks(token);
            }
            self.started_at = None;
        }

        fn is_running(&self) -> bool {
            self.started_at.is_some()
        }

        fn draw(&self, canvas: &mut RgbaImage) {
            let elapsed = self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0);
            let index = ((elapsed / self.frame_ms.max(1)) as usize) % self.colors.len();
            for pixel in canvas.pixels_mut() {
                *pixel = self.colors[index];
            }
        }
    }

    struct FakeDecoder {
        frames: usize,
        frame_ms: u64,
        loops_forever: bool,
        size: (i32, i32),
        fail: bool,
    }

    impl FakeDecoder {
        fn animation(frames: usize, frame_ms: u64) -> Self {
            Self {
                frames,
                frame_ms,
                loops_forever: false,
                size: (4, 3),
                fail: false,
            }
        }
    }

    impl AnimatedDecoderPort for FakeDecoder {
        fn decode(
            &self,
            _path: &Path,
            options: DecodeOptions,
        ) -> Result<Box<dyn AnimatedDrawable>, DomainError> {
            assert!(options.software_allocation);
            if self.fail {
                return Err(DomainError::DecodeFail("corrupt".to_string()));
            }
            let colors = (0..self.frames)
                .map(|i| Rgba([(i * 20) as u8, 0, 0, 255]))
                .collect();
            Ok(Box::new(FakeDrawable {
                colors,
                frame_ms: self.frame_ms,
                size: self.size,
                loops_forever: self.loops_forever,
                started_at: None,
                callback: None,
                end_token: None,
            }))
        }
    }

    fn settings(interval_ms: u64) -> ExtractionSettings {
        ExtractionSettings {
            sample_interval: Duration::from_millis(interval_ms),
            ..ExtractionSettings::default()
        }
    }

    async fn extract_with(
        decoder: FakeDecoder,
        settings: ExtractionSettings,
        fallback_fps: f64,
    ) -> (TempDir, Result<ExtractedFrames, ItemError>) {
        let context = AffineContext::spawn("test-extractor").unwrap();
        let extractor = FrameExtractor::new(Arc::new(decoder), context.handle(), settings);
        let dir = TempDir::new().unwrap();
        let frames_dir = dir.path().join("frames_1");
        let result = extractor
            .extract(&dir.path().join("input.webp"), &frames_dir, fallback_fps)
            .await;
        (dir, result)
    }

    #[tokio::test]
    async fn test_static_image_yields_one_frame_at_fallback_fps() {
        let (_dir, result) = extract_with(FakeDecoder::animation(1, 100), settings(10), 12.0).await;
        let frames = result.unwrap();
        assert_eq!(frames.count, 1);
        assert_eq!(frames.fps, 12.0);
        assert!(frames.directory.join("000001.png").exists());
        assert!(!frames.directory.join("000002.png").exists());
    }

    #[tokio::test]
    async fn test_animation_is_sampled_until_it_ends() {
        let (_dir, result) = extract_with(FakeDecoder::animation(5, 40), settings(10), 10.0).await;
        let frames = result.unwrap();
        assert!(frames.count > 1, "sampled {} frames", frames.count);
        assert!(frames.count <= 1000);
        assert!(frames.fps > 0.0);
        for n in 1..=frames.count {
            assert!(frames.directory.join(ExtractedFrames::frame_name(n)).exists());
        }

        let first = image::open(frames.directory.join("000001.png")).unwrap();
        assert_eq!((first.width(), first.height()), (4, 3));
    }

    #[tokio::test]
    async fn test_sampling_rate_matches_interval() {
        let (_dir, result) = extract_with(FakeDecoder::animation(10, 100), settings(100), 25.0).await;
        let frames = result.unwrap();
        assert!(
            frames.fps > 8.0 && frames.fps < 13.0,
            "fps was {}",
            frames.fps
        );
    }

    #[tokio::test]
    async fn test_sample_cap_ends_endless_animation() {
        let decoder = FakeDecoder {
            loops_forever: true,
            ..FakeDecoder::animation(3, 20)
        };
        let settings = ExtractionSettings {
            sample_interval: Duration::from_millis(5),
            max_samples: 3,
            sampling_timeout: Duration::from_secs(5),
            ..ExtractionSettings::default()
        };
        let started = Instant::now();
        let (_dir, result) = extract_with(decoder, settings, 10.0).await;
        assert_eq!(result.unwrap().count, 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sampling_deadline_keeps_collected_frames() {
        let decoder = FakeDecoder {
            loops_forever: true,
            ..FakeDecoder::animation(3, 20)
        };
        let settings = ExtractionSettings {
            sample_interval: Duration::from_millis(10),
            sampling_timeout: Duration::from_millis(100),
            ..ExtractionSettings::default()
        };
        let (_dir, result) = extract_with(decoder, settings, 10.0).await;
        assert!(result.unwrap().count >= 1);
    }

    #[tokio::test]
    async fn test_zero_size_is_clamped() {
        let decoder = FakeDecoder {
            size: (0, -1),
            ..FakeDecoder::animation(1, 100)
        };
        let (_dir, result) = extract_with(decoder, settings(10), 10.0).await;
        let frames = result.unwrap();
        let first = image::open(frames.directory.join("000001.png")).unwrap();
        assert_eq!((first.width(), first.height()), (1, 1));
    }

    #[tokio::test]
    async fn test_decode_failure_is_extraction_failure() {
        let decoder = FakeDecoder {
            fail: true,
            ..FakeDecoder::animation(2, 100)
        };
        let (_dir, result) = extract_with(decoder, settings(10), 10.0).await;
        assert!(matches!(result, Err(ItemError::ExtractionFailure { .. })));
    }
}
