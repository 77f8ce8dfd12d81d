use super::*;
use crate::adapters::fs_local::LocalFsAdapter;
use crate::domain::errors::DomainError;
use crate::engine::{AffineContext, TaskToken};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::oneshot;

const GIF_BYTES: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00;";
const WEBP_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8X\x0a\x00\x00\x00";
const HEIF_BYTES: &[u8] = b"\x00\x00\x00\x18ftypheic\x00\x00\x00\x00mif1";
const MP4_BYTES: &[u8] = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00";

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Succeed,
    Fail(i32),
    Hang,
    /// Writes the GIF but never reports completion
    HangAfterWriting,
}

struct FakeBackend {
    behavior: Behavior,
    jobs: Mutex<Vec<TranscodeJob>>,
    parked: Mutex<Vec<oneshot::Sender<SessionResult>>>,
    cancels: AtomicUsize,
    /// Set the token when the n-th job (1-based) is submitted
    cancel_on: Option<(usize, Arc<CancellationToken>)>,
}

impl FakeBackend {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            jobs: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            cancel_on: None,
        }
    }

    fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscodePort for FakeBackend {
    async fn submit(
        &self,
        job: &TranscodeJob,
        _log_sink: LogSink,
    ) -> Result<CompletionReceiver, DomainError> {
        let submitted = {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.push(job.clone());
            jobs.len()
        };
        let (tx, rx) = oneshot::channel();

        if let Some((n, token)) = &self.cancel_on {
            if *n == submitted {
                token.set();
                self.parked.lock().unwrap().push(tx);
                return Ok(rx);
            }
        }

        match self.behavior {
            Behavior::Succeed => {
                std::fs::write(&job.output, GIF_BYTES).unwrap();
                let _ = tx.send(SessionResult {
                    return_code: Some(0),
                    success: true,
                    logs: String::new(),
                });
            }
            Behavior::Fail(code) => {
                let _ = tx.send(SessionResult {
                    return_code: Some(code),
                    success: false,
                    logs: "Invalid data found when processing input".to_string(),
                });
            }
            Behavior::Hang => self.parked.lock().unwrap().push(tx),
            Behavior::HangAfterWriting => {
                std::fs::write(&job.output, GIF_BYTES).unwrap();
                self.parked.lock().unwrap().push(tx);
            }
        }
        Ok(rx)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_sessions(&self) {}

    fn decodes_animated_webp(&self) -> bool {
        false
    }
}

struct FakeProbe {
    result: Option<ProbeResult>,
    calls: AtomicUsize,
}

impl FakeProbe {
    fn with_rate(rate: &str) -> Self {
        Self {
            result: Some(ProbeResult {
                streams: vec![StreamDescriptor::video(Some(rate))],
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaProbePort for FakeProbe {
    async fn probe(&self, _path: &Path) -> Option<ProbeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Solid-color animation of `frames` frames, `frame_ms` each, played once
struct FakeDrawable {
    frames: usize,
    frame_ms: u64,
    started_at: Option<Instant>,
    callback: Option<Arc<dyn AnimationCallback>>,
    end_token: Option<TaskToken>,
}

impl AnimatedDrawable for FakeDrawable {
    fn is_animated(&self) -> bool {
        self.frames > 1
    }

    fn intrinsic_size(&self) -> (i32, i32) {
        (4, 4)
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
            let token = context.new_token();
            let total = Duration::from_millis(self.frame_ms * self.frames as u64);
            let _ = context.post_delayed(token, total, move |_| callback.on_animation_end());
            self.end_token = Some(token);
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
        for pixel in canvas.pixels_mut() {
            *pixel = Rgba([0, 128, 255, 128]);
        }
    }
}

enum FakeDecoder {
    Animation { frames: usize, frame_ms: u64 },
    Broken,
}

impl AnimatedDecoderPort for FakeDecoder {
    fn decode(
        &self,
        _path: &Path,
        _options: DecodeOptions,
    ) -> Result<Box<dyn AnimatedDrawable>, DomainError> {
        match self {
            FakeDecoder::Animation { frames, frame_ms } => Ok(Box::new(FakeDrawable {
                frames: *frames,
                frame_ms: *frame_ms,
                started_at: None,
                callback: None,
                end_token: None,
            })),
            FakeDecoder::Broken => Err(DomainError::DecodeFail("corrupt chunk".to_string())),
        }
    }
}

#[derive(Default)]
struct RecordingProgress {
    snapshots: Mutex<Vec<BatchSnapshot>>,
    summaries: Mutex<Vec<BatchSummary>>,
}

impl ProgressPort for RecordingProgress {
    fn on_progress(&self, snapshot: &BatchSnapshot) {
        self.snapshots.lock().unwrap().push(*snapshot);
    }

    fn on_summary(&self, summary: &BatchSummary) {
        self.summaries.lock().unwrap().push(*summary);
    }
}

/// Local filesystem whose copies set the token and then never finish
struct StallingCopyFs {
    inner: LocalFsAdapter,
    token: Arc<CancellationToken>,
}

#[async_trait]
impl FsPort for StallingCopyFs {
    async fn file_exists(&self, path: &Path) -> Result<bool, DomainError> {
        self.inner.file_exists(path).await
    }

    async fn is_readable(&self, path: &Path) -> Result<bool, DomainError> {
        self.inner.is_readable(path).await
    }

    async fn get_file_size(&self, path: &Path) -> Result<u64, DomainError> {
        self.inner.get_file_size(path).await
    }

    async fn read_header(&self, path: &Path, len: usize) -> Result<Vec<u8>, DomainError> {
        self.inner.read_header(path, len).await
    }

    async fn create_directory(&self, path: &Path) -> Result<(), DomainError> {
        self.inner.create_directory(path).await
    }

    async fn create_output_file(
        &self,
        stem: &str,
        extension: &str,
    ) -> Result<PathBuf, DomainError> {
        self.inner.create_output_file(stem, extension).await
    }

    async fn copy_file(
        &self,
        _from: &Path,
        _to: &Path,
        _delete_source: bool,
    ) -> Result<(), DomainError> {
        self.token.set();
        std::future::pending().await
    }

    async fn delete_file(&self, path: &Path) -> Result<(), DomainError> {
        self.inner.delete_file(path).await
    }
}

fn stalling_copies(
    token: &Arc<CancellationToken>,
) -> impl FnOnce(LocalFsAdapter) -> Arc<dyn FsPort> {
    let token = Arc::clone(token);
    move |inner| Arc::new(StallingCopyFs { inner, token }) as Arc<dyn FsPort>
}

struct Harness {
    _context: AffineContext,
    inputs: TempDir,
    outputs: TempDir,
    backend: Arc<FakeBackend>,
    probe: Arc<FakeProbe>,
    progress: Arc<RecordingProgress>,
    orchestrator: BatchOrchestrator,
}

impl Harness {
    fn new(backend: FakeBackend, probe: FakeProbe, decoder: FakeDecoder) -> Self {
        Self::with_token(backend, probe, decoder, CancellationToken::new())
    }

    fn with_token(
        backend: FakeBackend,
        probe: FakeProbe,
        decoder: FakeDecoder,
        token: Arc<CancellationToken>,
    ) -> Self {
        Self::with_fs(backend, probe, decoder, token, |fs| {
            Arc::new(fs) as Arc<dyn FsPort>
        })
    }

    fn with_fs(
        backend: FakeBackend,
        probe: FakeProbe,
        decoder: FakeDecoder,
        token: Arc<CancellationToken>,
        wrap_fs: impl FnOnce(LocalFsAdapter) -> Arc<dyn FsPort>,
    ) -> Self {
        let context = AffineContext::spawn("test-batch").unwrap();
        let inputs = TempDir::new().unwrap();
        let outputs = TempDir::new().unwrap();
        let backend = Arc::new(backend);
        let probe = Arc::new(probe);
        let progress = Arc::new(RecordingProgress::default());

        let ports = BatchPorts {
            fs: wrap_fs(LocalFsAdapter::with_output_dir(outputs.path())),
            probe: probe.clone(),
            backend: backend.clone(),
            decoder: Arc::new(decoder),
            progress: progress.clone(),
        };
        let settings = BatchSettings {
            timeouts: TimeoutPolicy {
                heif: Duration::from_millis(400),
                default: Duration::from_millis(200),
            },
            extraction: ExtractionSettings {
                sample_interval: Duration::from_millis(10),
                ..ExtractionSettings::default()
            },
        };
        let orchestrator = BatchOrchestrator::new(ports, context.handle(), token, settings);

        Self {
            _context: context,
            inputs,
            outputs,
            backend,
            probe,
            progress,
            orchestrator,
        }
    }

    fn input(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.inputs.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn delivered(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.outputs.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

fn still() -> FakeDecoder {
    FakeDecoder::Animation {
        frames: 1,
        frame_ms: 100,
    }
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("10/1"), still());
    let err = h.orchestrator.run(Vec::new()).await.unwrap_err();
    assert!(matches!(err, GifFixError::EmptyBatch));
    assert_eq!(h.orchestrator.phase(), BatchPhase::Idle);
}

#[tokio::test]
async fn test_orchestrator_runs_once() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("10/1"), still());
    let gif = h.input("a.gif", GIF_BYTES);
    h.orchestrator.run(vec![gif.clone()]).await.unwrap();
    let err = h.orchestrator.run(vec![gif]).await.unwrap_err();
    assert!(matches!(err, GifFixError::AlreadyRun));
}

#[tokio::test]
async fn test_standard_gif_is_copied_byte_for_byte() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("10/1"), still());
    let gif = h.input("cat.gif", GIF_BYTES);

    let report = h.orchestrator.run(vec![gif.clone()]).await.unwrap();

    assert_eq!(report.phase, BatchPhase::Completed);
    assert_eq!((report.success_count, report.fail_count), (1, 0));
    assert_eq!(
        std::fs::read(h.outputs.path().join("cat.gif")).unwrap(),
        GIF_BYTES
    );
    assert!(gif.exists());
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);
    assert!(h.backend.jobs().is_empty());
    assert_eq!(report.items[0].format, Some(FileFormat::StandardGif));
}

#[tokio::test]
async fn test_backend_failure_on_other_delivers_nothing() {
    let h = Harness::new(FakeBackend::new(Behavior::Fail(1)), FakeProbe::with_rate("25/1"), still());
    let clip = h.input("clip.mp4", MP4_BYTES);

    let report = h.orchestrator.run(vec![clip]).await.unwrap();

    assert_eq!((report.success_count, report.fail_count), (0, 1));
    assert!(h.delivered().is_empty());
    let jobs = h.backend.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].filters.render(), "fps=25,scale=iw:ih:flags=lanczos");
    assert_eq!(
        *h.progress.summaries.lock().unwrap(),
        vec![BatchSummary {
            had_success: false,
            had_failure: true
        }]
    );
}

#[tokio::test]
async fn test_preflight_failures_are_counted() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("10/1"), still());
    let missing = h.inputs.path().join("missing.webp");
    let empty = h.input("empty.webp", b"");

    let report = h.orchestrator.run(vec![missing, empty]).await.unwrap();

    assert_eq!((report.success_count, report.fail_count), (0, 2));
    assert!(report.items.iter().all(|i| i.format.is_none()));
    assert!(h.backend.jobs().is_empty());
}

#[tokio::test]
async fn test_probe_failure_fails_item() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::failing(), still());
    let heif = h.input("photo.heic", HEIF_BYTES);

    let report = h.orchestrator.run(vec![heif]).await.unwrap();

    assert_eq!(report.fail_count, 1);
    assert_eq!(report.items[0].format, Some(FileFormat::Heif));
    assert!(h.backend.jobs().is_empty());
}

#[tokio::test]
async fn test_heif_job_keeps_transparency() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("30/1"), still());
    let heif = h.input("photo.heic", HEIF_BYTES);

    let report = h.orchestrator.run(vec![heif]).await.unwrap();

    assert_eq!(report.success_count, 1);
    let jobs = h.backend.jobs();
    assert!(jobs[0].filters.contains(&Filter::TransparentPalette));
    assert!(jobs[0].filters.contains(&Filter::Fps(30.0)));
    assert_eq!(h.delivered(), vec!["photo.gif".to_string()]);
}

#[tokio::test]
async fn test_static_webp_becomes_single_frame_job() {
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("12/1"), still());
    let webp = h.input("sticker.webp", WEBP_BYTES);

    let report = h.orchestrator.run(vec![webp]).await.unwrap();

    assert_eq!(report.success_count, 1);
    let jobs = h.backend.jobs();
    assert_eq!(jobs[0].input_framerate(), Some(12.0));
    assert_eq!(jobs[0].filters, FilterChain::new(vec![Filter::TransparentPalette]));
    assert!(jobs[0].source.path().ends_with("%06d.png"));
    assert_eq!(h.delivered(), vec!["sticker.gif".to_string()]);
}

#[tokio::test]
async fn test_animated_webp_uses_sampled_rate() {
    let decoder = FakeDecoder::Animation {
        frames: 5,
        frame_ms: 40,
    };
    let h = Harness::new(FakeBackend::new(Behavior::Succeed), FakeProbe::with_rate("1/1"), decoder);
    let webp = h.input("dance.webp", WEBP_BYTES);

    let report = h.orchestrator.run(vec![webp]).await.unwrap();

    assert_eq!(report.success_count, 1);
    let framerate = h.backend.jobs()[0].input_framerate().unwrap();
    assert!(framerate > 1.0, "sampled rate was {}", framerate);
}

#[tokio::test]
async fn test_extraction_failure_falls_back_to_direct_pass() {
    let h = Harness::new(
        FakeBackend::new(Behavior::Succeed),
        FakeProbe::with_rate("15/1"),
        FakeDecoder::Broken,
    );
    let webp = h.input("broken.webp", WEBP_BYTES);

    let report = h.orchestrator.run(vec![webp.clone()]).await.unwrap();

    assert_eq!(report.success_count, 1);
    let jobs = h.backend.jobs();
    assert_eq!(jobs[0].source, JobSource::File(webp));
    assert_eq!(jobs[0].filters.render(), "fps=15,scale=iw:ih:flags=lanczos");
}

#[tokio::test]
async fn test_timeout_without_output_fails_item() {
    let h = Harness::new(FakeBackend::new(Behavior::Hang), FakeProbe::with_rate("10/1"), still());
    let clip = h.input("clip.mp4", MP4_BYTES);

    let report = h.orchestrator.run(vec![clip]).await.unwrap();

    assert_eq!(report.fail_count, 1);
    assert_eq!(h.backend.cancels.load(Ordering::SeqCst), 1);
    assert!(h.delivered().is_empty());
}

#[tokio::test]
async fn test_timeout_with_output_is_salvaged_and_delivered() {
    let h = Harness::new(
        FakeBackend::new(Behavior::HangAfterWriting),
        FakeProbe::with_rate("10/1"),
        still(),
    );
    let clip = h.input("clip.mp4", MP4_BYTES);

    let report = h.orchestrator.run(vec![clip]).await.unwrap();

    assert_eq!((report.success_count, report.fail_count), (1, 0));
    assert_eq!(report.items[0].outcome, Some(OutcomeKind::TimedOutSalvaged));
    assert_eq!(h.backend.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(h.delivered(), vec!["clip.gif".to_string()]);
    assert_eq!(
        std::fs::read(h.outputs.path().join("clip.gif")).unwrap(),
        GIF_BYTES
    );
}

#[tokio::test]
async fn test_progress_precedes_items_and_summary_follows() {
    let h = Harness::new(FakeBackend::new(Behavior::Fail(1)), FakeProbe::with_rate("10/1"), still());
    let gif = h.input("a.gif", GIF_BYTES);
    let clip = h.input("b.mp4", MP4_BYTES);

    h.orchestrator.run(vec![gif, clip]).await.unwrap();

    let snapshots = h.progress.snapshots.lock().unwrap().clone();
    let published: Vec<(usize, u8)> = snapshots.iter().map(|s| (s.current, s.percent)).collect();
    assert_eq!(published, vec![(1, 50), (2, 99), (2, 100)]);
    assert_eq!(snapshots[1].counters.success_count, 1);
    assert_eq!(
        *h.progress.summaries.lock().unwrap(),
        vec![BatchSummary {
            had_success: true,
            had_failure: true
        }]
    );
}

#[tokio::test]
async fn test_cancellation_mid_item_discards_it_and_stops() {
    let token = CancellationToken::new();
    let mut backend = FakeBackend::new(Behavior::Succeed);
    backend.cancel_on = Some((2, Arc::clone(&token)));
    let h = Harness::with_token(backend, FakeProbe::with_rate("10/1"), still(), token);
    let inputs = vec![
        h.input("one.mp4", MP4_BYTES),
        h.input("two.mp4", MP4_BYTES),
        h.input("three.mp4", MP4_BYTES),
        h.input("four.mp4", MP4_BYTES),
    ];

    let report = h.orchestrator.run(inputs).await.unwrap();

    assert_eq!(report.phase, BatchPhase::Cancelled);
    assert_eq!(h.orchestrator.phase(), BatchPhase::Cancelled);
    assert_eq!(report.success_count + report.fail_count, 1);
    assert_eq!(h.backend.jobs().len(), 2);
    assert_eq!(h.delivered(), vec!["one.gif".to_string()]);
    assert!(h.progress.summaries.lock().unwrap().is_empty());
    let currents: Vec<usize> = h
        .progress
        .snapshots
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.current)
        .collect();
    assert_eq!(currents, vec![1, 2]);
}

#[tokio::test]
async fn test_cancelled_before_start_processes_nothing() {
    let token = CancellationToken::new();
    token.set();
    let h = Harness::with_token(
        FakeBackend::new(Behavior::Succeed),
        FakeProbe::with_rate("10/1"),
        still(),
        token,
    );
    let gif = h.input("a.gif", GIF_BYTES);

    let report = h.orchestrator.run(vec![gif]).await.unwrap();

    assert_eq!(report.phase, BatchPhase::Cancelled);
    assert!(report.items.is_empty());
    assert!(h.delivered().is_empty());
    assert!(h.progress.snapshots.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_during_copy_leaves_no_placeholder() {
    let token = CancellationToken::new();
    let h = Harness::with_fs(
        FakeBackend::new(Behavior::Succeed),
        FakeProbe::with_rate("10/1"),
        still(),
        Arc::clone(&token),
        stalling_copies(&token),
    );
    let gif = h.input("cat.gif", GIF_BYTES);

    let report = h.orchestrator.run(vec![gif]).await.unwrap();

    assert_eq!(report.phase, BatchPhase::Cancelled);
    assert!(report.items.is_empty());
    assert!(h.delivered().is_empty());
}

#[tokio::test]
async fn test_cancel_during_delivery_leaves_no_placeholder() {
    let token = CancellationToken::new();
    let h = Harness::with_fs(
        FakeBackend::new(Behavior::Succeed),
        FakeProbe::with_rate("10/1"),
        still(),
        Arc::clone(&token),
        stalling_copies(&token),
    );
    let clip = h.input("clip.mp4", MP4_BYTES);

    let report = h.orchestrator.run(vec![clip]).await.unwrap();

    assert_eq!(report.phase, BatchPhase::Cancelled);
    assert_eq!(h.backend.jobs().len(), 1);
    assert!(h.delivered().is_empty());
}
