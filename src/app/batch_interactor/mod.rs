// Batch interactor - Orchestrates the GIF fix use case over a list of inputs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::model::*;
use crate::domain::rules::*;
use crate::engine::{
    CancellationToken, ContextHandle, ExtractionSettings, FrameExtractor, TranscodeExecutor,
};
use crate::error::{GifFixError, GifFixResult, ItemError};
use crate::planner::{CommandSynthesizer, ConversionPlan};
use crate::ports::*;
use crate::probe::{FormatSniffer, MediaProber};

/// Collaborators of a batch run
#[derive(Clone)]
pub struct BatchPorts {
    pub fs: Arc<dyn FsPort>,
    pub probe: Arc<dyn MediaProbePort>,
    pub backend: Arc<dyn TranscodePort>,
    pub decoder: Arc<dyn AnimatedDecoderPort>,
    pub progress: Arc<dyn ProgressPort>,
}

/// Deadlines and cadences of a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchSettings {
    pub timeouts: TimeoutPolicy,
    pub extraction: ExtractionSettings,
}

/// Runs one batch: items in order, one at a time, each failure contained to its item
pub struct BatchOrchestrator {
    fs: Arc<dyn FsPort>,
    backend: Arc<dyn TranscodePort>,
    progress: Arc<dyn ProgressPort>,
    sniffer: FormatSniffer,
    prober: MediaProber,
    extractor: FrameExtractor,
    executor: TranscodeExecutor,
    token: Arc<CancellationToken>,
    phase: Mutex<BatchPhase>,
}

impl BatchOrchestrator {
    pub fn new(
        ports: BatchPorts,
        context: ContextHandle,
        token: Arc<CancellationToken>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            sniffer: FormatSniffer::new(Arc::clone(&ports.fs)),
            prober: MediaProber::new(Arc::clone(&ports.probe)),
            extractor: FrameExtractor::new(
                Arc::clone(&ports.decoder),
                context,
                settings.extraction,
            ),
            executor: TranscodeExecutor::new(
                Arc::clone(&ports.backend),
                Arc::clone(&ports.fs),
                settings.timeouts,
            ),
            fs: ports.fs,
            backend: ports.backend,
            progress: ports.progress,
            token,
            phase: Mutex::new(BatchPhase::Idle),
        }
    }

    pub fn phase(&self) -> BatchPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_phase(&self, phase: BatchPhase) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = phase;
    }

    /// Run the batch over `inputs`. An orchestrator runs at most once.
    pub async fn run(&self, inputs: Vec<PathBuf>) -> GifFixResult<BatchReport> {
        if inputs.is_empty() {
            return Err(GifFixError::EmptyBatch);
        }
        {
            let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
            if *phase != BatchPhase::Idle {
                return Err(GifFixError::AlreadyRun);
            }
            *phase = BatchPhase::Running;
        }

        let items = InputItem::batch(inputs);
        let total = items.len();
        let scratch = tempfile::Builder::new().prefix("giffix-").tempdir()?;
        let started_at = Utc::now();
        info!(total, scratch = %scratch.path().display(), "Starting batch");

        let mut outcomes: Vec<ItemOutcome> = Vec::with_capacity(total);
        let mut reports: Vec<ItemReport> = Vec::with_capacity(total);
        let mut cancelled = false;

        for item in &items {
            if self.token.is_set() {
                cancelled = true;
                break;
            }

            self.progress.on_progress(&BatchSnapshot {
                current: item.index,
                total,
                percent: progress_percent(item.index, total),
                counters: fold_outcomes(&outcomes),
            });

            let span = info_span!("item", index = item.index, total);
            let processed = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                processed = self.process(item, scratch.path()).instrument(span) => Some(processed),
            };

            let (format, outcome) = match processed {
                Some(processed) if !self.token.is_set() => processed,
                _ => {
                    warn!(index = item.index, total, "Batch cancelled, discarding current item");
                    cancelled = true;
                    break;
                }
            };

            match &outcome {
                ItemOutcome::Failed(e) => error!(
                    index = item.index,
                    total,
                    format = %format.map(|f| f.name()).unwrap_or("UNKNOWN"),
                    stage = e.stage(),
                    error = %e,
                    "Item failed"
                ),
                _ => info!(index = item.index, total, "Item succeeded"),
            }
            reports.push(ItemReport::new(item, format, &outcome));
            outcomes.push(outcome);
        }

        let counters = fold_outcomes(&outcomes);
        let phase = if cancelled {
            BatchPhase::Cancelled
        } else {
            BatchPhase::Completed
        };
        self.set_phase(phase);

        if phase == BatchPhase::Completed {
            self.progress.on_progress(&BatchSnapshot {
                current: total,
                total,
                percent: 100,
                counters,
            });
            self.progress.on_summary(&BatchSummary::from(counters));
        }
        info!(
            ?phase,
            success = counters.success_count,
            failed = counters.fail_count,
            "Batch finished"
        );

        Ok(BatchReport {
            phase,
            total,
            success_count: counters.success_count,
            fail_count: counters.fail_count,
            started_at,
            finished_at: Utc::now(),
            items: reports,
        })
    }

    /// Per-item pipeline; every error ends up in the returned outcome
    async fn process(&self, item: &InputItem, scratch: &Path) -> (Option<FileFormat>, ItemOutcome) {
        if let Err(e) = self.preflight(item).await {
            return (None, ItemOutcome::Failed(e));
        }

        let format = self.sniffer.detect(&item.path).await;
        info!(path = %item.path.display(), %format, "Detected format");

        let result = if format.is_copy_only() {
            self.copy(item).await
        } else {
            self.convert(item, format, scratch).await
        };
        (Some(format), result.unwrap_or_else(ItemOutcome::Failed))
    }

    async fn preflight(&self, item: &InputItem) -> Result<(), ItemError> {
        let path = item.path.display().to_string();
        if !self.fs.file_exists(&item.path).await.unwrap_or(false) {
            return Err(ItemError::InputMissing { path });
        }
        if !self.fs.is_readable(&item.path).await.unwrap_or(false) {
            return Err(ItemError::InputUnreadable { path });
        }
        match self.fs.get_file_size(&item.path).await {
            Ok(0) => Err(ItemError::InputEmpty { path }),
            Ok(size) => {
                debug!(size, "Input passed pre-flight checks");
                Ok(())
            }
            Err(_) => Err(ItemError::InputUnreadable { path }),
        }
    }

    /// Standard GIFs are delivered as-is
    async fn copy(&self, item: &InputItem) -> Result<ItemOutcome, ItemError> {
        let destination = self.place(item, &item.path, false).await?;
        info!(destination = %destination.display(), "Already standard GIF, copied");
        Ok(ItemOutcome::Copied { destination })
    }

    async fn convert(
        &self,
        item: &InputItem,
        format: FileFormat,
        scratch: &Path,
    ) -> Result<ItemOutcome, ItemError> {
        let fps = self.prober.frame_rate(&item.path).await?;
        let output = scratch.join(format!("output_{}.gif", item.index));

        let job = if format == FileFormat::Webp && !self.backend.decodes_animated_webp() {
            let extraction = self.extract_webp(item, scratch, fps).await;
            CommandSynthesizer::with_fallback(extraction, &item.path, fps, &output)
        } else {
            match CommandSynthesizer::synthesize(format, None, &item.path, fps, &output) {
                ConversionPlan::Transcode(job) => job,
                ConversionPlan::CopyOnly => return self.copy(item).await,
            }
        };

        let executed = self.executor.run(&job, format).await;
        if let JobSource::FrameSequence { pattern, .. } = &job.source {
            if let Some(frames_dir) = pattern.parent() {
                if let Err(e) = tokio::fs::remove_dir_all(frames_dir).await {
                    debug!(error = %e, "Could not remove frame directory");
                }
            }
        }
        let outcome = executed?;

        let destination = self.deliver(item, &output).await?;
        info!(
            destination = %destination.display(),
            outcome = ?outcome.kind,
            size = outcome.output_size,
            "Converted to standard GIF"
        );
        Ok(ItemOutcome::Converted {
            destination,
            kind: outcome.kind,
        })
    }

    /// Re-verify the container and run frame extraction into `frames_<index>`
    async fn extract_webp(
        &self,
        item: &InputItem,
        scratch: &Path,
        fps: f64,
    ) -> Result<ExtractedFrames, ItemError> {
        let confirmed = self.sniffer.detect(&item.path).await;
        if confirmed != FileFormat::Webp {
            return Err(ItemError::ExtractionFailure {
                message: format!("expected WEBP, found {}", confirmed),
            });
        }
        let frames_dir = scratch.join(format!("frames_{}", item.index));
        self.extractor.extract(&item.path, &frames_dir, fps).await
    }

    /// Move the intermediate output to a fresh destination
    async fn deliver(&self, item: &InputItem, output: &Path) -> Result<PathBuf, ItemError> {
        self.place(item, output, true).await
    }

    /// Copy `from` into a freshly allocated destination. The destination is
    /// removed again if the copy fails or the item is abandoned midway.
    async fn place(
        &self,
        item: &InputItem,
        from: &Path,
        delete_source: bool,
    ) -> Result<PathBuf, ItemError> {
        let destination = self
            .fs
            .create_output_file(&item.stem(), "gif")
            .await
            .map(PendingDestination::new)
            .map_err(|e| ItemError::DeliveryFailure {
                message: e.to_string(),
            })?;
        self.fs
            .copy_file(from, destination.path(), delete_source)
            .await
            .map_err(|e| ItemError::DeliveryFailure {
                message: e.to_string(),
            })?;
        Ok(destination.commit())
    }
}

/// Allocated destination file, deleted on drop unless committed
struct PendingDestination {
    path: PathBuf,
    committed: bool,
}

impl PendingDestination {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingDestination {
    // Drop cannot await the fs port
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed unfinished destination"),
            Err(e) => debug!(
                path = %self.path.display(),
                error = %e,
                "Could not remove unfinished destination"
            ),
        }
    }
}

#[cfg(test)]
mod tests;
