use std::sync::Arc;

use crate::adapters::{FfmpegCliAdapter, FfprobeJsonAdapter, ImagePlaybackDecoder, LocalFsAdapter};
use crate::app::batch_interactor::{BatchOrchestrator, BatchPorts, BatchSettings};
use crate::config_initialization::GifFixConfig;
use crate::engine::{AffineContext, CancellationController, CancellationToken};
use crate::error::GifFixResult;
use crate::ports::{AnimatedDecoderPort, FsPort, MediaProbePort, ProgressPort, TranscodePort};
use crate::probe::FormatSniffer;

/// Name of the thread hosting the animated-image execution context
pub const CONTEXT_THREAD_NAME: &str = "giffix-render";

pub trait AppContainer: Send + Sync {
    /// A fresh orchestrator and the controller that cancels it
    fn batch_interactor(&self) -> (BatchOrchestrator, CancellationController);
    fn format_sniffer(&self) -> FormatSniffer;
}

pub struct DefaultAppContainer {
    context: AffineContext,
    ports: BatchPorts,
    settings: BatchSettings,
}

impl DefaultAppContainer {
    pub fn new(config: &GifFixConfig, progress: Arc<dyn ProgressPort>) -> GifFixResult<Self> {
        let fs_port = Arc::new(LocalFsAdapter::with_output_dir(&config.output.directory));
        let probe_port = Arc::new(
            FfprobeJsonAdapter::with_binary(&config.backend.ffprobe)
                .with_timeout(config.probe_timeout()),
        );
        let backend_port = Arc::new(FfmpegCliAdapter::with_binary(&config.backend.ffmpeg));
        let decoder_port = Arc::new(ImagePlaybackDecoder::new());

        let ports = BatchPorts {
            fs: Arc::clone(&fs_port) as Arc<dyn FsPort>,
            probe: Arc::clone(&probe_port) as Arc<dyn MediaProbePort>,
            backend: Arc::clone(&backend_port) as Arc<dyn TranscodePort>,
            decoder: Arc::clone(&decoder_port) as Arc<dyn AnimatedDecoderPort>,
            progress,
        };

        Ok(Self::with_ports(
            AffineContext::spawn(CONTEXT_THREAD_NAME)?,
            ports,
            config.batch_settings(),
        ))
    }

    /// Wire pre-built ports, as library callers and tests do
    pub fn with_ports(context: AffineContext, ports: BatchPorts, settings: BatchSettings) -> Self {
        Self {
            context,
            ports,
            settings,
        }
    }
}

impl AppContainer for DefaultAppContainer {
    fn batch_interactor(&self) -> (BatchOrchestrator, CancellationController) {
        let token = CancellationToken::new();
        let controller =
            CancellationController::new(Arc::clone(&token), Arc::clone(&self.ports.backend));
        let orchestrator = BatchOrchestrator::new(
            self.ports.clone(),
            self.context.handle(),
            token,
            self.settings,
        );
        (orchestrator, controller)
    }

    fn format_sniffer(&self) -> FormatSniffer {
        FormatSniffer::new(Arc::clone(&self.ports.fs))
    }
}
