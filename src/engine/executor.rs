//! Backend execution with deadline and salvage

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::domain::model::{ExecutionOutcome, FileFormat, OutcomeKind, TranscodeJob};
use crate::domain::rules::TimeoutPolicy;
use crate::error::ItemError;
use crate::output::verifier::{ArtifactFacts, ArtifactVerifier};
use crate::ports::{FsPort, TranscodePort};

const COMMAND_PREVIEW_CHARS: usize = 200;

/// Runs transcode jobs against the backend under a per-format deadline
pub struct TranscodeExecutor {
    backend: Arc<dyn TranscodePort>,
    verifier: ArtifactVerifier,
    policy: TimeoutPolicy,
}

impl TranscodeExecutor {
    pub fn new(backend: Arc<dyn TranscodePort>, fs: Arc<dyn FsPort>, policy: TimeoutPolicy) -> Self {
        Self {
            backend,
            verifier: ArtifactVerifier::new(fs),
            policy,
        }
    }

    pub fn timeout_for(&self, format: FileFormat) -> Duration {
        self.policy.for_format(format)
    }

    /// Run `job` and resolve the outcome. Only a non-empty artifact counts as
    /// success, whatever the backend reports; after a timeout a non-empty
    /// artifact is salvaged.
    pub async fn run(
        &self,
        job: &TranscodeJob,
        format: FileFormat,
    ) -> Result<ExecutionOutcome, ItemError> {
        if !job.is_runnable() {
            error!(%format, "Command is empty");
            return Err(ItemError::SynthesisFailure { format });
        }

        let outcome = self.execute(job, format).await;
        match outcome.kind {
            OutcomeKind::Success | OutcomeKind::TimedOutSalvaged => Ok(outcome),
            OutcomeKind::TimedOutFailed => Err(ItemError::EngineTimeout {
                format,
                timeout_secs: self.timeout_for(format).as_secs(),
            }),
            OutcomeKind::Failure if outcome.return_code == Some(0) => {
                Err(ItemError::OutputMissingOrEmpty {
                    path: job.output.display().to_string(),
                })
            }
            OutcomeKind::Failure => {
                error!(
                    %format,
                    return_code = ?outcome.return_code,
                    log = %outcome.log,
                    "Backend conversion failed"
                );
                Err(ItemError::EngineFailure {
                    format,
                    return_code: outcome.return_code,
                })
            }
        }
    }

    async fn execute(&self, job: &TranscodeJob, format: FileFormat) -> ExecutionOutcome {
        let timeout = self.timeout_for(format);
        let command = job.command_line();
        let preview: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
        info!(
            %format,
            timeout_secs = timeout.as_secs(),
            command = %preview,
            length = command.len(),
            "Executing backend command"
        );

        let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(
            async move {
                while let Some(line) = log_rx.recv().await {
                    trace!(target: "giffix::backend", "{}", line);
                }
            }
            .in_current_span(),
        );

        let completion = match self.backend.submit(job, log_tx).await {
            Ok(completion) => completion,
            Err(e) => {
                error!(%format, error = %e, "Backend refused the job");
                return outcome(OutcomeKind::Failure, None, e.to_string(), ArtifactFacts::default());
            }
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(session)) => {
                let facts = self.facts(&job.output).await;
                debug!(
                    return_code = ?session.return_code,
                    success = session.success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backend session finished"
                );
                debug!(log = %session.logs, "Backend log");
                let kind = if session.success && facts.is_complete() {
                    OutcomeKind::Success
                } else {
                    OutcomeKind::Failure
                };
                outcome(kind, session.return_code, session.logs, facts)
            }
            Ok(Err(_)) => {
                warn!(%format, "Backend session ended without reporting");
                let facts = self.facts(&job.output).await;
                outcome(OutcomeKind::Failure, None, String::new(), facts)
            }
            Err(_) => {
                warn!(%format, timeout_secs = timeout.as_secs(), "Conversion timed out, cancelling backend");
                self.backend.cancel();
                let facts = self.facts(&job.output).await;
                if facts.is_complete() {
                    warn!(size = facts.size, "Using output produced before the timeout");
                    outcome(OutcomeKind::TimedOutSalvaged, None, String::new(), facts)
                } else {
                    outcome(OutcomeKind::TimedOutFailed, None, String::new(), facts)
                }
            }
        }
    }

    async fn facts(&self, path: &Path) -> ArtifactFacts {
        self.verifier.inspect(path).await
    }
}

fn outcome(
    kind: OutcomeKind,
    return_code: Option<i32>,
    log: String,
    facts: ArtifactFacts,
) -> ExecutionOutcome {
    ExecutionOutcome {
        kind,
        return_code,
        log,
        output_exists: facts.exists,
        output_size: facts.size,
    }
}
