//! FFmpeg CLI transcoding adapter
//!
//! Each submitted job runs as its own `ffmpeg` child process. Stderr is
//! drained concurrently so the pipe never fills, every line is forwarded to
//! the session's log sink, and the completion receiver fires once the process
//! exits or is killed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Cancelled,
}

struct Session {
    state: SessionState,
    kill: Option<oneshot::Sender<()>>,
}

type SessionTable = Arc<Mutex<HashMap<u64, Session>>>;

/// Runs jobs through the `ffmpeg` executable
pub struct FfmpegCliAdapter {
    binary: PathBuf,
    sessions: SessionTable,
    next_id: AtomicU64,
}

impl FfmpegCliAdapter {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Sessions whose process has not been reaped yet
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn running_sessions(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|s| s.state == SessionState::Running)
            .count()
    }
}

impl Default for FfmpegCliAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(sessions: &SessionTable) -> MutexGuard<'_, HashMap<u64, Session>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TranscodePort for FfmpegCliAdapter {
    async fn submit(
        &self,
        job: &TranscodeJob,
        log_sink: LogSink,
    ) -> Result<CompletionReceiver, DomainError> {
        let mut command = Command::new(&self.binary);
        command
            .args(job.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            DomainError::ExecFail(format!(
                "Failed to spawn {}: {}",
                self.binary.display(),
                e
            ))
        })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::ExecFail("Failed to capture ffmpeg stderr".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        lock(&self.sessions).insert(
            id,
            Session {
                state: SessionState::Running,
                kill: Some(kill_tx),
            },
        );
        info!(session = id, pid = ?child.id(), "Started ffmpeg session");

        let (done_tx, done_rx) = oneshot::channel();
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let drain = tokio::spawn(async move {
                let mut logs = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logs.push_str(&line);
                    logs.push('\n');
                    let _ = log_sink.send(line);
                }
                logs
            });

            let waited = tokio::select! {
                status = child.wait() => Some(status),
                Ok(()) = &mut kill_rx => None,
            };
            let status = match waited {
                Some(Ok(status)) => Some(status),
                Some(Err(e)) => {
                    warn!(session = id, error = %e, "Failed to wait for ffmpeg");
                    None
                }
                None => {
                    if let Err(e) = child.kill().await {
                        warn!(session = id, error = %e, "Failed to kill ffmpeg");
                    }
                    None
                }
            };
            let logs = drain.await.unwrap_or_default();

            let cancelled = settle_session(&status, &sessions, id);
            let result = SessionResult {
                return_code: status.and_then(|s| s.code()),
                success: status.map(|s| s.success()).unwrap_or(false),
                logs,
            };
            debug!(
                session = id,
                return_code = ?result.return_code,
                cancelled,
                "ffmpeg session ended"
            );
            let _ = done_tx.send(result);
        });

        Ok(done_rx)
    }

    fn cancel(&self) {
        let mut sessions = lock(&self.sessions);
        for (id, session) in sessions.iter_mut() {
            if let Some(kill) = session.kill.take() {
                debug!(session = id, "Cancelling ffmpeg session");
                let _ = kill.send(());
                session.state = SessionState::Cancelled;
            }
        }
    }

    fn clear_sessions(&self) {
        // Dropping a kill switch does not stop its process.
        lock(&self.sessions).clear();
    }

    fn decodes_animated_webp(&self) -> bool {
        false
    }
}

/// Forget session `id` once its process is gone; returns whether it was cancelled
fn settle_session(
    status: &Option<std::process::ExitStatus>,
    sessions: &SessionTable,
    id: u64,
) -> bool {
    match lock(sessions).remove(&id) {
        Some(session) => session.state == SessionState::Cancelled,
        None => status.is_none(),
    }
}
