//! Execution context with thread affinity
//!
//! Some collaborators (the animated-image decoder in particular) deliver their
//! callbacks on one specific thread and must only be touched from it.
//! [`AffineContext`] owns such a thread and runs a message loop on it that
//! supports immediate posts, delayed posts that can be withdrawn by token, and
//! a bounded request/response [`ContextHandle::call`] used by async callers
//! that need a reply from the context.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Unit of work executed on the context thread
pub type Task = Box<dyn FnOnce(&ContextHandle) + Send + 'static>;

/// Identifies delayed posts so they can be removed before they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskToken(u64);

/// Failures of a context handoff
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("execution context has shut down")]
    Closed,

    #[error("execution context did not reply within {0:?}")]
    Timeout(Duration),
}

enum Message {
    Post {
        at: Instant,
        token: Option<TaskToken>,
        task: Task,
    },
    Remove(TaskToken),
    Shutdown,
}

struct Pending {
    token: Option<TaskToken>,
    task: Task,
}

/// Cloneable, thread-safe handle for posting work to an [`AffineContext`]
#[derive(Clone)]
pub struct ContextHandle {
    sender: Sender<Message>,
    next_token: Arc<AtomicU64>,
    thread_id: ThreadId,
}

impl ContextHandle {
    /// Allocate a token for delayed posts
    pub fn new_token(&self) -> TaskToken {
        TaskToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether the caller is running on the context thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `task` on the context as soon as possible
    pub fn post<F>(&self, task: F) -> Result<(), ContextError>
    where
        F: FnOnce(&ContextHandle) + Send + 'static,
    {
        self.send(Message::Post {
            at: Instant::now(),
            token: None,
            task: Box::new(task),
        })
    }

    /// Run `task` on the context after `delay`, unless `token` is removed first
    pub fn post_delayed<F>(
        &self,
        token: TaskToken,
        delay: Duration,
        task: F,
    ) -> Result<(), ContextError>
    where
        F: FnOnce(&ContextHandle) + Send + 'static,
    {
        self.send(Message::Post {
            at: Instant::now() + delay,
            token: Some(token),
            task: Box::new(task),
        })
    }

    /// Drop every pending post carrying `token`
    pub fn remove_callbacks(&self, token: TaskToken) {
        let _ = self.send(Message::Remove(token));
    }

    /// Run `f` on the context and wait at most `timeout` for its result
    pub async fn call<R, F>(&self, timeout: Duration, f: F) -> Result<R, ContextError>
    where
        R: Send + 'static,
        F: FnOnce(&ContextHandle) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |ctx| {
            let _ = reply_tx.send(f(ctx));
        })?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ContextError::Closed),
            Err(_) => Err(ContextError::Timeout(timeout)),
        }
    }

    fn send(&self, message: Message) -> Result<(), ContextError> {
        self.sender.send(message).map_err(|_| ContextError::Closed)
    }
}

/// A dedicated thread running a message loop
pub struct AffineContext {
    handle: ContextHandle,
    join: Option<JoinHandle<()>>,
}

impl AffineContext {
    /// Start the context thread
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let next_token = Arc::new(AtomicU64::new(1));

        let loop_sender = sender.clone();
        let loop_tokens = Arc::clone(&next_token);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let handle = ContextHandle {
                    sender: loop_sender,
                    next_token: loop_tokens,
                    thread_id: thread::current().id(),
                };
                run_loop(handle, receiver);
            })?;

        let handle = ContextHandle {
            sender,
            next_token,
            thread_id: join.thread().id(),
        };
        debug!(context = name, "Execution context started");

        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }
}

impl Drop for AffineContext {
    fn drop(&mut self) {
        let _ = self.handle.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            if !self.handle.is_current() {
                let _ = join.join();
            }
        }
    }
}

fn run_loop(handle: ContextHandle, receiver: Receiver<Message>) {
    let mut queue: BTreeMap<(Instant, u64), Pending> = BTreeMap::new();
    let mut sequence: u64 = 0;

    loop {
        // Apply everything already sent so removals win over due tasks.
        loop {
            match receiver.try_recv() {
                Ok(message) => {
                    if !apply(message, &mut queue, &mut sequence) {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        let now = Instant::now();
        let due = queue.keys().next().copied().filter(|(at, _)| *at <= now);
        if let Some(key) = due {
            if let Some(pending) = queue.remove(&key) {
                run_task(pending.task, &handle);
            }
            continue;
        }

        let message = match queue.keys().next() {
            Some((at, _)) => match receiver.recv_timeout(at.saturating_duration_since(now)) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => return,
            },
        };
        if !apply(message, &mut queue, &mut sequence) {
            return;
        }
    }
}

fn apply(
    message: Message,
    queue: &mut BTreeMap<(Instant, u64), Pending>,
    sequence: &mut u64,
) -> bool {
    match message {
        Message::Post { at, token, task } => {
            *sequence += 1;
            queue.insert((at, *sequence), Pending { token, task });
            true
        }
        Message::Remove(token) => {
            queue.retain(|_, pending| pending.token != Some(token));
            true
        }
        Message::Shutdown => false,
    }
}

fn run_task(task: Task, handle: &ContextHandle) {
    if panic::catch_unwind(AssertUnwindSafe(|| task(handle))).is_err() {
        error!("Task panicked on execution context");
    }
}
