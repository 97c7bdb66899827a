//! Execution Supervisor
//!
//! This module runs an accepted program on a dedicated worker thread under a
//! wall-clock deadline. Output is captured into in-memory buffers that the
//! supervisor keeps a handle to, so whatever the program printed before a
//! fault or a timeout is still returned.
//!
//! The deadline timer only exists inside [`ExecutionSupervisor::run`]. When
//! it fires the supervisor stops waiting, flips the run's cancellation token
//! and reports `TimedOut`; the abandoned worker notices the token at its next
//! checkpoint and exits on its own.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::ast::Program;
use crate::config::EngineConfig;
use crate::interpreter::{self, ProgramExit, RunContext};
use crate::sandbox::CapabilityNamespace;

/// Sequence number used to name worker threads
static WORKER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Shared flag telling a worker to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = lock(&self.inner.lock);
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Block for up to `duration`. Returns `true` if the token was cancelled
    /// before the time ran out.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let until = Instant::now() + duration;
        let mut guard = lock(&self.inner.lock);
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= until {
                return false;
            }
            guard = match self.inner.wake.wait_timeout(guard, until - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("output limit of {limit} bytes exceeded")]
pub struct OutputLimitExceeded {
    pub limit: usize,
}

/// In-memory capture of one output channel.
///
/// Clones share the same buffer: the worker writes while the supervisor
/// keeps a handle to read whatever was written, even after a timeout.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: Arc<Mutex<String>>,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: Arc::new(Mutex::new(String::new())),
            limit,
        }
    }

    /// Append `text`, refusing writes that would grow the buffer past its limit.
    pub fn write(&self, text: &str) -> Result<(), OutputLimitExceeded> {
        let mut buffer = lock(&self.text);
        if buffer.len() + text.len() > self.limit {
            return Err(OutputLimitExceeded { limit: self.limit });
        }
        buffer.push_str(text);
        Ok(())
    }

    pub fn contents(&self) -> String {
        lock(&self.text).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.text).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The program raised, formatted as `"<FaultKind>: <message>"`
    Faulted { message: String },
    TimedOut { deadline: Duration },
}

/// Lifecycle of a supervised run. The deadline is armed only while `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Faulted,
    TimedOut,
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Faulted { .. } => RunState::Faulted,
            RunOutcome::TimedOut { .. } => RunState::TimedOut,
        }
    }
}

/// Everything a run produced, before normalization
#[derive(Debug, Clone)]
pub struct RawRun {
    pub stdout: String,
    pub stderr: String,
    pub outcome: RunOutcome,
    pub elapsed: Duration,
}

/// Cancels the worker token when dropped, whichever way `run` exits.
struct DeadlineGuard {
    token: CancellationToken,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Runs programs on worker threads under a deadline
#[derive(Debug, Clone)]
pub struct ExecutionSupervisor {
    max_output_bytes: usize,
    max_call_depth: usize,
    worker_stack_bytes: usize,
}

impl ExecutionSupervisor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_output_bytes: config.max_output_bytes,
            max_call_depth: config.max_call_depth,
            worker_stack_bytes: config.worker_stack_bytes,
        }
    }

    /// Run `program` with the given namespace, giving up after `deadline`.
    pub async fn run(&self, program: Program, namespace: CapabilityNamespace, deadline: Duration) -> RawRun {
        let stdout = OutputBuffer::new(self.max_output_bytes);
        let stderr = OutputBuffer::new(self.max_output_bytes);
        let token = CancellationToken::new();
        let context = RunContext {
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            cancel: token.clone(),
            max_call_depth: self.max_call_depth,
        };

        let mut state = RunState::NotStarted;
        let started = Instant::now();
        let (tx, rx) = oneshot::channel();
        let name = format!("pystep-worker-{}", WORKER_SEQ.fetch_add(1, Ordering::Relaxed));

        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .stack_size(self.worker_stack_bytes)
            .spawn(move || {
                let exit = panic::catch_unwind(AssertUnwindSafe(|| interpreter::run(&program, namespace, context)));
                // The receiver is gone when the deadline already passed.
                let _ = tx.send(exit);
            });

        if let Err(err) = spawned {
            error!(error = %err, "failed to start execution worker");
            return RawRun {
                stdout: String::new(),
                stderr: String::new(),
                outcome: RunOutcome::Faulted {
                    message: format!("InternalError: failed to start worker: {}", err),
                },
                elapsed: started.elapsed(),
            };
        }

        let guard = DeadlineGuard { token };
        transition(&mut state, RunState::Running, &name);

        let outcome = match timeout(deadline, rx).await {
            Ok(Ok(Ok(exit))) => match exit {
                ProgramExit::Finished => RunOutcome::Completed,
                ProgramExit::Raised { message } => RunOutcome::Faulted { message },
                ProgramExit::Cancelled => RunOutcome::TimedOut { deadline },
            },
            Ok(Ok(Err(payload))) => {
                let message = panic_message(payload.as_ref());
                error!(worker = %name, panic = %message, "execution worker panicked");
                RunOutcome::Faulted {
                    message: format!("InternalError: {}", message),
                }
            }
            Ok(Err(_)) => RunOutcome::Faulted {
                message: "InternalError: worker exited without a result".to_string(),
            },
            Err(_) => {
                warn!(worker = %name, deadline_ms = deadline.as_millis() as u64, "execution deadline exceeded");
                RunOutcome::TimedOut { deadline }
            }
        };
        drop(guard);
        transition(&mut state, outcome.state(), &name);

        RawRun {
            stdout: stdout.contents(),
            stderr: stderr.contents(),
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

fn transition(state: &mut RunState, next: RunState, worker: &str) {
    debug!(worker, from = ?*state, to = ?next, "run state");
    *state = next;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::parser::parse_program;
    use crate::sandbox::NamespaceBuilder;

    fn supervisor() -> ExecutionSupervisor {
        let config = EngineConfig {
            worker_stack_bytes: 64 * 1024 * 1024,
            ..EngineConfig::default()
        };
        ExecutionSupervisor::new(&config)
    }

    fn namespace() -> CapabilityNamespace {
        NamespaceBuilder::new(Arc::new(PolicyConfig::from_csv("math,time").unwrap())).build()
    }

    async fn run(source: &str, deadline_ms: u64) -> RawRun {
        let program = parse_program(source).unwrap();
        supervisor()
            .run(program, namespace(), Duration::from_millis(deadline_ms))
            .await
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.wait_timeout(Duration::from_millis(5)));

        let other = token.clone();
        let waiter = std::thread::spawn(move || other.wait_timeout(Duration::from_secs(30)));
        token.cancel();
        assert!(waiter.join().unwrap());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_output_buffer_limit() {
        let buffer = OutputBuffer::new(8);
        buffer.write("hello").unwrap();
        let err = buffer.write("world").unwrap_err();
        assert_eq!(err.limit, 8);
        assert_eq!(buffer.contents(), "hello");
        assert_eq!(buffer.len(), 5);
        assert!(!buffer.is_empty());
    }

    #[tokio::test]
    async fn test_completed_run() {
        let raw = run("print('hi')\nprint(1 + 2)", 2000).await;
        assert_eq!(raw.outcome, RunOutcome::Completed);
        assert_eq!(raw.stdout, "hi\n3\n");
        assert!(raw.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_faulted_run_keeps_output() {
        let raw = run("print('before')\nx = 1 / 0\nprint('after')", 2000).await;
        assert_eq!(
            raw.outcome,
            RunOutcome::Faulted {
                message: "ZeroDivisionError: division by zero".to_string()
            }
        );
        assert_eq!(raw.stdout, "before\n");
        assert!(raw.stderr.contains("line 2"));
    }

    #[tokio::test]
    async fn test_timeout_preserves_partial_output() {
        let raw = run("print('partial')\nwhile True:\n    pass\n", 50).await;
        assert_eq!(
            raw.outcome,
            RunOutcome::TimedOut {
                deadline: Duration::from_millis(50)
            }
        );
        assert_eq!(raw.stdout, "partial\n");
        assert_eq!(raw.outcome.state(), RunState::TimedOut);
    }

    #[tokio::test]
    async fn test_deadline_does_not_leak_into_later_runs() {
        let first = run("print('a')", 50).await;
        assert_eq!(first.outcome, RunOutcome::Completed);

        let second = run("import time\ntime.sleep(0.15)\nprint('b')", 1000).await;
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_eq!(second.stdout, "b\n");
    }

    #[tokio::test]
    async fn test_sleep_is_cut_by_deadline() {
        let started = Instant::now();
        let raw = run("import time\ntime.sleep(30)\n", 50).await;
        assert!(matches!(raw.outcome, RunOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
