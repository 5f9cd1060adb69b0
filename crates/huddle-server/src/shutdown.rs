//! Ordered shutdown of the server's long-lived tasks.
//!
//! Tasks are tracked by name as the server starts them and drained in
//! reverse order: the listener stops accepting before the hub closes the
//! remaining live connections. One deadline covers the whole drain; a task
//! still running when it passes is aborted and reported.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drain deadline when none is configured.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to each tracked task during [`ShutdownCoordinator::drain`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that ended before the deadline, in drain order.
    pub finished: Vec<&'static str>,
    /// Tasks that panicked while winding down.
    pub failed: Vec<&'static str>,
    /// Tasks still running at the deadline. They were aborted.
    pub aborted: Vec<&'static str>,
}

impl DrainReport {
    /// Every tracked task ended on its own.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_empty()
    }
}

/// Owns the shutdown signal and the tasks that must observe it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator whose drain gives up after `drain_timeout`.
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            drain_timeout,
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting for anything.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Hand a task to the coordinator. It is awaited, or aborted, by
    /// [`drain`](Self::drain).
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((name, handle));
    }

    /// Number of tasks awaiting drain.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Trigger shutdown, then wait for tracked tasks, newest first.
    pub async fn drain(&self) -> DrainReport {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let deadline = Instant::now() + self.drain_timeout;
        info!(
            tasks = tasks.len(),
            timeout_secs = self.drain_timeout.as_secs(),
            "draining"
        );

        let mut report = DrainReport::default();
        for (name, mut handle) in tasks.into_iter().rev() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.finished.push(name),
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task failed during shutdown");
                    report.failed.push(name);
                }
                Err(_) => {
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }

        if report.aborted.is_empty() {
            info!(finished = report.finished.len(), "drain complete");
        } else {
            warn!(aborted = ?report.aborted, "drain deadline passed, tasks aborted");
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}
