//! Request deadlines for session operations.
//!
//! The operation runs on its own task. When the deadline fires the caller
//! gets [`LobbyError::Timeout`] but the task is left to finish: a store write
//! is never abandoned half-way. Clients recover by retrying create (a stray
//! lobby simply expires) or by re-checking join (a join that already landed
//! answers `CONFLICT`).

use std::future::Future;
use std::time::Duration;

use huddle_core::{LobbyError, Result};
use tracing::{error, warn};

/// Run `op` with a deadline.
pub async fn with_deadline<T, F>(deadline: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(op);
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            error!(error = %join_err, "session operation task failed");
            Err(LobbyError::store(format!("session operation aborted: {join_err}")))
        }
        Err(_) => {
            warn!(
                deadline_secs = deadline.as_secs(),
                "deadline expired, operation continues in background"
            );
            Err(LobbyError::Timeout {
                secs: deadline.as_secs(),
            })
        }
    }
}
