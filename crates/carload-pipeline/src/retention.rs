//! Post-submission artifact retention.
//!
//! Successful submissions optionally schedule a delayed delete of the
//! downloaded artifact; failed submissions always leave it in place for
//! manual inspection. Each timer is an independent task, so one allocation's
//! cleanup never blocks another's.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Schedules delayed cleanup of downloaded artifacts.
#[derive(Debug, Clone)]
pub struct RetentionScheduler {
    delay: Option<Duration>,
}

impl RetentionScheduler {
    /// Create a scheduler. `None` disables cleanup entirely: artifacts from
    /// successful submissions are retained indefinitely.
    #[must_use]
    pub const fn new(delay: Option<Duration>) -> Self {
        Self { delay }
    }

    /// Handle a successfully submitted artifact.
    ///
    /// With a configured delay, spawns a timer task that deletes the file
    /// once the delay elapses, if it still exists; the returned handle lets
    /// the caller abandon the timer on shutdown. Without a delay, returns
    /// `None` and the file is guaranteed untouched.
    #[must_use]
    pub fn on_success(&self, path: &Path) -> Option<JoinHandle<()>> {
        let delay = self.delay?;
        let path = path.to_path_buf();
        tracing::debug!(path = %path.display(), delay_secs = delay.as_secs_f64(), "cleanup scheduled");
        Some(tokio::spawn(delete_after(path, delay)))
    }

    /// Handle a failed submission: the artifact is always retained.
    pub fn on_failure(&self, path: &Path) {
        tracing::info!(path = %path.display(), "artifact retained after failed submission");
    }
}

async fn delete_after(path: PathBuf, delay: Duration) {
    tokio::time::sleep(delay).await;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::info!(path = %path.display(), "artifact cleaned up"),
        // Already gone is the desired end state, not a failure.
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "artifact already removed");
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "artifact cleanup failed");
        }
    }
}
