//! Deal hand-off to the external import tool.
//!
//! The tool is a separate binary configured by name; one invocation is made
//! per allocation and awaited to completion. The tool reports blocking
//! problems on stderr even when it exits zero, so any non-empty stderr fails
//! the submission regardless of exit status.

use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;

use crate::cid::PieceCid;

/// Result alias for deal submission.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Deal submission failure. The downloaded artifact is never deleted on
/// failure; operators inspect and resubmit manually.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The tool binary could not be launched.
    #[error("deal tool could not be launched")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying process error.
        #[source]
        source: std::io::Error,
    },
    /// The tool ran but reported failure.
    #[error("deal tool rejected the submission")]
    Rejected {
        /// Allocation whose submission failed.
        allocation_id: u64,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
        /// Artifact path, retained for manual inspection.
        path: PathBuf,
    },
}

/// Runs the external deal tool for downloaded allocations.
#[derive(Debug, Clone)]
pub struct DealSubmitter {
    program: String,
    client_address: String,
}

impl DealSubmitter {
    /// Create a submitter invoking `program` on behalf of `client_address`.
    #[must_use]
    pub const fn new(program: String, client_address: String) -> Self {
        Self {
            program,
            client_address,
        }
    }

    /// Submit one downloaded allocation to the deal tool.
    ///
    /// # Errors
    ///
    /// Fails when the tool cannot be spawned, exits non-zero, or writes
    /// anything to stderr. Success requires a zero exit *and* empty stderr.
    pub async fn submit(
        &self,
        allocation_id: u64,
        cid: &PieceCid,
        path: &Path,
        start_epoch: Option<i64>,
    ) -> SubmitResult<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("import-direct")
            .arg(format!("--client-addr={}", self.client_address));
        if let Some(epoch) = start_epoch {
            command.arg(format!("--start-epoch={epoch}"));
        }
        command
            .arg(format!("--allocation-id={allocation_id}"))
            .arg(cid.to_string())
            .arg(path);

        let output = command
            .output()
            .await
            .map_err(|source| SubmitError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        self.judge(allocation_id, path, output)
    }

    fn judge(&self, allocation_id: u64, path: &Path, output: Output) -> SubmitResult<()> {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let clean_exit = output.status.success();
        // Non-empty stderr is authoritative even on a zero exit.
        if clean_exit && stderr.trim().is_empty() {
            tracing::info!(allocation_id, program = %self.program, "deal submitted");
            return Ok(());
        }
        Err(SubmitError::Rejected {
            allocation_id,
            exit_code: output.status.code(),
            stdout,
            stderr,
            path: path.to_path_buf(),
        })
    }
}
