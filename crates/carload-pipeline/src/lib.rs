//! Allocation processing pipeline.
//!
//! Every accepted event runs the same fixed stage order: size admission,
//! content-identifier decoding, payload download, optional start-epoch
//! derivation, deal submission, then retention. The first failing stage
//! short-circuits the run; there is no retry here, a supervisor restarts the
//! process when something systemic breaks. The pipeline keeps no state
//! between runs, so replaying an event simply re-executes every stage and
//! overwrites the same artifact path.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

pub mod cid;
pub mod epoch;
pub mod fetch;
pub mod retention;
pub mod size;
pub mod submit;

use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinHandle;

use carload_events::AllocationEvent;
use carload_telemetry::Metrics;

use crate::cid::{CidError, PieceCid};
use crate::fetch::{FetchError, FileFetcher};
use crate::retention::RetentionScheduler;
use crate::submit::{DealSubmitter, SubmitError};

/// Stage a pipeline run failed in, used for logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Size admission check.
    SizeCheck,
    /// Content-identifier decoding.
    CidDecode,
    /// Payload download.
    Download,
    /// Deal submission to the external tool.
    Submit,
}

impl Stage {
    /// Stable label for the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SizeCheck => "size_check",
            Self::CidDecode => "cid_decode",
            Self::Download => "download",
            Self::Submit => "submit",
        }
    }
}

/// Failure of one pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The declared size fell outside the accepted range.
    #[error("allocation size is outside the accepted range")]
    Size {
        /// Declared size in bytes.
        size: u64,
        /// Inclusive lower bound of the accepted range.
        min: u64,
        /// Inclusive upper bound of the accepted range.
        max: u64,
    },
    /// The event payload did not decode to a valid content identifier.
    #[error("allocation payload is not a valid content identifier")]
    Cid(#[source] CidError),
    /// The content could not be downloaded.
    #[error("allocation payload download failed")]
    Fetch(#[source] FetchError),
    /// The deal tool rejected the submission.
    #[error("allocation deal submission failed")]
    Submit(#[source] SubmitError),
}

/// Terminal result of one pipeline run.
///
/// Per-event failures terminate here; they never propagate out of the task
/// running the pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The deal was submitted; the artifact sits at `path`.
    Success {
        /// Downloaded artifact location.
        path: PathBuf,
        /// Pending cleanup timer, present when delayed cleanup is configured.
        cleanup: Option<JoinHandle<()>>,
    },
    /// A stage failed and the run stopped there.
    Failed {
        /// Stage the run failed in.
        stage: Stage,
        /// The failure itself.
        error: PipelineError,
    },
}

/// Drives allocations from decoded event to submitted deal.
pub struct AllocationPipeline {
    min_size: u64,
    max_size: u64,
    start_epoch_offset: Option<u64>,
    fetcher: FileFetcher,
    submitter: DealSubmitter,
    retention: RetentionScheduler,
    metrics: Metrics,
}

impl AllocationPipeline {
    /// Assemble a pipeline from its stage components.
    #[must_use]
    pub const fn new(
        min_size: u64,
        max_size: u64,
        start_epoch_offset: Option<u64>,
        fetcher: FileFetcher,
        submitter: DealSubmitter,
        retention: RetentionScheduler,
        metrics: Metrics,
    ) -> Self {
        Self {
            min_size,
            max_size,
            start_epoch_offset,
            fetcher,
            submitter,
            retention,
            metrics,
        }
    }

    /// Run one allocation through every stage.
    ///
    /// Always returns a terminal outcome; errors are folded into
    /// [`PipelineOutcome::Failed`] so the caller can log and count them
    /// without unwinding.
    pub async fn process(&self, event: &AllocationEvent) -> PipelineOutcome {
        let allocation_id = event.allocation_id;
        tracing::info!(
            allocation_id,
            provider = event.provider,
            size = event.size,
            past = event.is_past_event,
            "allocation received"
        );

        if !size::accepts(event.size, self.min_size, self.max_size) {
            return self.fail(
                allocation_id,
                Stage::SizeCheck,
                PipelineError::Size {
                    size: event.size,
                    min: self.min_size,
                    max: self.max_size,
                },
            );
        }

        let cid = match PieceCid::decode(&event.data) {
            Ok(cid) => cid,
            Err(error) => return self.fail(allocation_id, Stage::CidDecode, PipelineError::Cid(error)),
        };
        tracing::debug!(allocation_id, cid = %cid, "content identifier decoded");

        let path = match self.fetcher.fetch(&event.download_url, allocation_id).await {
            Ok(path) => path,
            Err(error) => return self.fail(allocation_id, Stage::Download, PipelineError::Fetch(error)),
        };

        let start_epoch = epoch::compute(event.block_number, self.start_epoch_offset);
        if self.start_epoch_offset.is_some() && start_epoch.is_none() {
            tracing::warn!(
                allocation_id,
                "start epoch unavailable, submitting without one"
            );
        }

        if let Err(error) = self
            .submitter
            .submit(allocation_id, &cid, &path, start_epoch)
            .await
        {
            self.retention.on_failure(&path);
            return self.fail(allocation_id, Stage::Submit, PipelineError::Submit(error));
        }

        let cleanup = self.retention.on_success(&path);
        self.metrics.inc_pipeline("success");
        tracing::info!(allocation_id, path = %path.display(), "allocation processed");
        PipelineOutcome::Success { path, cleanup }
    }

    fn fail(&self, allocation_id: u64, stage: Stage, error: PipelineError) -> PipelineOutcome {
        tracing::warn!(
            allocation_id,
            stage = stage.as_str(),
            %error,
            "allocation pipeline failed"
        );
        self.metrics.inc_pipeline("failed");
        self.metrics.inc_stage_failure(stage.as_str());
        PipelineOutcome::Failed { stage, error }
    }
}
