//! Content download with atomic placement.
//!
//! Each allocation's payload lands at a deterministic path keyed by the
//! allocation id. The body is written to a `.part` sibling first and renamed
//! into place, so a crashed or aborted download never leaves a partial
//! artifact under the final name.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias for download operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Download failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request could not be completed.
    #[error("download request failed")]
    Request {
        /// URL the request targeted.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The origin answered with a non-success status.
    #[error("download rejected by origin")]
    Status {
        /// URL the request targeted.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },
    /// A filesystem step failed.
    #[error("download artifact could not be written")]
    Io {
        /// Filesystem step that failed.
        operation: &'static str,
        /// Path involved in the failing step.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Downloads allocation payloads into a fixed directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl FileFetcher {
    /// Create a fetcher writing into `download_dir`.
    #[must_use]
    pub const fn new(client: reqwest::Client, download_dir: PathBuf) -> Self {
        Self {
            client,
            download_dir,
        }
    }

    /// Final artifact path for an allocation.
    #[must_use]
    pub fn artifact_path(&self, allocation_id: u64) -> PathBuf {
        self.download_dir
            .join(format!("allocation_{allocation_id}.car"))
    }

    /// Download `url` and place it at the allocation's artifact path.
    ///
    /// A pre-existing artifact for the same allocation is overwritten, which
    /// makes replays idempotent. A single GET is issued; there is no retry.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success HTTP status, or any
    /// filesystem failure. On error no file exists under the final name
    /// unless a previous complete download put it there, and the `.part`
    /// sibling is removed best-effort.
    pub async fn fetch(&self, url: &str, allocation_id: u64) -> FetchResult<PathBuf> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|source| FetchError::Io {
                operation: "create_dir_all",
                path: self.download_dir.clone(),
                source,
            })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let final_path = self.artifact_path(allocation_id);
        let part_path = self
            .download_dir
            .join(format!(".allocation_{allocation_id}.car.part"));

        if let Err(error) = write_file(&part_path, &body).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(error);
        }
        if let Err(source) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::Io {
                operation: "rename",
                path: final_path.clone(),
                source,
            });
        }

        tracing::debug!(
            allocation_id,
            path = %final_path.display(),
            bytes = body.len(),
            "payload downloaded"
        );
        Ok(final_path)
    }
}

async fn write_file(path: &Path, body: &[u8]) -> FetchResult<()> {
    tokio::fs::write(path, body)
        .await
        .map_err(|source| FetchError::Io {
            operation: "write",
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn fetcher(dir: &tempfile::TempDir) -> FileFetcher {
        FileFetcher::new(reqwest::Client::new(), dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn downloads_body_to_deterministic_path() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/payload.car");
            then.status(200).body(b"car-bytes");
        });
        let dir = tempfile::TempDir::new()?;

        let path = fetcher(&dir)
            .fetch(&server.url("/payload.car"), 42)
            .await?;

        assert_eq!(path, dir.path().join("allocation_42.car"));
        assert_eq!(tokio::fs::read(&path).await?, b"car-bytes");
        Ok(())
    }

    #[tokio::test]
    async fn overwrites_existing_artifact() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/payload.car");
            then.status(200).body(b"fresh");
        });
        let dir = tempfile::TempDir::new()?;
        let stale = dir.path().join("allocation_7.car");
        tokio::fs::write(&stale, b"stale").await?;

        let path = fetcher(&dir).fetch(&server.url("/payload.car"), 7).await?;

        assert_eq!(path, stale);
        assert_eq!(tokio::fs::read(&path).await?, b"fresh");
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/payload.car");
            then.status(404);
        });
        let dir = tempfile::TempDir::new()?;

        let error = fetcher(&dir)
            .fetch(&server.url("/payload.car"), 9)
            .await
            .expect_err("404 must fail the download");

        assert!(matches!(error, FetchError::Status { status: 404, .. }));
        assert!(!dir.path().join("allocation_9.car").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_origin_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;

        let error = fetcher(&dir)
            .fetch("http://127.0.0.1:1/payload.car", 3)
            .await
            .expect_err("connection refusal must fail the download");

        assert!(matches!(error, FetchError::Request { .. }));
        assert!(!dir.path().join("allocation_3.car").exists());
        Ok(())
    }

    #[tokio::test]
    async fn no_partial_file_remains_after_a_failed_rename() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/payload.car");
            then.status(200).body(b"bytes");
        });
        let dir = tempfile::TempDir::new()?;
        // A directory squatting on the artifact path makes the rename fail.
        tokio::fs::create_dir(dir.path().join("allocation_6.car")).await?;

        let error = fetcher(&dir)
            .fetch(&server.url("/payload.car"), 6)
            .await
            .expect_err("rename onto a directory must fail");

        assert!(matches!(
            error,
            FetchError::Io {
                operation: "rename",
                ..
            }
        ));
        assert!(!dir.path().join(".allocation_6.car.part").exists());
        Ok(())
    }

    #[tokio::test]
    async fn no_partial_file_remains_after_success() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/payload.car");
            then.status(200).body(b"bytes");
        });
        let dir = tempfile::TempDir::new()?;

        fetcher(&dir).fetch(&server.url("/payload.car"), 5).await?;

        assert!(!dir.path().join(".allocation_5.car.part").exists());
        Ok(())
    }
}
