//! Chain session: log subscription, decoding, and provider filtering.
//!
//! One contract, one event signature. The session polls a JSON-RPC endpoint
//! for `AllocationCreated` logs, decodes each into an
//! [`carload_events::AllocationEvent`], keeps only those addressed to the configured storage provider, and pushes
//! them into the allocation feed. There is no reconnect logic; when the
//! endpoint goes away for good, the process exits and the supervisor
//! restarts it.
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

pub mod decode;
pub mod rpc;
pub mod watcher;

use thiserror::Error;

pub use crate::rpc::{LogClient, RawLog, RpcClient};
pub use crate::watcher::{AllocationWatcher, WatcherSettings};

/// Result alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Chain session failure.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The JSON-RPC request could not be completed.
    #[error("chain endpoint request failed")]
    Transport {
        /// JSON-RPC method being called.
        method: &'static str,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The endpoint answered with a JSON-RPC error object.
    #[error("chain endpoint rejected the call")]
    Rpc {
        /// JSON-RPC method being called.
        method: &'static str,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The endpoint answered without a result or error.
    #[error("chain endpoint returned no result")]
    MissingResult {
        /// JSON-RPC method being called.
        method: &'static str,
    },
    /// A log field could not be decoded.
    #[error("chain log field could not be decoded")]
    Decode {
        /// Field being decoded.
        field: &'static str,
        /// Why decoding failed.
        reason: &'static str,
        /// Offending value, when printable.
        value: Option<String>,
    },
}
