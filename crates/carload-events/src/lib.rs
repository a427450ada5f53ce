//! Allocation event record and the bounded feed connecting the chain
//! watcher to the pipeline consumer.
//!
//! The feed is a thin wrapper over `tokio::mpsc`: one producer task (the
//! watcher) pushes decoded events, one consumer loop drains them. Modelling
//! the subscription as an explicit stream keeps ordering and shutdown
//! observable in tests without a live network dependency — the stream ends
//! when every sender has been dropped.
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

use tokio::sync::mpsc;

/// Default buffer size for the allocation feed.
const DEFAULT_FEED_CAPACITY: usize = 256;

/// Immutable record describing one on-chain allocation creation.
///
/// Decoded from a single contract log (live or backfilled), consumed exactly
/// once by the pipeline, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AllocationEvent {
    /// On-chain account that requested the allocation (0x-hex address).
    pub client: String,
    /// Unique numeric identifier of the allocation, scoped to the contract.
    pub allocation_id: u64,
    /// Numeric identifier of the storage provider the allocation targets.
    pub provider: u64,
    /// Opaque byte payload encoding the piece content identifier.
    pub data: Vec<u8>,
    /// Declared size of the stored content, in bytes.
    pub size: u64,
    /// Minimum allocation duration, in chain epochs.
    pub term_min: i64,
    /// Maximum allocation duration, in chain epochs.
    pub term_max: i64,
    /// Epoch after which the allocation lapses if unclaimed.
    pub expiration: i64,
    /// Location from which the content can be fetched.
    pub download_url: String,
    /// Block in which the event was mined; absent is a valid state.
    pub block_number: Option<u64>,
    /// Transaction hash, carried for traceability only.
    pub transaction_hash: Option<String>,
    /// `true` when the event was recovered through historical backfill.
    pub is_past_event: bool,
}

/// Construct a bounded allocation feed with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn feed(capacity: usize) -> (AllocationSender, AllocationStream) {
    assert!(capacity > 0, "allocation feed capacity must be positive");
    let (sender, receiver) = mpsc::channel(capacity);
    (AllocationSender { sender }, AllocationStream { receiver })
}

/// Construct an allocation feed with the default buffer size.
#[must_use]
pub fn default_feed() -> (AllocationSender, AllocationStream) {
    feed(DEFAULT_FEED_CAPACITY)
}

/// Producer half of the allocation feed.
#[derive(Clone)]
pub struct AllocationSender {
    sender: mpsc::Sender<AllocationEvent>,
}

impl AllocationSender {
    /// Push an event into the feed, waiting when the buffer is full.
    ///
    /// Returns `false` when the consumer side has gone away; producers treat
    /// that as a shutdown signal rather than an error.
    pub async fn send(&self, event: AllocationEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }
}

/// Consumer half of the allocation feed.
pub struct AllocationStream {
    receiver: mpsc::Receiver<AllocationEvent>,
}

impl AllocationStream {
    /// Receive the next event, or `None` once all senders are dropped.
    pub async fn next(&mut self) -> Option<AllocationEvent> {
        self.receiver.recv().await
    }
}
