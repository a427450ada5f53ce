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

//! Allocation processor bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (dependency construction, watcher and consumer
//! tasks, shutdown), `error.rs` (application-level error type).

/// Application bootstrap and environment loading.
pub mod bootstrap;
mod error;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
