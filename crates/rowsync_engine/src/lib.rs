//! # RowSync Engine
//!
//! Client-side session orchestrator for RowSync.
//!
//! This crate provides:
//! - Sync session state machine (open → upload → download → close)
//! - Immutable run configuration built from a mutable draft
//! - Cooperative cancellation
//! - Local store and transport abstractions with in-memory test doubles
//! - Per-run statistics assembled from functional step accumulators
//!
//! ## Architecture
//!
//! A session implements an **upload-then-download** exchange:
//! 1. Upload the locally changed rows in a single pass
//! 2. Page the server's changes down until the last batch
//! 3. Close the local session on every exit path
//!
//! ## Key Invariants
//!
//! - Server is authoritative; upload failures skip the download phase
//! - A local session that opens is closed exactly once
//! - The local store observes every upload response, including failed ones
//! - Ordinary failures are reported through statistics, never as `Err`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod session;
mod store;
mod transport;

pub use config::{SerializationFormat, SyncConfig, SyncConfigBuilder};
pub use error::{SyncError, SyncResult};
pub use session::{CancellationToken, SessionStats, SyncSession};
pub use store::{LocalStore, MemoryLocalStore};
pub use transport::{MockTransport, SyncTransport};
