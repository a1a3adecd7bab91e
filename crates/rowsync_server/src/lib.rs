//! # RowSync Server
//!
//! Server-side sync workflows for RowSync.
//!
//! This crate provides:
//! - Upload reconciliation (permanent id assignment, conflict and error
//!   classification, tombstone synthesis)
//! - Download assembly (size-bounded, ordered pages with a cursor)
//! - The change provider contract with an in-memory test double
//!
//! # Architecture
//!
//! The server runs against a [`ChangeProvider`], the storage boundary.
//! An upload is applied as one batch; the provider reports one outcome
//! per row and per-row failures never abort the batch. A download is
//! assembled once per exchange through the row sorter and served page by
//! page through an opaque cursor.
//!
//! # Protocol
//!
//! 1. Client uploads its changed rows in a single change set
//! 2. Server applies them, resolves conflicts by policy, assigns
//!    permanent ids to accepted inserts
//! 3. Client pages the server's changes down until the last batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod download;
mod error;
mod provider;
mod service;
mod upload;

pub use config::ServerConfig;
pub use download::DownloadAssembler;
pub use error::{ServerError, ServerResult};
pub use provider::{ApplyOutcome, ApplyReport, ChangeProvider, MemoryChangeProvider, RowOutcome};
pub use service::SyncService;
pub use upload::{RejectedEntity, UploadReconciler};
