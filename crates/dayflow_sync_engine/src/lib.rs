//! # Dayflow Sync Engine
//!
//! Local-first synchronization and single-active-session enforcement.
//!
//! This crate provides:
//! - [`SyncEngine`]: keeps each kind's local store, read model and remote
//!   collection consistent
//! - [`SessionCoordinator`]: at most one writable session per account
//! - [`ClientRuntime`]: the composition root driven by the auth layer
//!
//! ## Architecture
//!
//! Writes are **local first**:
//! 1. Mark the entity pending
//! 2. Apply it to the local store and refresh the read model
//! 3. Push it to the remote store in the background
//!
//! The remote store is authoritative. Every remote snapshot resyncs the
//! local store, except for entities this device is still writing, so the
//! echo of a write never clobbers a newer local edit.
//!
//! ## Key Invariants
//!
//! - Local writes are visible before the remote push starts
//! - Every kind is bootstrapped before any subscription is installed
//! - A superseded device signs out exactly once per session

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod engine;
mod error;
mod journal;
mod kinds;
mod pending;
mod push;
mod read_model;
mod runtime;
mod session;
mod status;

pub use auth::{AuthFacade, MemoryAuth};
pub use config::{SessionConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use journal::OfflineJournal;
pub use kinds::{KindBinding, KindTable};
pub use pending::PendingChangeSet;
pub use read_model::ReadModel;
pub use runtime::ClientRuntime;
pub use session::{SessionCoordinator, SessionNotice, SessionState, TakeoverReason};
pub use status::{FailedItem, SyncState, SyncStatus};
