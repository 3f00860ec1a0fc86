//! # Dayflow Remote
//!
//! The remote side of Dayflow synchronization.
//!
//! This crate defines the contracts the sync engine consumes:
//! - [`RemoteCollection`]: per-kind document CRUD scoped to a user, plus a
//!   push subscription delivering full snapshots
//! - [`SessionStore`]: the single active-session document per user
//! - [`Subscription`]: the cancellable handle that runs a snapshot callback
//!
//! It also ships [`MemoryRemote`], an in-process backend used by tests and
//! the simulation CLI. Every simulated device connects with its own
//! credential, so session takeover and access-rule failures behave the way
//! they do against the hosted store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod memory;
mod remote;
mod subscription;

pub use config::{MemoryRemoteConfig, SessionReadPolicy};
pub use error::{RemoteError, RemoteResult};
pub use memory::{MemoryCollection, MemoryRemote, RemoteClient};
pub use remote::{RemoteCollection, SessionStore};
pub use subscription::{
    snapshot_channel, ActiveFlag, Snapshot, SnapshotReceiver, SnapshotSender, Subscription,
};
