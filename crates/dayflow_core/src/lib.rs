//! # Dayflow Core
//!
//! Core type definitions shared by every Dayflow crate.
//!
//! This crate provides:
//! - Identifiers (`UserId`, `DeviceId`, `EntityId`, `SessionId`)
//! - Entity kinds and the per-kind natural key table
//! - The syncable [`Entity`] document and its [`EntityDraft`] input form
//! - The remote [`SessionRecord`] used for single-active-session enforcement
//!
//! Entity bodies are schemaless JSON objects: the sync engine never looks
//! inside them except for a kind's natural key.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod session;
mod types;

pub use entity::{Entity, EntityDraft, EntityId, Fields};
pub use error::{CoreError, CoreResult};
pub use session::{SessionId, SessionRecord};
pub use types::{DeviceId, EntityKind, Timestamp, UserId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
