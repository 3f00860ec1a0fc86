//! # Dayflow Testkit
//!
//! Test utilities for Dayflow sync.
//!
//! This crate provides:
//! - Simulated devices sharing one in-process backend
//! - Property-based generators for mutation scripts and sign-in orders
//! - Async wait helpers for the paused tokio clock
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dayflow_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn two_devices() {
//!     let remote = MemoryRemote::default();
//!     let phone = TestDevice::new(&remote, "phone");
//!     let tablet = TestDevice::new(&remote, "tablet");
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod wait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::wait::*;
    pub use dayflow_core::{DeviceId, EntityDraft, EntityId, EntityKind, UserId};
    pub use dayflow_remote::{MemoryRemote, MemoryRemoteConfig, SessionReadPolicy};
}

pub use fixtures::*;
pub use generators::*;
pub use wait::*;
