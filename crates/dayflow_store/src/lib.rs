//! # Dayflow Store
//!
//! Local persistent collections for Dayflow.
//!
//! Each entity kind owns one local collection. The local copy is the read
//! model the UI renders from; the remote copy is the source of truth. The
//! sync engine writes here optimistically and reconciles from the remote
//! store through [`LocalStore::sync`] and [`LocalStore::clear`].
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - One JSON document per collection on disk
//!
//! ## Example
//!
//! ```rust
//! # tokio_test_block(async {
//! use dayflow_core::{EntityDraft, EntityKind};
//! use dayflow_store::{LocalStore, MemoryStore};
//!
//! let store = MemoryStore::new(EntityKind::Todo);
//! let todo = store
//!     .add(EntityDraft::new().with_id("t1").field("title", "Buy milk"))
//!     .await
//!     .unwrap();
//! assert_eq!(store.get_all().await.unwrap(), vec![todo]);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod error;
mod file;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::LocalStore;
