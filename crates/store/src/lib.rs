//! Key-value item storage for frequency-capping counters.
//!
//! This crate defines the contract the counter engine is written against
//! and ships two implementations of it.
//!
//! # Core Concepts
//!
//! ## Items
//!
//! An [`Item`] is a map of attribute names to [`AttributeValue`]s. Values
//! are typed scalars (`S`, `N`, `BOOL`, `NULL`) or nested maps (`M`).
//! Numbers are decimal text, so integers never pass through a float. Every
//! item carries its key in the [`KEY_ATTRIBUTE`] attribute.
//!
//! ## Backend
//!
//! The [`Backend`] trait is the boundary to the store. Besides plain reads
//! it offers two ways to change an item safely while other callers write
//! to the same key:
//!
//! - [`Backend::increment_field`] adds to a nested numeric field in one
//!   atomic step.
//! - [`Backend::conditional_put`] replaces an item only if its
//!   [`VersionedItem::version`] is unchanged since it was read.
//!
//! [`Backend::remove_field`] deletes a single nested field, leaving its
//! siblings untouched.
//!
//! ## Implementations
//!
//! - [`MemoryBackend`] — process-local, for tests and throwaway runs.
//! - [`SqliteBackend`] — durable, safe to share between processes.
//!
//! # Example
//!
//! ```no_run
//! use store::{Backend, FieldPath, SqliteBackend, DEFAULT_BUSY_TIMEOUT};
//!
//! # async fn example() -> store::Result<()> {
//! let backend = SqliteBackend::open("freq_cap.db", "freq_cap", DEFAULT_BUSY_TIMEOUT)?;
//! backend.ensure_collection().await?;
//!
//! let path = FieldPath::new(["campaigns", "spring-sale"]).expect("non-empty path");
//! let count = backend.increment_field("session-42", &path, 1).await?;
//! println!("shown {count} times");
//! # Ok(())
//! # }
//! ```

mod attribute;
mod backend;
mod error;
mod memory;
mod sqlite;

pub use attribute::{AttributeValue, FieldPath, Item, KEY_ATTRIBUTE};
pub use backend::{Backend, CollectionInfo, ItemCheck, PutOutcome, VersionedItem};
pub use error::{Error, Result};
pub use memory::MemoryBackend;
pub use sqlite::{DEFAULT_BUSY_TIMEOUT, SqliteBackend};
