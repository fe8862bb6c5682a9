//! Frequency-capping counters.
//!
//! This crate keeps, per session, how many times each advertising campaign
//! has been shown. Counters live in a [`store::Backend`]; this crate adds
//! the record model, its stored encoding, and the update protocol that
//! keeps concurrent increments from losing each other.
//!
//! # Overview
//!
//! - [`SessionRecord`]: a session id and its campaign → count map. Absent
//!   campaigns count as zero.
//! - [`codec`]: translation between records and stored [`store::Item`]s.
//! - [`CounterEngine`]: `increment`, `remove`, `fetch` and `reset_store`.
//! - [`UpdateStrategy`]: atomic field increments where the backend has
//!   them, versioned conditional writes with [`RetryPolicy`] backoff
//!   otherwise.
//!
//! Failures come back as [`Error`]; the engine never logs and never exits.
//!
//! # Example
//!
//! ```no_run
//! use capping::{CounterEngine, UpdateStrategy};
//! use store::MemoryBackend;
//!
//! # async fn example() -> capping::Result<()> {
//! let engine = CounterEngine::new(MemoryBackend::new(), UpdateStrategy::default());
//!
//! let shown = engine.increment("session-42", "spring-sale").await?;
//! assert_eq!(shown.count, 1);
//!
//! let session = engine.remove("session-42", "spring-sale").await?;
//! assert!(session.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod engine;
mod error;
mod record;
mod retry;

pub use engine::{CounterEngine, Increment, UpdateStrategy};
pub use error::{Error, Result};
pub use record::{MAX_COUNT, SessionRecord, SessionSnapshot};
pub use retry::RetryPolicy;
