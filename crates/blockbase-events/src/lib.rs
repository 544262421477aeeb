//! Post-commit side effects for block changes.
//!
//! The store returns values and nothing else. Callers that need to react to a
//! committed write (notifications, webhooks, fan-out) publish a
//! [`BlockChange`] to a [`ChangeQueue`] after the transaction commits.
//! Handlers run on background tasks, never inside a storage transaction.
//!
//! Changes to the same block are delivered in publish order; changes to
//! different blocks may be handled concurrently.
//!
//! # Subjects
//!
//! Every change carries a dot-separated subject (`block.inserted`,
//! `block.patched`, `block.deleted`, `block.undeleted`). Handlers select
//! changes with NATS-style patterns, see [`matches_pattern`].
//!
//! # Example
//!
//! ```ignore
//! let queue = ChangeQueue::start(vec![Arc::new(AuditLog::default())], QueueConfig::default());
//!
//! let block = store.insert_block(&block, "user1")?;
//! queue.publish(BlockChange::inserted(block)).await?;
//!
//! queue.shutdown().await;
//! ```

pub mod change;
pub mod error;
pub mod pattern;
pub mod queue;

pub use change::{BlockChange, ChangeKind};
pub use error::QueueError;
pub use pattern::{HasSubject, matches_pattern};
pub use queue::{ChangeHandler, ChangeQueue, QueueConfig};
