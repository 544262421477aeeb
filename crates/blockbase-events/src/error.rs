use thiserror::Error;

/// Why a change could not be queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was shut down, or its worker stopped.
    #[error("change queue is closed")]
    Closed,

    /// The shard for this block is at capacity.
    #[error("change queue is full")]
    Full,
}
