//! Shared data model for blockbase.
//!
//! This crate is the leaf of the workspace: blocks, patches, boards, typed
//! identifiers and the validation rules every writer must pass before a
//! transaction is opened. It knows nothing about SQL.
//!
//! # Entity Overview
//!
//! ```text
//! Board (team_id, channel_id) ← container, owned by a team
//!     └── Block (board_id)    ← content node
//!           └── root_id       ← top-most ancestor (itself for roots)
//!           └── parent_id     ← direct ancestor ("" for roots)
//!           └── fields        ← open attribute bag (FieldValue)
//! ```
//!
//! # Key Types
//!
//! |-----------------------|------------------------------------------------|
//! | Type                  | Purpose                                        |
//! |-----------------------|------------------------------------------------|
//! | [`Block`]             | Current or historical state of a content node  |
//! | [`BlockPatch`]        | Field-level update instructions                |
//! | [`BlockPatchBatch`]   | Parallel id/patch lists applied atomically     |
//! | [`FieldValue`]        | Closed set of JSON-encodable attribute values  |
//! | [`Board`]             | Block container with team ownership            |
//! | [`IdType`]            | One-character id prefix per entity kind        |
//! | [`ValidationError`]   | Input rejected before any write                |
//! |-----------------------|------------------------------------------------|

pub mod block;
pub mod board;
pub mod error;
pub mod fields;
pub mod ids;

pub use block::{Block, BlockPatch, BlockPatchBatch, SubtreeDepth};
pub use board::{Board, BoardType};
pub use error::{ValidationError, ValidationResult};
pub use fields::{FieldValue, Fields};
pub use ids::{IdType, new_id};

/// Principal recorded for writes performed by the server itself.
pub const SYSTEM_USER_ID: &str = "system";

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
