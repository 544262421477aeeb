//! Change notifications emitted after a committed write.

use serde::{Deserialize, Serialize};

use blockbase_types::Block;

use crate::pattern::HasSubject;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Patched,
    Deleted,
    Undeleted,
}

impl ChangeKind {
    pub fn subject(self) -> &'static str {
        match self {
            ChangeKind::Inserted => "block.inserted",
            ChangeKind::Patched => "block.patched",
            ChangeKind::Deleted => "block.deleted",
            ChangeKind::Undeleted => "block.undeleted",
        }
    }
}

/// A committed change to one block.
///
/// Deletions carry no block state; the tombstone lives in history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    pub kind: ChangeKind,
    pub block_id: String,
    pub board_id: String,
    pub modified_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
}

impl BlockChange {
    fn with_block(kind: ChangeKind, block: Block) -> Self {
        Self {
            kind,
            block_id: block.id.clone(),
            board_id: block.board_id.clone(),
            modified_by: block.modified_by.clone(),
            block: Some(block),
        }
    }

    pub fn inserted(block: Block) -> Self {
        Self::with_block(ChangeKind::Inserted, block)
    }

    pub fn patched(block: Block) -> Self {
        Self::with_block(ChangeKind::Patched, block)
    }

    pub fn undeleted(block: Block) -> Self {
        Self::with_block(ChangeKind::Undeleted, block)
    }

    pub fn deleted(
        board_id: impl Into<String>,
        block_id: impl Into<String>,
        modified_by: impl Into<String>,
    ) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            block_id: block_id.into(),
            board_id: board_id.into(),
            modified_by: modified_by.into(),
            block: None,
        }
    }
}

impl HasSubject for BlockChange {
    fn subject(&self) -> &str {
        self.kind.subject()
    }
}
