//! Blocks and block patches.
//!
//! A [`Block`] is a generic, typed, tree-positioned content node. Its tree
//! position is given by two pointers: `root_id` (top-most ancestor, the block
//! itself for roots) and `parent_id` (direct ancestor, empty for roots).
//!
//! Provenance fields (`created_by`, `modified_by`, `create_at`, `update_at`)
//! are owned by the store. Whatever a caller puts there is overwritten on
//! write, so a client cannot forge history.

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::fields::{FieldValue, Fields, validate_fields};

/// Current or historical state of a content node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub board_id: String,
    #[serde(default)]
    pub parent_id: String,
    pub root_id: String,
    /// Discriminator (`card`, `view`, `text`, ...).
    #[serde(rename = "type", default)]
    pub block_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub modified_by: String,
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub update_at: i64,
    /// 0 while live; the tombstone time otherwise.
    #[serde(default)]
    pub delete_at: i64,
}

impl Block {
    /// Create a block with identity and tree position set.
    pub fn new(id: impl Into<String>, board_id: impl Into<String>, root_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            board_id: board_id.into(),
            root_id: root_id.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    pub fn with_type(mut self, block_type: impl Into<String>) -> Self {
        self.block_type = block_type.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Check the block can be written.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.root_id.is_empty() {
            return Err(ValidationError::EmptyRootId);
        }
        validate_fields(&self.fields)
    }

    /// Check if this is a root block (no parent).
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }

    /// Check if this snapshot is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.delete_at != 0
    }
}

/// Field-level update instructions for one block.
///
/// Scalars are replace-if-present. `updated_fields` entries replace whole
/// values per key (no deep merge). `deleted_fields` are removed after the
/// updates are applied, so a key named in both ends up absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_fields: Fields,
    #[serde(default)]
    pub deleted_fields: Vec<String>,
}

impl BlockPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn update_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.updated_fields.insert(key.into(), value.into());
        self
    }

    pub fn delete_field(mut self, key: impl Into<String>) -> Self {
        self.deleted_fields.push(key.into());
        self
    }

    /// Reject patches that would leave the block unwritable.
    pub fn validate(&self) -> ValidationResult<()> {
        if matches!(self.root_id.as_deref(), Some("")) {
            return Err(ValidationError::EmptyRootId);
        }
        validate_fields(&self.updated_fields)
    }

    /// Merge the patch into `block`. Provenance is left to the caller.
    pub fn apply(&self, block: &mut Block) {
        if let Some(parent_id) = &self.parent_id {
            block.parent_id = parent_id.clone();
        }
        if let Some(root_id) = &self.root_id {
            block.root_id = root_id.clone();
        }
        if let Some(block_type) = &self.block_type {
            block.block_type = block_type.clone();
        }
        if let Some(title) = &self.title {
            block.title = title.clone();
        }
        for (key, value) in &self.updated_fields {
            block.fields.insert(key.clone(), value.clone());
        }
        for key in &self.deleted_fields {
            block.fields.remove(key);
        }
    }
}

/// Patches for several blocks, applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatchBatch {
    pub block_ids: Vec<String>,
    pub block_patches: Vec<BlockPatch>,
}

impl BlockPatchBatch {
    pub fn validate(&self) -> ValidationResult<()> {
        if self.block_ids.len() != self.block_patches.len() {
            return Err(ValidationError::BatchLengthMismatch {
                ids: self.block_ids.len(),
                patches: self.block_patches.len(),
            });
        }
        self.block_patches.iter().try_for_each(BlockPatch::validate)
    }

    /// Pairs of (block id, patch).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BlockPatch)> {
        self.block_ids
            .iter()
            .map(String::as_str)
            .zip(self.block_patches.iter())
    }
}

/// How far below the anchor a subtree query reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubtreeDepth {
    /// Anchor plus direct children.
    Children,
    /// Anchor, children and grandchildren.
    Grandchildren,
}

impl SubtreeDepth {
    pub fn levels(self) -> u8 {
        match self {
            SubtreeDepth::Children => 1,
            SubtreeDepth::Grandchildren => 2,
        }
    }
}

impl TryFrom<u8> for SubtreeDepth {
    type Error = ValidationError;

    fn try_from(depth: u8) -> Result<Self, Self::Error> {
        match depth {
            1 => Ok(SubtreeDepth::Children),
            2 => Ok(SubtreeDepth::Grandchildren),
            other => Err(ValidationError::InvalidDepth(other)),
        }
    }
}
