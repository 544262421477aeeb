//! Boards: the containers blocks live in.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Visibility of a board within its team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString)]
pub enum BoardType {
    #[default]
    #[serde(rename = "O")]
    #[strum(serialize = "O")]
    Open,
    #[serde(rename = "P")]
    #[strum(serialize = "P")]
    Private,
}

impl BoardType {
    /// Column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardType::Open => "O",
            BoardType::Private => "P",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

/// A block container owned by a team.
///
/// Boards created before team ownership existed, or inside direct/group
/// message channels, may carry an empty `team_id` until the ownership
/// migration assigns one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub modified_by: String,
    #[serde(rename = "type", default)]
    pub board_type: BoardType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub update_at: i64,
    #[serde(default)]
    pub delete_at: i64,
}

impl Board {
    pub fn new(id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            team_id: team_id.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn with_creator(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = user_id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn as_template(mut self) -> Self {
        self.is_template = true;
        self
    }
}
