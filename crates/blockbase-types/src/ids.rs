//! Typed identifier generation.
//!
//! Ids are strings on the wire and in the database. A generated id is one
//! prefix character naming the entity kind followed by the 32-hex simple form
//! of a UUIDv7, so ids read well in logs and sort by creation time.

use std::str::FromStr;

use strum::{AsRefStr, EnumString};

/// Entity kind encoded in the first character of a generated id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum IdType {
    /// No particular kind (settings, categories, lease holders).
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "team")]
    Team,
    #[strum(serialize = "board")]
    Board,
    #[strum(serialize = "card")]
    Card,
    #[strum(serialize = "view")]
    View,
    /// Content blocks (text, checkbox, comment, ...).
    #[strum(serialize = "block")]
    Block,
}

impl IdType {
    /// The prefix character.
    pub fn prefix(self) -> char {
        match self {
            IdType::None => '7',
            IdType::Team => 't',
            IdType::Board => 'b',
            IdType::Card => 'c',
            IdType::View => 'v',
            IdType::Block => 'a',
        }
    }

    /// Id kind for a block of the given type.
    pub fn from_block_type(block_type: &str) -> Self {
        match block_type {
            "board" => IdType::Board,
            "card" => IdType::Card,
            "view" => IdType::View,
            "text" | "checkbox" | "comment" | "divider" | "image" | "attachment" | "h1" | "h2"
            | "h3" => IdType::Block,
            _ => IdType::None,
        }
    }

    /// Parse a kind name (`"card"`, `"view"`, ...).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

/// Generate a new, globally unique, time-ordered id of the given kind.
pub fn new_id(kind: IdType) -> String {
    format!("{}{}", kind.prefix(), uuid::Uuid::now_v7().as_simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_follows_block_type() {
        assert!(new_id(IdType::from_block_type("card")).starts_with('c'));
        assert!(new_id(IdType::from_block_type("view")).starts_with('v'));
        assert!(new_id(IdType::from_block_type("comment")).starts_with('a'));
        assert!(new_id(IdType::from_block_type("mystery")).starts_with('7'));
    }

    #[test]
    fn test_ids_are_unique_and_sortable() {
        let a = new_id(IdType::Card);
        let b = new_id(IdType::Card);
        assert_eq!(a.len(), 33);
        assert_ne!(a, b);
        assert!(a < b, "UUIDv7 ids sort by creation time");
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(IdType::from_str("CARD"), Some(IdType::Card));
        assert_eq!(IdType::from_str("nope"), None);
        assert_eq!(IdType::Board.as_ref(), "board");
    }
}
