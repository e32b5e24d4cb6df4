//! Shared domain enumerations aligned with persisted database enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which published tree a snapshot or row belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "tree_kind", rename_all = "snake_case")]
pub enum TreeKind {
    #[default]
    Content,
    Media,
    Member,
}

impl TreeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TreeKind::Content => "content",
            TreeKind::Media => "media",
            TreeKind::Member => "member",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TreeKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "content" => Ok(TreeKind::Content),
            "media" => Ok(TreeKind::Media),
            "member" => Ok(TreeKind::Member),
            _ => Err(()),
        }
    }
}

/// A content type as known to the cache: the alias is the element type name
/// used by nodes of that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    pub id: i32,
    pub alias: String,
    pub kind: TreeKind,
}

/// A hostname bound to a content node; routes below it are relative to the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAssignment {
    pub content_id: i32,
    pub host: String,
    /// Wildcard domains only carry culture; they never root a route.
    pub is_wildcard: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_kind_round_trips_through_str() {
        for kind in [TreeKind::Content, TreeKind::Media, TreeKind::Member] {
            assert_eq!(TreeKind::try_from(kind.as_str()), Ok(kind));
        }
        assert!(TreeKind::try_from("document").is_err());
    }
}
