//! Wire types shared between the pubcache store and the collaborators that feed it.
//!
//! Change payloads arrive from an external message bus as JSON arrays shaped
//! `{"Id": 1234, "ChangeKind": 1, "ItemType": "IContent"}`. The change kind is a
//! bit set so one descriptor can carry several intents.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Tree change flags carried by a [`ChangePayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeKind(u8);

impl ChangeKind {
    pub const NONE: Self = Self(0);
    /// Refresh a single node.
    pub const REFRESH_NODE: Self = Self(1);
    /// Refresh a node and all of its descendants.
    pub const REFRESH_BRANCH: Self = Self(2);
    /// Discard the tree and reload everything.
    pub const REFRESH_ALL: Self = Self(4);
    /// Remove a node (and its descendants).
    pub const REMOVE: Self = Self(8);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1111)
    }

    /// True when every flag of `other` is set.
    pub const fn has(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True when none of the flags of `other` is set.
    pub const fn has_none(self, other: Self) -> bool {
        self.0 & other.0 == 0
    }
}

impl BitOr for ChangeKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeKind {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::REFRESH_NODE, "RefreshNode"),
            (Self::REFRESH_BRANCH, "RefreshBranch"),
            (Self::REFRESH_ALL, "RefreshAll"),
            (Self::REMOVE, "Remove"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.has(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("None")?;
        }
        Ok(())
    }
}

/// One change descriptor for a content, media, or member node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangePayload {
    pub id: i32,
    pub change_kind: ChangeKind,
    #[serde(default)]
    pub item_type: String,
}

impl ChangePayload {
    pub fn new(id: i32, change_kind: ChangeKind) -> Self {
        Self {
            id,
            change_kind,
            item_type: "IContent".to_string(),
        }
    }

    pub fn refresh_node(id: i32) -> Self {
        Self::new(id, ChangeKind::REFRESH_NODE)
    }

    pub fn refresh_branch(id: i32) -> Self {
        Self::new(id, ChangeKind::REFRESH_BRANCH)
    }

    pub fn refresh_all() -> Self {
        Self::new(0, ChangeKind::REFRESH_ALL)
    }

    pub fn remove(id: i32) -> Self {
        Self::new(id, ChangeKind::REMOVE)
    }
}

/// Content-type change flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentTypeChangeKind(u8);

impl ContentTypeChangeKind {
    pub const NONE: Self = Self(0);
    /// Structural change impacting the content of that type.
    pub const REFRESH_MAIN: Self = Self(1);
    /// Change without impact on content (name, icon, ...).
    pub const REFRESH_OTHER: Self = Self(2);
    pub const REMOVE: Self = Self(4);
    pub const CREATE: Self = Self(8);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn has(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for ContentTypeChangeKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub const CONTENT_TYPE_ITEM: &str = "IContentType";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentTypeChangePayload {
    pub id: i32,
    pub change_kind: ContentTypeChangeKind,
    #[serde(default)]
    pub item_type: String,
}

impl ContentTypeChangePayload {
    pub fn refresh_main(id: i32) -> Self {
        Self {
            id,
            change_kind: ContentTypeChangeKind::REFRESH_MAIN,
            item_type: CONTENT_TYPE_ITEM.to_string(),
        }
    }
}

/// A row of the database read contract.
///
/// Rows are always delivered ordered by `(level, sort_order)` so that every
/// parent is materialized before any of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ContentRow {
    pub id: i32,
    pub parent_id: i32,
    pub sort_order: i32,
    pub level: i32,
    pub path: String,
    /// Serialized node document (JSON).
    pub payload: String,
    pub rv: i64,
    pub published: bool,
}

/// Result of applying a batch of change payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub draft_changed: bool,
    pub published_changed: bool,
}
