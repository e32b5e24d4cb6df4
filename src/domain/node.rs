//! Published nodes as stored in a snapshot.

use pubcache_api_types::ContentRow;
use serde::{Deserialize, Serialize};
use slug::slugify;
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;

/// Id of the conceptual root every top-level node hangs under.
pub const ROOT_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub alias: String,
    pub value: String,
}

/// One node of a published tree.
///
/// `path`, `level` and `parent_id` always agree with the node's position in
/// the owning [`Snapshot`](super::snapshot::Snapshot); `children` is kept
/// ordered by `(sort_order, id)` by the snapshot and is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: i32,
    pub key: Uuid,
    pub parent_id: i32,
    pub path: String,
    pub level: i32,
    pub sort_order: i32,
    pub type_alias: String,
    pub rv: i64,
    pub name: String,
    pub url_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub create_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub update_date: OffsetDateTime,
    pub creator_id: i32,
    pub writer_id: i32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_draft: bool,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(skip)]
    pub children: Vec<i32>,
}

/// The serialized document stored in the `payload` column of a source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePayload {
    pub key: Uuid,
    pub type_alias: String,
    pub name: String,
    #[serde(default)]
    pub url_name: Option<String>,
    #[serde(default)]
    pub template_id: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub create_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub update_date: OffsetDateTime,
    #[serde(default)]
    pub creator_id: i32,
    #[serde(default)]
    pub writer_id: i32,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Node {
    /// Decode a source row into a detached node (no children yet).
    pub fn from_row(row: &ContentRow) -> Result<Self, DomainError> {
        let payload: NodePayload = serde_json::from_str(&row.payload)
            .map_err(|err| DomainError::payload(row.id, err.to_string()))?;

        if payload.type_alias.trim().is_empty() {
            return Err(DomainError::payload(row.id, "empty type alias"));
        }

        let url_name = match payload.url_name {
            Some(name) if !name.trim().is_empty() => name.to_lowercase(),
            _ => derive_url_name(&payload.name, row.id),
        };

        Ok(Self {
            id: row.id,
            key: payload.key,
            parent_id: row.parent_id,
            path: row.path.clone(),
            level: row.level,
            sort_order: row.sort_order,
            type_alias: payload.type_alias,
            rv: row.rv,
            name: payload.name,
            url_name,
            template_id: payload.template_id,
            create_date: payload.create_date,
            update_date: payload.update_date,
            creator_id: payload.creator_id,
            writer_id: payload.writer_id,
            is_draft: false,
            properties: payload.properties,
            children: Vec::new(),
        })
    }

    pub fn property(&self, alias: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|property| property.alias.eq_ignore_ascii_case(alias))
            .map(|property| property.value.as_str())
    }

    /// Ids of the ancestor chain recorded in `path`, root marker included.
    pub fn path_ids(&self) -> Vec<i32> {
        self.path
            .split(',')
            .filter_map(|segment| segment.trim().parse().ok())
            .collect()
    }

    /// Copy the content attributes of `other` onto `self`, leaving the
    /// structural fields (`children`) untouched.
    pub fn patch_from(&mut self, other: &Node) {
        self.key = other.key;
        self.parent_id = other.parent_id;
        self.path.clone_from(&other.path);
        self.level = other.level;
        self.sort_order = other.sort_order;
        self.type_alias.clone_from(&other.type_alias);
        self.rv = other.rv;
        self.name.clone_from(&other.name);
        self.url_name.clone_from(&other.url_name);
        self.template_id = other.template_id;
        self.create_date = other.create_date;
        self.update_date = other.update_date;
        self.creator_id = other.creator_id;
        self.writer_id = other.writer_id;
        self.is_draft = other.is_draft;
        self.properties.clone_from(&other.properties);
    }

    pub(crate) fn sort_key(&self) -> (i32, i32) {
        (self.sort_order, self.id)
    }
}

/// Url segment used when the payload carries none.
pub fn derive_url_name(name: &str, id: i32) -> String {
    let candidate = slugify(name);
    if candidate.is_empty() {
        id.to_string()
    } else {
        candidate
    }
}

/// Path string of a child of `parent_path`.
pub fn child_path(parent_path: &str, id: i32) -> String {
    format!("{parent_path},{id}")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use time::macros::datetime;

    use super::*;

    pub(crate) fn payload_json(type_alias: &str, name: &str) -> String {
        serde_json::json!({
            "key": Uuid::new_v4(),
            "typeAlias": type_alias,
            "name": name,
            "createDate": "2024-01-01T00:00:00Z",
            "updateDate": "2024-01-02T00:00:00Z",
            "creatorId": 0,
            "writerId": 0,
            "properties": [{"alias": "title", "value": name}],
        })
        .to_string()
    }

    pub(crate) fn node(id: i32, parent_id: i32, sort_order: i32) -> Node {
        Node {
            id,
            key: Uuid::new_v4(),
            parent_id,
            path: String::new(),
            level: 0,
            sort_order,
            type_alias: "page".to_string(),
            rv: 1,
            name: format!("Node {id}"),
            url_name: format!("node-{id}"),
            template_id: None,
            create_date: datetime!(2024-01-01 0:00 UTC),
            update_date: datetime!(2024-01-01 0:00 UTC),
            creator_id: 0,
            writer_id: 0,
            is_draft: false,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }
}
