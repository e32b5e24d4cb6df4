//! Repository traits describing the database read contract of the cache.

use async_trait::async_trait;
use futures::stream::BoxStream;
use pubcache_api_types::ContentRow;
use thiserror::Error;

use crate::domain::types::{ContentType, DomainAssignment, TreeKind};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("row payload could not be decoded: {message}")]
    Payload { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type RowStream<'a> = BoxStream<'a, Result<ContentRow, RepoError>>;

/// Source of published (and draft) rows for the cache.
///
/// Every row-returning method yields rows ordered by `(level, sort_order)` so
/// that parents always precede their children.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Every published row of one tree.
    fn stream_tree(&self, kind: TreeKind) -> RowStream<'_>;

    /// The published row of `id` followed by its published descendants.
    /// Empty when the node is not published.
    async fn load_branch(&self, kind: TreeKind, id: i32) -> Result<Vec<ContentRow>, RepoError>;

    /// Published rows whose content type is one of `content_type_ids`.
    async fn load_by_content_types(
        &self,
        kind: TreeKind,
        content_type_ids: &[i32],
    ) -> Result<Vec<ContentRow>, RepoError>;

    /// Latest (possibly unpublished) rows of the ancestors-or-self of `id`,
    /// plus its descendants when `include_descendants` is set.
    async fn load_preview(
        &self,
        id: i32,
        include_descendants: bool,
    ) -> Result<Vec<ContentRow>, RepoError>;

    async fn content_types(&self, kind: TreeKind) -> Result<Vec<ContentType>, RepoError>;

    async fn domain_roots(&self) -> Result<Vec<DomainAssignment>, RepoError>;

    /// Regenerate the serialized rows of one tree in groups of `group_size`,
    /// optionally limited to some content types. Returns the number of rows
    /// written.
    async fn rebuild(
        &self,
        kind: TreeKind,
        group_size: usize,
        content_type_ids: Option<&[i32]>,
    ) -> Result<u64, RepoError>;
}
