use thiserror::Error;

use crate::application::repos::RepoError;
use crate::domain::error::DomainError;

use super::file::SnapshotFileError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("snapshot file: {0}")]
    File(#[from] SnapshotFileError),
}
