use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("node {id} not found")]
    NotFound { id: i32 },
    #[error("parent {parent_id} of node {id} is not in the tree")]
    MissingParent { id: i32, parent_id: i32 },
    #[error("node {id} is already in the tree")]
    DuplicateId { id: i32 },
    #[error("payload of node {id} could not be decoded: {message}")]
    Payload { id: i32, message: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("tree invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn not_found(id: i32) -> Self {
        Self::NotFound { id }
    }

    pub fn payload(id: i32, message: impl Into<String>) -> Self {
        Self::Payload {
            id,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
