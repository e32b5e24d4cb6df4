//! Application-facing contracts between the cache and its collaborators.

pub mod error;
pub mod repos;
