//! Published content cache: an in-memory, copy-on-write snapshot of the
//! published content tree with route resolution and debounced on-disk
//! persistence.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
