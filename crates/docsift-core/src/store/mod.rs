//! Blob storage abstraction and implementations.

pub mod fs;
pub mod memory;
pub mod s3;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::BoxFuture;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("malformed object {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("{0}")]
    Backend(String),
    /// A backend failure that may clear up if the request is repeated.
    #[error("{0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// One stored object as seen by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A key-addressed blob store holding inputs and outputs.
pub trait BlobStore: Send + Sync {
    /// Human-readable location for logs, e.g. `s3://docs` or a directory path.
    fn describe(&self) -> String;

    /// Bucket name, for stores an OCR engine can read from directly.
    fn bucket(&self) -> Option<&str> {
        None
    }

    /// Write `bytes` under `key`, replacing any existing object.
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StoreError>>;

    /// Objects whose key starts with `prefix`, sorted by key.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StoreError>>;

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Remove `key`. Removing a missing key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// MIME type for an object key, by extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("extracted-texts/a.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("extraction-metadata/a.json"), "application/json");
        assert_eq!(content_type_for("input-articles/A.PDF"), "application/pdf");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }
}
