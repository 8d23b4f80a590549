//! The storage backend contract.
//!
//! `ObjectStore` mirrors the primitives of the managed storage API the admin
//! browser talks to: a flat key space per bucket, non-recursive listings that
//! report deeper prefixes as null-id entries, batch removal, moves and URL
//! signing. The gateway layers validation and folder semantics on top.

use crate::models::{bucket::Bucket, item::ListedEntry};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Column and direction the backend sorts a listing by.
#[derive(Clone, Debug)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub sort_column: &'static str,
    pub ascending: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 1000,
            offset: 0,
            sort_column: "name",
            ascending: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadOptions {
    pub content_type: String,
    pub cache_control: String,
    /// Overwrite an existing object at the same key instead of failing.
    pub upsert: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>>;

    /// List the immediate children of `prefix` (no leading or trailing `/`).
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ListedEntry>>;

    /// Store `body` at `key`, returning the stored key.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String>;

    /// Remove every key in `keys`; returns the entries actually removed.
    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<Vec<ListedEntry>>;

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> StoreResult<()>;

    async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StoreResult<String>;

    /// Permanent public URL, when the backend produces one for this object.
    async fn public_url(&self, bucket: &str, key: &str) -> StoreResult<Option<String>>;
}
