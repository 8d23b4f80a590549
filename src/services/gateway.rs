//! StorageGateway: the only door to the storage backend.
//!
//! Every call checks that the backend is configured, validates its inputs
//! before touching the network, normalizes paths and maps backend answers to
//! `GatewayError`. It runs with service-role credentials and must only be
//! reachable from the admin surface.

use crate::{
    models::{bucket::Bucket, item::StorageItem},
    services::{
        backend::{ListOptions, ObjectStore, StoreError, UploadOptions},
        folders::{self, FOLDER_PLACEHOLDER},
    },
};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_PREVIEW_TTL_SECS: u64 = 600;
pub const PUBLIC_FALLBACK_TTL_SECS: u64 = 3600;
/// Longest lifetime a caller may request for a signed URL (7 days).
pub const MAX_SIGNED_URL_TTL_SECS: u64 = 7 * 24 * 3600;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const UPLOAD_CACHE_CONTROL: &str = "3600";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("storage is not configured: {0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] StoreError),
    #[error("nothing was deleted at `{0}`; verify the path")]
    NothingDeleted(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A file handed to `upload_file`.
#[derive(Clone, Debug)]
pub struct UploadFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }
}

#[derive(Clone)]
enum Connection {
    Ready(Arc<dyn ObjectStore>),
    Unconfigured(String),
}

#[derive(Clone)]
pub struct StorageGateway {
    connection: Connection,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            connection: Connection::Ready(store),
        }
    }

    /// A gateway whose every call fails with `GatewayError::Config(reason)`.
    pub fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            connection: Connection::Unconfigured(reason.into()),
        }
    }

    fn store(&self) -> GatewayResult<&dyn ObjectStore> {
        match &self.connection {
            Connection::Ready(store) => Ok(store.as_ref()),
            Connection::Unconfigured(reason) => Err(GatewayError::Config(reason.clone())),
        }
    }

    pub async fn list_buckets(&self) -> GatewayResult<Vec<Bucket>> {
        let store = self.store()?;
        let buckets = store.list_buckets().await.inspect_err(|err| {
            warn!("listing buckets failed: {}", err);
        })?;
        debug!("listed {} buckets", buckets.len());
        Ok(buckets)
    }

    /// Immediate children of `path`, folders first, placeholders hidden.
    pub async fn list_objects(&self, bucket: &str, path: &str) -> GatewayResult<Vec<StorageItem>> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let prefix = folders::normalize_path(path);

        let entries = store
            .list(bucket, &prefix, &ListOptions::default())
            .await
            .inspect_err(|err| warn!("listing {}/{} failed: {}", bucket, prefix, err))?;

        let mut items: Vec<StorageItem> = entries
            .into_iter()
            .filter(|entry| !folders::is_placeholder(&entry.name))
            .map(|entry| folders::to_storage_item(entry, &prefix))
            .collect();
        folders::sort_items(&mut items);

        debug!("listed {} items under {}/{}", items.len(), bucket, prefix);
        Ok(items)
    }

    /// Create `{path}/{name}/` by writing a placeholder object inside it.
    ///
    /// Creating a folder that already exists succeeds.
    pub async fn create_folder(&self, bucket: &str, path: &str, name: &str) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let name = name.trim().trim_end_matches('/');
        require(name, "folder name is required")?;

        let folder = folders::join_path(path, name);
        let marker = folders::join_path(&folder, FOLDER_PLACEHOLDER);
        let options = UploadOptions {
            content_type: "text/plain".into(),
            cache_control: UPLOAD_CACHE_CONTROL.into(),
            upsert: false,
        };

        match store.upload(bucket, &marker, Bytes::new(), &options).await {
            Ok(_) => info!("created folder {}/{}", bucket, folder),
            Err(StoreError::AlreadyExists(_)) => {
                debug!("folder {}/{} already exists", bucket, folder)
            }
            Err(err) => {
                warn!("creating folder {}/{} failed: {}", bucket, folder, err);
                return Err(err.into());
            }
        }
        Ok(folder)
    }

    /// Upload `file` into `path`, replacing any object already at that key.
    pub async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        file: UploadFile,
    ) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        if file.name.trim().is_empty() || file.bytes.is_empty() {
            return Err(GatewayError::Validation("no file provided".into()));
        }

        let key = folders::join_path(path, &file.name);
        let options = UploadOptions {
            content_type: file
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.into()),
            cache_control: UPLOAD_CACHE_CONTROL.into(),
            upsert: true,
        };

        let size = file.bytes.len();
        store
            .upload(bucket, &key, file.bytes, &options)
            .await
            .inspect_err(|err| warn!("upload to {}/{} failed: {}", bucket, key, err))?;
        info!("uploaded {}/{} ({} bytes)", bucket, key, size);
        Ok(key)
    }

    pub async fn delete_object(&self, bucket: &str, path: &str) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let key = folders::normalize_path(path);
        require(&key, "path is required")?;

        let removed = store
            .remove(bucket, std::slice::from_ref(&key))
            .await
            .inspect_err(|err| warn!("deleting {}/{} failed: {}", bucket, key, err))?;
        if removed.is_empty() {
            return Err(GatewayError::NothingDeleted(key));
        }

        info!("deleted {}/{}", bucket, key);
        Ok(key)
    }

    /// Remove the placeholder objects that make `path` a folder.
    ///
    /// Every known marker name goes out in one batch; removing any of them
    /// counts as success. Other objects under the prefix are left alone.
    pub async fn delete_folder(&self, bucket: &str, path: &str) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let folder = folders::normalize_path(path);
        require(&folder, "path is required")?;

        let markers: Vec<String> = folders::PLACEHOLDER_NAMES
            .iter()
            .map(|marker| folders::join_path(&folder, marker))
            .collect();
        let removed = store
            .remove(bucket, &markers)
            .await
            .inspect_err(|err| warn!("deleting folder {}/{} failed: {}", bucket, folder, err))?;
        if removed.is_empty() {
            return Err(GatewayError::NothingDeleted(folder));
        }

        info!("deleted folder {}/{}", bucket, folder);
        Ok(folder)
    }

    /// Move (rename) an object. An object already at `dest` is overwritten.
    pub async fn move_object(&self, bucket: &str, source: &str, dest: &str) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let source = folders::normalize_path(source);
        let dest = folders::normalize_path(dest);
        require(&source, "source path is required")?;
        require(&dest, "destination path is required")?;

        store
            .move_object(bucket, &source, &dest)
            .await
            .inspect_err(|err| warn!("moving {}/{} failed: {}", bucket, source, err))?;
        info!("moved {}/{} -> {}", bucket, source, dest);
        Ok(dest)
    }

    /// Time-limited signed URL for previewing an object.
    pub async fn get_object_preview_url(
        &self,
        bucket: &str,
        path: &str,
        ttl_seconds: u64,
    ) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let key = folders::normalize_path(path);
        require(&key, "path is required")?;
        if !(1..=MAX_SIGNED_URL_TTL_SECS).contains(&ttl_seconds) {
            return Err(GatewayError::Validation(format!(
                "ttl must be between 1 and {} seconds",
                MAX_SIGNED_URL_TTL_SECS
            )));
        }

        let url = store
            .create_signed_url(bucket, &key, Duration::from_secs(ttl_seconds))
            .await?;
        debug!("signed {}/{} for {}s", bucket, key, ttl_seconds);
        Ok(url)
    }

    /// Public URL when the bucket serves one, otherwise a one-hour signed URL.
    pub async fn get_object_public_url(&self, bucket: &str, path: &str) -> GatewayResult<String> {
        let store = self.store()?;
        require(bucket, "bucket is required")?;
        let key = folders::normalize_path(path);
        require(&key, "path is required")?;

        if let Some(url) = store.public_url(bucket, &key).await? {
            return Ok(url);
        }
        debug!("no public url for {}/{}, falling back to signed url", bucket, key);
        let url = store
            .create_signed_url(bucket, &key, Duration::from_secs(PUBLIC_FALLBACK_TTL_SECS))
            .await?;
        Ok(url)
    }
}

fn require(value: &str, message: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        Err(GatewayError::Validation(message.into()))
    } else {
        Ok(())
    }
}
