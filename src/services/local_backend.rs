//! src/services/local_backend.rs
//!
//! LocalBackend: a self-hosted `ObjectStore` for development and tests.
//! Metadata lives in SQLite, payloads on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. Listings synthesize folder
//! entries the way the managed API does, and signed URLs are HMAC tokens
//! served back by this process.

use crate::{
    models::{
        bucket::Bucket,
        item::{ItemMetadata, ListedEntry},
    },
    services::{
        backend::{ListOptions, ObjectStore, StoreError, StoreResult, UploadOptions},
        rest_backend::encode_key,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use sqlx::{FromRow, SqlitePool};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const OBJECT_COLUMNS: &str = "id, key, content_type, cache_control, size_bytes, etag, \
                              created_at, updated_at, last_accessed_at";

/// Object metadata row.
#[derive(FromRow, Clone, Debug)]
pub struct ObjectRecord {
    pub id: String,
    pub key: String,
    pub content_type: String,
    pub cache_control: String,
    pub size_bytes: i64,
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl ObjectRecord {
    /// Listing entry named `name`, with the metadata the managed API reports.
    fn to_entry(&self, name: &str) -> ListedEntry {
        let mut extra = Map::new();
        extra.insert("eTag".into(), Value::String(format!("\"{}\"", self.etag)));
        extra.insert(
            "cacheControl".into(),
            Value::String(format!("max-age={}", self.cache_control)),
        );
        extra.insert(
            "lastModified".into(),
            Value::String(self.updated_at.to_rfc3339()),
        );

        ListedEntry {
            name: name.to_string(),
            id: Some(self.id.clone()),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            last_accessed_at: Some(self.last_accessed_at),
            metadata: Some(ItemMetadata {
                mimetype: Some(self.content_type.clone()),
                size: Some(self.size_bytes.max(0) as u64),
                extra,
            }),
        }
    }
}

#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Externally reachable root of this server, used to build object URLs.
    public_base_url: String,

    signing_key: String,
}

impl LocalBackend {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: &str,
        signing_key: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
        }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Create `name` if missing, or update its visibility.
    pub async fn ensure_bucket(&self, name: &str, public: bool) -> StoreResult<Bucket> {
        ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let now = Utc::now();
        let bucket = sqlx::query_as::<_, Bucket>(
            "INSERT INTO buckets (id, name, public, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                public = excluded.public,
                updated_at = excluded.updated_at
             RETURNING id, name, public, created_at, updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(public)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;

        info!("bucket {} ready (public: {})", bucket.name, bucket.public);
        Ok(bucket)
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Two-level shard directories from MD5(bucket/key).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, public, created_at, updated_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("bucket `{}` not found", bucket)))
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {} FROM objects WHERE bucket_id = ? AND key = ?",
            OBJECT_COLUMNS
        ))
        .bind(&bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Metadata plus an open payload handle, for serving an object.
    pub async fn open_object(&self, bucket: &str, key: &str) -> StoreResult<(ObjectRecord, File)> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let record = self
            .fetch_object(&bucket_rec, key)
            .await?
            .ok_or_else(|| object_not_found(bucket, key))?;

        let file = File::open(self.object_path(&bucket_rec.name, key))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => object_not_found(bucket, key),
                _ => StoreError::Io(err),
            })?;

        sqlx::query("UPDATE objects SET last_accessed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&record.id)
            .execute(&*self.db)
            .await?;

        Ok((record, file))
    }

    pub async fn is_public(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.fetch_bucket(bucket).await?.public)
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64) -> StoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|err| StoreError::Rejected(format!("invalid signing key: {}", err)))?;
        mac.update(format!("{}/{}:{}", bucket, key, expires).as_bytes());
        Ok(mac)
    }

    /// Token format: `<expires unix secs>.<base64url hmac>`.
    fn sign_token(&self, bucket: &str, key: &str, expires: i64) -> StoreResult<String> {
        let signature = self.mac(bucket, key, expires)?.finalize().into_bytes();
        Ok(format!("{}.{}", expires, URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Check a token from a signed URL: well formed, unexpired, and signed for this object.
    pub fn verify_token(&self, bucket: &str, key: &str, token: &str) -> bool {
        let Some((expires_raw, signature_raw)) = token.split_once('.') else {
            return false;
        };
        let Ok(expires) = expires_raw.parse::<i64>() else {
            return false;
        };
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_raw) else {
            return false;
        };
        match self.mac(bucket, key, expires) {
            Ok(mac) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        }
    }

    /// Write `body` to a temp file next to `file_path` and return the temp path.
    async fn stage_payload(&self, file_path: &Path, body: &Bytes) -> StoreResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written: io::Result<()> = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(tmp_path)
    }

    /// Rename `from` onto `to`. A payload already at `to` is parked beside it
    /// and its path returned, so the swap can be undone until metadata commits.
    async fn replace_payload(&self, from: &Path, to: &Path) -> io::Result<Option<PathBuf>> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        let parked = match fs::metadata(to).await {
            Ok(_) => {
                let parked = to.with_file_name(format!(".parked-{}", Uuid::new_v4()));
                fs::rename(to, &parked).await?;
                Some(parked)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };

        if let Err(err) = fs::rename(from, to).await {
            if let Some(parked) = &parked {
                restore_file(parked, to).await;
            }
            return Err(err);
        }
        Ok(parked)
    }

    /// Undo `replace_payload`: `to` goes back to `from`, the parked payload back to `to`.
    async fn restore_payload(&self, from: &Path, to: &Path, parked: Option<PathBuf>) {
        restore_file(to, from).await;
        if let Some(parked) = parked {
            restore_file(&parked, to).await;
        }
    }

    async fn discard_parked(&self, parked: Option<PathBuf>) {
        if let Some(parked) = parked {
            if let Err(err) = fs::remove_file(&parked).await {
                warn!("could not remove parked payload {}: {}", parked.display(), err);
            }
        }
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn remove_payload(&self, bucket_name: &str, key: &str) -> StoreResult<()> {
        let file_path = self.object_path(bucket_name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket_name))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalBackend {
    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        let buckets = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, public, created_at, updated_at FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        options: &ListOptions,
    ) -> StoreResult<Vec<ListedEntry>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let dir = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let rows: Vec<ObjectRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM objects
             WHERE bucket_id = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
            OBJECT_COLUMNS
        ))
        .bind(&bucket_rec.id)
        .bind(&dir)
        .bind(&dir)
        .fetch_all(&*self.db)
        .await?;

        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();
        for row in &rows {
            match compute_common_prefix(&row.key, &dir, "/") {
                Some(common) => {
                    folders.insert(common[dir.len()..].trim_end_matches('/').to_string());
                }
                None => entries.push(row.to_entry(&row.key[dir.len()..])),
            }
        }
        entries.extend(folders.into_iter().map(ListedEntry::folder));

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if !options.ascending {
            entries.reverse();
        }
        Ok(entries
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect())
    }

    /// Stage the payload, upsert the row, swap the payload in, then commit.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if !options.upsert && self.fetch_object(&bucket_rec, key).await?.is_some() {
            return Err(StoreError::AlreadyExists(
                "The resource already exists".into(),
            ));
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        let tmp_path = self.stage_payload(&file_path, &body).await?;

        let now = Utc::now();
        let etag = format!("{:x}", md5::compute(&body));
        let staged: StoreResult<_> = async {
            let mut tx = self.db.begin().await?;
            sqlx::query(
                "INSERT INTO objects (
                    id, bucket_id, key, content_type, cache_control, size_bytes,
                    etag, created_at, updated_at, last_accessed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(bucket_id, key) DO UPDATE SET
                    content_type = excluded.content_type,
                    cache_control = excluded.cache_control,
                    size_bytes = excluded.size_bytes,
                    etag = excluded.etag,
                    updated_at = excluded.updated_at,
                    last_accessed_at = excluded.last_accessed_at",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&bucket_rec.id)
            .bind(key)
            .bind(&options.content_type)
            .bind(&options.cache_control)
            .bind(body.len() as i64)
            .bind(&etag)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let parked = self.replace_payload(&tmp_path, &file_path).await?;
            Ok((tx, parked))
        }
        .await;

        // Until the row commits, a replaced payload stays parked and can be restored.
        let (tx, parked) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        if let Err(err) = tx.commit().await {
            self.restore_payload(&tmp_path, &file_path, parked).await;
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Sqlx(err));
        }
        self.discard_parked(parked).await;
        Ok(key.to_string())
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<Vec<ListedEntry>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let mut removed = Vec::new();

        for key in keys {
            let Some(record) = self.fetch_object(&bucket_rec, key).await? else {
                continue;
            };
            let result = sqlx::query("DELETE FROM objects WHERE id = ?")
                .bind(&record.id)
                .execute(&*self.db)
                .await?;
            if result.rows_affected() == 0 {
                continue;
            }
            self.remove_payload(&bucket_rec.name, key).await?;
            removed.push(record.to_entry(key));
        }
        Ok(removed)
    }

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> StoreResult<()> {
        ensure_key_safe(from)?;
        ensure_key_safe(to)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let record = self
            .fetch_object(&bucket_rec, from)
            .await?
            .ok_or_else(|| object_not_found(bucket, from))?;
        if from == to {
            return Ok(());
        }

        let source_path = self.object_path(&bucket_rec.name, from);
        let dest_path = self.object_path(&bucket_rec.name, to);

        // Metadata changes first; the payload moves only once they succeeded,
        // and the transaction commits only once the payload has moved.
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(&bucket_rec.id)
            .bind(to)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE objects SET key = ?, updated_at = ? WHERE id = ?")
            .bind(to)
            .bind(Utc::now())
            .bind(&record.id)
            .execute(&mut *tx)
            .await?;

        let parked = self.replace_payload(&source_path, &dest_path).await?;
        if let Err(err) = tx.commit().await {
            self.restore_payload(&source_path, &dest_path, parked).await;
            return Err(StoreError::Sqlx(err));
        }
        self.discard_parked(parked).await;

        if let Some(parent) = source_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(&bucket_rec.name))
                .await;
        }
        Ok(())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StoreResult<String> {
        ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if self.fetch_object(&bucket_rec, key).await?.is_none() {
            return Err(object_not_found(bucket, key));
        }

        let expires = i64::try_from(expires_in.as_secs())
            .ok()
            .and_then(|secs| Utc::now().timestamp().checked_add(secs))
            .ok_or_else(|| {
                StoreError::Rejected(format!(
                    "signed url lifetime of {}s is out of range",
                    expires_in.as_secs()
                ))
            })?;
        let token = self.sign_token(bucket, key, expires)?;
        Ok(format!(
            "{}/storage/v1/object/sign/{}/{}?token={}",
            self.public_base_url,
            urlencoding::encode(bucket),
            encode_key(key),
            token
        ))
    }

    async fn public_url(&self, bucket: &str, key: &str) -> StoreResult<Option<String>> {
        if !self.is_public(bucket).await? {
            return Ok(None);
        }
        Ok(Some(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.public_base_url,
            urlencoding::encode(bucket),
            encode_key(key)
        )))
    }
}

async fn restore_file(from: &Path, to: &Path) {
    if let Err(err) = fs::rename(from, to).await {
        warn!(
            "could not restore payload {} -> {}: {}",
            from.display(),
            to.display(),
            err
        );
    }
}

fn object_not_found(bucket: &str, key: &str) -> StoreError {
    StoreError::NotFound(format!("object `{}` not found in bucket `{}`", key, bucket))
}

/// Reject empty, oversized, absolute, or traversing keys.
fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(StoreError::Rejected(format!("invalid object key `{}`", key)));
    }
    Ok(())
}

/// S3-style bucket naming: 3–63 lowercase letters, digits, dots, hyphens;
/// alphanumeric at both ends; no `..`, `-.`, `.-`; not an IPv4 address.
fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let reason = if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
        Some("must be between 3 and 63 characters")
    } else if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        Some("allowed characters are lowercase letters, digits, dots, and hyphens")
    } else if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        Some("must start and end with a lowercase letter or digit")
    } else if name.contains("..") || name.contains("-.") || name.contains(".-") {
        Some("cannot contain consecutive dots or dot-hyphen combinations")
    } else if is_ipv4_like(name) {
        Some("must not be formatted like an IP address")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::Rejected(format!(
            "bucket `{}` invalid: {}",
            name, reason
        ))),
        None => Ok(()),
    }
}

/// The folder a key belongs to directly below `dir`, as `dir + segment + delimiter`.
///
/// Returns `None` for keys that are direct children of `dir`.
fn compute_common_prefix(key: &str, dir: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(dir)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::from(dir);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{GatewayError, StorageGateway, UploadFile};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn backend() -> (LocalBackend, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let backend = LocalBackend::new(
            Arc::new(pool),
            dir.path(),
            "http://localhost:3000/",
            "test-secret",
        );
        backend.migrate().await.unwrap();
        backend.ensure_bucket("attachments", false).await.unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn gateway_scenario_over_local_backend() {
        let (backend, _dir) = backend().await;
        let gateway = StorageGateway::new(Arc::new(backend.clone()));

        gateway
            .create_folder("attachments", "", "projects")
            .await
            .unwrap();
        let root = gateway.list_objects("attachments", "").await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "projects");
        assert!(root[0].is_folder);
        assert_eq!(root[0].path, "projects");
        assert!(root[0].size.is_none());

        assert!(gateway
            .list_objects("attachments", "projects")
            .await
            .unwrap()
            .is_empty());

        let file = UploadFile::new("a.png", Some("image/png".into()), Bytes::from_static(b"png!"));
        gateway
            .upload_file("attachments", "projects", file)
            .await
            .unwrap();
        let listed = gateway
            .list_objects("attachments", "projects")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "projects/a.png");
        assert!(!listed[0].is_folder);
        assert_eq!(listed[0].size, Some(4));

        let url = gateway
            .get_object_preview_url("attachments", "projects/a.png", 600)
            .await
            .unwrap();
        assert!(url.starts_with(
            "http://localhost:3000/storage/v1/object/sign/attachments/projects/a.png?token="
        ));

        gateway
            .delete_object("attachments", "projects/a.png")
            .await
            .unwrap();
        assert!(gateway
            .list_objects("attachments", "projects")
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            gateway.delete_object("attachments", "projects/a.png").await,
            Err(GatewayError::NothingDeleted(_))
        ));
    }

    #[tokio::test]
    async fn placeholder_upload_without_upsert_conflicts() {
        let (backend, _dir) = backend().await;
        let options = UploadOptions {
            content_type: "text/plain".into(),
            cache_control: "3600".into(),
            upsert: false,
        };
        backend
            .upload("attachments", "p/.keep", Bytes::new(), &options)
            .await
            .unwrap();
        let err = backend
            .upload("attachments", "p/.keep", Bytes::new(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn move_overwrites_destination_and_keeps_payload() {
        let (backend, _dir) = backend().await;
        let options = UploadOptions {
            content_type: "image/png".into(),
            cache_control: "3600".into(),
            upsert: true,
        };
        backend
            .upload("attachments", "a.png", Bytes::from_static(b"first"), &options)
            .await
            .unwrap();
        backend
            .upload("attachments", "b.png", Bytes::from_static(b"second"), &options)
            .await
            .unwrap();

        backend
            .move_object("attachments", "a.png", "b.png")
            .await
            .unwrap();

        let entries = backend
            .list("attachments", "", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b.png");
        assert_eq!(entries[0].metadata.as_ref().unwrap().size, Some(5));

        let (record, _file) = backend.open_object("attachments", "b.png").await.unwrap();
        assert_eq!(record.etag, format!("{:x}", md5::compute(b"first")));
    }

    async fn read_payload(backend: &LocalBackend, key: &str) -> Vec<u8> {
        let (_, mut file) = backend.open_object("attachments", key).await.unwrap();
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        body
    }

    async fn fail_object_updates(backend: &LocalBackend) {
        sqlx::query(
            "CREATE TRIGGER fail_object_updates BEFORE UPDATE ON objects
             BEGIN SELECT RAISE(ABORT, 'metadata store unavailable'); END",
        )
        .execute(&*backend.db)
        .await
        .unwrap();
    }

    async fn allow_object_updates(backend: &LocalBackend) {
        sqlx::query("DROP TRIGGER fail_object_updates")
            .execute(&*backend.db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_move_keeps_both_payloads() {
        let (backend, _dir) = backend().await;
        let options = UploadOptions {
            content_type: "image/png".into(),
            cache_control: "3600".into(),
            upsert: true,
        };
        for (key, body) in [("a.png", &b"first"[..]), ("b.png", &b"second"[..])] {
            backend
                .upload("attachments", key, Bytes::copy_from_slice(body), &options)
                .await
                .unwrap();
        }

        fail_object_updates(&backend).await;
        let err = backend
            .move_object("attachments", "a.png", "b.png")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlx(_)));
        allow_object_updates(&backend).await;

        assert_eq!(read_payload(&backend, "a.png").await, b"first");
        assert_eq!(read_payload(&backend, "b.png").await, b"second");
    }

    #[tokio::test]
    async fn failed_overwrite_keeps_previous_payload() {
        let (backend, _dir) = backend().await;
        let options = UploadOptions {
            content_type: "image/png".into(),
            cache_control: "3600".into(),
            upsert: true,
        };
        backend
            .upload("attachments", "a.png", Bytes::from_static(b"first"), &options)
            .await
            .unwrap();

        fail_object_updates(&backend).await;
        assert!(backend
            .upload("attachments", "a.png", Bytes::from_static(b"second"), &options)
            .await
            .is_err());
        allow_object_updates(&backend).await;

        assert_eq!(read_payload(&backend, "a.png").await, b"first");
        let entries = backend
            .list("attachments", "", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata.as_ref().unwrap().size, Some(5));
    }

    #[tokio::test]
    async fn out_of_range_signed_url_lifetime_is_rejected() {
        let (backend, _dir) = backend().await;
        let options = UploadOptions {
            content_type: "image/png".into(),
            cache_control: "3600".into(),
            upsert: true,
        };
        backend
            .upload("attachments", "a.png", Bytes::from_static(b"png!"), &options)
            .await
            .unwrap();

        for secs in [u64::MAX, i64::MAX as u64] {
            let err = backend
                .create_signed_url("attachments", "a.png", Duration::from_secs(secs))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Rejected(_)));
        }
    }

    #[tokio::test]
    async fn listing_synthesizes_nested_folders() {
        let (backend, _dir) = backend().await;
        let options = UploadOptions {
            content_type: "image/jpeg".into(),
            cache_control: "3600".into(),
            upsert: true,
        };
        for key in ["top.jpg", "projects/kitchen/1.jpg", "projects/kitchen/2.jpg", "projects/bath.jpg"] {
            backend
                .upload("attachments", key, Bytes::from_static(b"x"), &options)
                .await
                .unwrap();
        }

        let root = backend
            .list("attachments", "", &ListOptions::default())
            .await
            .unwrap();
        let names: Vec<(&str, bool)> = root
            .iter()
            .map(|e| (e.name.as_str(), e.id.is_none()))
            .collect();
        assert_eq!(names, vec![("projects", true), ("top.jpg", false)]);

        let nested = backend
            .list("attachments", "projects", &ListOptions::default())
            .await
            .unwrap();
        let names: Vec<&str> = nested.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bath.jpg", "kitchen"]);
    }

    #[tokio::test]
    async fn signed_tokens_are_bound_to_the_object() {
        let (backend, _dir) = backend().await;
        let expires = Utc::now().timestamp() + 60;
        let token = backend.sign_token("attachments", "a.png", expires).unwrap();

        assert!(backend.verify_token("attachments", "a.png", &token));
        assert!(!backend.verify_token("attachments", "b.png", &token));
        assert!(!backend.verify_token("other", "a.png", &token));
        assert!(!backend.verify_token("attachments", "a.png", "garbage"));

        let expired = backend
            .sign_token("attachments", "a.png", Utc::now().timestamp() - 1)
            .unwrap();
        assert!(!backend.verify_token("attachments", "a.png", &expired));
    }

    #[tokio::test]
    async fn public_urls_only_for_public_buckets() {
        let (backend, _dir) = backend().await;
        assert!(backend
            .public_url("attachments", "a.png")
            .await
            .unwrap()
            .is_none());

        backend.ensure_bucket("site-media", true).await.unwrap();
        assert_eq!(
            backend.public_url("site-media", "hero/a b.png").await.unwrap().as_deref(),
            Some("http://localhost:3000/storage/v1/object/public/site-media/hero/a%20b.png")
        );
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("attachments").is_ok());
        assert!(ensure_bucket_name_safe("ab").is_err());
        assert!(ensure_bucket_name_safe("Upper").is_err());
        assert!(ensure_bucket_name_safe("-edge").is_err());
        assert!(ensure_bucket_name_safe("a..b").is_err());
        assert!(ensure_bucket_name_safe("192.168.0.1").is_err());
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        assert!(ensure_key_safe("projects/a.png").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/abs").is_err());
        assert!(ensure_key_safe("a/../b").is_err());
    }

    #[test]
    fn common_prefix_only_for_nested_keys() {
        assert_eq!(
            compute_common_prefix("projects/kitchen/1.jpg", "projects/", "/").as_deref(),
            Some("projects/kitchen/")
        );
        assert_eq!(compute_common_prefix("projects/bath.jpg", "projects/", "/"), None);
        assert_eq!(compute_common_prefix("other/x.jpg", "projects/", "/"), None);
    }
}
