//! Admin storage endpoints.
//!
//! Used by the storage manager and by the image picker inside the rich-text
//! editors. Every handler is a thin shell around `StorageGateway`; access
//! control happens in front of this service.

use crate::{
    AppState,
    errors::AppError,
    models::{bucket::Bucket, item::StorageItem},
    services::gateway::{DEFAULT_PREVIEW_TTL_SECS, UploadFile},
};
use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    pub bucket: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectQuery {
    pub bucket: Option<String>,
    pub path: Option<String>,
    pub ttl: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub bucket: String,
    #[serde(default)]
    pub path: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveReq {
    pub bucket: String,
    pub source: String,
    pub destination: String,
}

/// `GET /api/admin/storage` answers with one of the two shapes.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BrowseResponse {
    Buckets { buckets: Vec<Bucket> },
    Items { items: Vec<StorageItem> },
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub path: String,
}

/// Both `bucket` and `path` must be present and non-blank.
fn object_target(
    bucket: Option<String>,
    path: Option<String>,
) -> Result<(String, String), AppError> {
    match (bucket, path) {
        (Some(bucket), Some(path)) if !bucket.trim().is_empty() && !path.trim().is_empty() => {
            Ok((bucket, path))
        }
        _ => Err(AppError::bad_request("bucket and path are required")),
    }
}

/// `GET /api/admin/storage`: buckets without `bucket`, otherwise the
/// children of `path` inside it.
pub async fn browse(
    State(state): State<AppState>,
    Query(q): Query<BrowseQuery>,
) -> Result<Json<BrowseResponse>, AppError> {
    match q.bucket.filter(|b| !b.trim().is_empty()) {
        None => {
            let buckets = state.gateway.list_buckets().await?;
            Ok(Json(BrowseResponse::Buckets { buckets }))
        }
        Some(bucket) => {
            let path = q.path.unwrap_or_default();
            let items = state.gateway.list_objects(&bucket, &path).await?;
            Ok(Json(BrowseResponse::Items { items }))
        }
    }
}

/// `GET /api/admin/storage/public-url?bucket=&path=`
pub async fn public_url(
    State(state): State<AppState>,
    Query(q): Query<ObjectQuery>,
) -> Result<Json<UrlResponse>, AppError> {
    let (bucket, path) = object_target(q.bucket, q.path)?;
    let url = state.gateway.get_object_public_url(&bucket, &path).await?;
    Ok(Json(UrlResponse { url }))
}

/// `GET /api/admin/storage/preview-url?bucket=&path=&ttl=`
pub async fn preview_url(
    State(state): State<AppState>,
    Query(q): Query<ObjectQuery>,
) -> Result<Json<UrlResponse>, AppError> {
    let (bucket, path) = object_target(q.bucket, q.path)?;
    let ttl = q.ttl.unwrap_or(DEFAULT_PREVIEW_TTL_SECS);
    let url = state
        .gateway
        .get_object_preview_url(&bucket, &path, ttl)
        .await?;
    Ok(Json(UrlResponse { url }))
}

/// `POST /api/admin/storage/folders`
pub async fn create_folder(
    State(state): State<AppState>,
    Json(req): Json<CreateFolderReq>,
) -> Result<Json<PathResponse>, AppError> {
    let path = state
        .gateway
        .create_folder(&req.bucket, &req.path, &req.name)
        .await?;
    Ok(Json(PathResponse { path }))
}

/// `POST /api/admin/storage/upload`: multipart fields `bucket`, `path`, `file`.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PathResponse>, AppError> {
    let mut bucket = None;
    let mut path = String::new();
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("bucket") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text()))?;
                bucket = Some(text);
            }
            Some("path") => {
                path = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text()))?;
            }
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text()))?;
                file = Some(UploadFile::new(name, content_type, bytes));
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    let bucket = bucket.ok_or_else(|| AppError::bad_request("bucket is required"))?;
    let file = file.ok_or_else(|| AppError::bad_request("no file provided"))?;
    let path = state.gateway.upload_file(&bucket, &path, file).await?;
    Ok(Json(PathResponse { path }))
}

/// `POST /api/admin/storage/move`
pub async fn move_object(
    State(state): State<AppState>,
    Json(req): Json<MoveReq>,
) -> Result<Json<PathResponse>, AppError> {
    let path = state
        .gateway
        .move_object(&req.bucket, &req.source, &req.destination)
        .await?;
    Ok(Json(PathResponse { path }))
}

/// `DELETE /api/admin/storage?bucket=&path=`
pub async fn delete_object(
    State(state): State<AppState>,
    Query(q): Query<BrowseQuery>,
) -> Result<Json<PathResponse>, AppError> {
    let (bucket, path) = object_target(q.bucket, q.path)?;
    let path = state.gateway.delete_object(&bucket, &path).await?;
    Ok(Json(PathResponse { path }))
}
