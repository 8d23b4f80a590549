//! Object download endpoints for the local backend.
//!
//! Signed and public URLs minted by `LocalBackend` point here. Bodies are
//! streamed from disk. With the REST backend these routes answer 404 because
//! the managed service serves its own URLs.

use crate::{
    AppState,
    errors::AppError,
    services::local_backend::{LocalBackend, ObjectRecord},
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub token: Option<String>,
}

fn local_backend(state: &AppState) -> Result<&LocalBackend, AppError> {
    state
        .local
        .as_ref()
        .ok_or_else(|| AppError::not_found("object serving is disabled for this backend"))
}

/// `GET /storage/v1/object/sign/{bucket}/{*key}?token=`
pub async fn get_signed_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    let backend = local_backend(&state)?;
    let token = q.token.unwrap_or_default();
    if !backend.verify_token(&bucket, &key, &token) {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid or expired signature",
        ));
    }
    stream_object(backend, &bucket, &key).await
}

/// `GET /storage/v1/object/public/{bucket}/{*key}`
pub async fn get_public_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let backend = local_backend(&state)?;
    if !backend.is_public(&bucket).await? {
        return Err(AppError::not_found(format!("bucket `{}` not found", bucket)));
    }
    stream_object(backend, &bucket, &key).await
}

async fn stream_object(backend: &LocalBackend, bucket: &str, key: &str) -> Result<Response, AppError> {
    let (meta, file) = backend.open_object(bucket, key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", meta.cache_control)) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.updated_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
