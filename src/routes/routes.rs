//! Defines routes for the admin storage API.
//!
//! ## Structure
//! - **Admin storage endpoints**
//!   - `GET    /api/admin/storage`: list buckets, or objects with `?bucket=&path=`
//!   - `DELETE /api/admin/storage`: delete `?bucket=&path=`
//!   - `GET    /api/admin/storage/public-url`: public (or long-lived signed) URL
//!   - `GET    /api/admin/storage/preview-url`: short-lived signed URL
//!   - `POST   /api/admin/storage/folders`: create folder
//!   - `POST   /api/admin/storage/upload`: multipart upload
//!   - `POST   /api/admin/storage/move`: rename / move
//!
//! - **Object serving (local backend)**
//!   - `GET /storage/v1/object/sign/{bucket}/{*key}`
//!   - `GET /storage/v1/object/public/{bucket}/{*key}`
//!
//! The wildcard `*key` allows nested keys like `projects/kitchen/a.jpg`.

use crate::{
    AppState,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_public_object, get_signed_object},
        storage_handlers::{
            browse, create_folder, delete_object, move_object, preview_url, public_url, upload,
        },
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest multipart upload accepted, in bytes.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build the router carrying `AppState` to every handler.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Admin storage routes
        .route("/api/admin/storage", get(browse).delete(delete_object))
        .route("/api/admin/storage/public-url", get(public_url))
        .route("/api/admin/storage/preview-url", get(preview_url))
        .route("/api/admin/storage/folders", post(create_folder))
        .route(
            "/api/admin/storage/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/admin/storage/move", post(move_object))
        // Object serving routes
        .route(
            "/storage/v1/object/sign/{bucket}/{*key}",
            get(get_signed_object),
        )
        .route(
            "/storage/v1/object/public/{bucket}/{*key}",
            get(get_public_object),
        )
}
