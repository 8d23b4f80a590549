//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, never touches storage
//! - GET /readyz   -> storage reachable, plus disk I/O for the local backend

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, fmt::Display, path::Path};
use tokio::fs;
use uuid::Uuid;

const SCRATCH_BYTES: &[u8] = b"readyz";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result<T, E: Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Self {
                ok: true,
                error: None,
            },
            Err(err) => Self {
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// `storage` lists buckets through the gateway, so it fails while storage is
/// unconfigured or unreachable. `disk` is only reported for the local backend.
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert(
        "storage",
        CheckStatus::from_result(state.gateway.list_buckets().await),
    );
    if let Some(local) = state.local.as_ref() {
        checks.insert(
            "disk",
            CheckStatus::from_result(check_disk(&local.base_path).await),
        );
    }

    let ready = checks.values().all(|check| check.ok);
    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

/// Write, read back and remove a scratch file under `base_path`.
async fn check_disk(base_path: &Path) -> Result<(), String> {
    let scratch = base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&scratch, SCRATCH_BYTES)
        .await
        .map_err(|e| format!("could not write scratch file: {}", e))?;

    let read = fs::read(&scratch).await;
    let removed = fs::remove_file(&scratch).await;
    match read {
        Ok(bytes) if bytes == SCRATCH_BYTES => {}
        Ok(_) => return Err("scratch file content mismatch".into()),
        Err(e) => return Err(format!("could not read scratch file: {}", e)),
    }
    removed.map_err(|e| format!("could not remove scratch file: {}", e))
}
