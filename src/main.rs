use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use storage_admin::{
    AppState, app,
    config::{AppConfig, BackendKind},
    services::{gateway::StorageGateway, local_backend::LocalBackend, rest_backend::RestBackend},
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting storage-admin with config: {:?}", cfg);

    let local = match cfg.backend {
        BackendKind::Local => Some(open_local_backend(&cfg).await?),
        BackendKind::Rest => None,
    };

    // --- Schema is idempotent; --migrate applies it and exits ---
    if let Some(local) = local.as_ref() {
        local.migrate().await?;
    }
    if migrate {
        if local.is_none() {
            anyhow::bail!("--migrate only applies to the local backend");
        }
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    if let Some(local) = local.as_ref() {
        for (name, public) in &cfg.buckets {
            local
                .ensure_bucket(name, *public)
                .await
                .with_context(|| format!("provisioning bucket `{}`", name))?;
        }
    }

    // --- Initialize gateway ---
    let gateway = build_gateway(&cfg, local.clone())?;
    let state = AppState {
        gateway: Arc::new(gateway),
        local,
    };

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Missing URL or key leaves the gateway unconfigured rather than failing startup.
fn build_gateway(cfg: &AppConfig, local: Option<LocalBackend>) -> Result<StorageGateway> {
    if let Some(reason) = cfg.storage.missing() {
        tracing::warn!("storage gateway unconfigured: {}", reason);
        return Ok(StorageGateway::unconfigured(reason));
    }

    let gateway = match local {
        Some(local) => StorageGateway::new(Arc::new(local)),
        None => {
            let (Some(url), Some(key)) = (&cfg.storage.base_url, &cfg.storage.service_key) else {
                return Ok(StorageGateway::unconfigured("storage settings incomplete"));
            };
            let rest = RestBackend::new(url, key, Duration::from_secs(cfg.http_timeout_secs))
                .context("building storage HTTP client")?;
            StorageGateway::new(Arc::new(rest))
        }
    };
    Ok(gateway)
}

/// Open the SQLite metadata pool and payload directory for the local backend.
async fn open_local_backend(cfg: &AppConfig) -> Result<LocalBackend> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    let base_url = cfg
        .storage
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://{}", cfg.addr()));
    let signing_key = cfg.storage.service_key.clone().unwrap_or_default();

    Ok(LocalBackend::new(
        Arc::new(db),
        &cfg.storage_dir,
        &base_url,
        signing_key,
    ))
}
