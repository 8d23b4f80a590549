use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::env;

/// Environment variables checked, in order, for the service-role key.
pub const SERVICE_KEY_VARS: [&str; 3] = [
    "SUPABASE_SERVICE_ROLE_KEY",
    "SUPABASE_SERVICE_KEY",
    "SERVICE_ROLE_KEY",
];
pub const STORAGE_URL_VAR: &str = "SUPABASE_URL";

/// Which `ObjectStore` implementation backs the gateway.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// The managed storage REST API.
    Rest,
    /// SQLite + local disk served by this process.
    Local,
}

/// Where the storage API lives and how to authenticate against it.
///
/// Either value may be missing; the gateway then reports the configuration
/// error on every call instead of refusing to start.
#[derive(Clone, Default)]
pub struct StorageSettings {
    pub base_url: Option<String>,
    pub service_key: Option<String>,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("base_url", &self.base_url)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StorageSettings {
    /// Description of whatever is missing, or `None` when complete.
    pub fn missing(&self) -> Option<String> {
        let mut missing = Vec::new();
        if self.base_url.is_none() {
            missing.push(format!("storage URL ({})", STORAGE_URL_VAR));
        }
        if self.service_key.is_none() {
            missing.push(format!(
                "service role key ({})",
                SERVICE_KEY_VARS.join(", ")
            ));
        }
        if missing.is_empty() {
            None
        } else {
            Some(format!("missing {}", missing.join(" and ")))
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage: StorageSettings,
    pub storage_dir: String,
    pub database_url: String,
    pub http_timeout_secs: u64,
    /// Buckets the local backend provisions at startup, with their visibility.
    pub buckets: Vec<(String, bool)>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Admin storage browser API")]
pub struct Args {
    /// Host to bind to (overrides STORAGE_ADMIN_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides STORAGE_ADMIN_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides STORAGE_ADMIN_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Storage API base URL (overrides SUPABASE_URL)
    #[arg(long)]
    pub storage_url: Option<String>,

    /// Directory for local object payloads (overrides STORAGE_ADMIN_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Local metadata database URL (overrides STORAGE_ADMIN_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Private bucket to provision on the local backend (repeatable)
    #[arg(long = "bucket")]
    pub buckets: Vec<String>,

    /// Public bucket to provision on the local backend (repeatable)
    #[arg(long = "public-bucket")]
    pub public_buckets: Vec<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        let env_host = env::var("STORAGE_ADMIN_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("STORAGE_ADMIN_PORT", 3000u16)?;
        let env_backend = match env::var("STORAGE_ADMIN_BACKEND") {
            Ok(value) => BackendKind::from_str(&value, true).map_err(|err| {
                anyhow::anyhow!("parsing STORAGE_ADMIN_BACKEND value `{}`: {}", value, err)
            })?,
            Err(_) => BackendKind::Rest,
        };
        let env_storage =
            env::var("STORAGE_ADMIN_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("STORAGE_ADMIN_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/storage_admin.db".into());
        let http_timeout_secs = parse_env("STORAGE_ADMIN_HTTP_TIMEOUT_SECS", 30u64)?;

        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let backend = args.backend.unwrap_or(env_backend);

        let base_url = args
            .storage_url
            .or_else(|| non_empty_var(STORAGE_URL_VAR))
            .or_else(|| {
                (backend == BackendKind::Local).then(|| format!("http://{}:{}", host, port))
            });
        let service_key = SERVICE_KEY_VARS.iter().find_map(|name| non_empty_var(name));

        let buckets = args
            .buckets
            .into_iter()
            .map(|name| (name, false))
            .chain(args.public_buckets.into_iter().map(|name| (name, true)))
            .collect();

        Ok(Self {
            host,
            port,
            backend,
            storage: StorageSettings {
                base_url,
                service_key,
            },
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            http_timeout_secs,
            buckets,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_name_every_variable() {
        let settings = StorageSettings::default();
        let missing = settings.missing().unwrap();
        assert!(missing.contains(STORAGE_URL_VAR));
        for name in SERVICE_KEY_VARS {
            assert!(missing.contains(name));
        }

        let complete = StorageSettings {
            base_url: Some("https://example.test".into()),
            service_key: Some("secret".into()),
        };
        assert!(complete.missing().is_none());
    }

    #[test]
    fn debug_output_redacts_service_key() {
        let settings = StorageSettings {
            base_url: None,
            service_key: Some("super-secret".into()),
        };
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn cli_flags_collect_buckets() {
        let args = Args::parse_from([
            "storage-admin",
            "--backend",
            "local",
            "--port",
            "4010",
            "--bucket",
            "attachments",
            "--public-bucket",
            "site-media",
        ]);
        assert_eq!(args.backend, Some(BackendKind::Local));
        assert_eq!(args.port, Some(4010));
        assert_eq!(args.buckets, vec!["attachments".to_string()]);
        assert_eq!(args.public_buckets, vec!["site-media".to_string()]);
    }
}
