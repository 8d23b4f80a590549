//! Represents a bucket, a named top-level container in the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A storage bucket as reported by the backend.
///
/// Buckets are provisioned outside the admin browser; this crate only lists
/// them (the local backend can provision them at startup).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Bucket {
    /// Backend identifier (the managed API uses the bucket name).
    pub id: String,

    /// Bucket name used in every object operation.
    pub name: String,

    /// Whether objects can be read through a permanent public URL.
    pub public: bool,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// When this bucket was last changed.
    pub updated_at: DateTime<Utc>,
}
