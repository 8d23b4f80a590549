//! Listing entries and the browser-facing storage item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Object metadata reported by the backend.
///
/// Only `mimetype` and `size` are interpreted; everything else the backend
/// sends (etag, cache control, ...) is kept untouched in `extra`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of a flat, non-recursive listing as the storage API returns it.
///
/// Synthesized directories come back with a null `id` and no metadata.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ListedEntry {
    pub name: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Option<ItemMetadata>,
}

impl ListedEntry {
    /// A synthesized folder entry.
    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            created_at: None,
            updated_at: None,
            last_accessed_at: None,
            metadata: None,
        }
    }
}

/// A file or folder as shown by the storage browser.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StorageItem {
    pub id: Option<String>,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Always `None` for folders.
    pub size: Option<u64>,

    pub metadata: Option<ItemMetadata>,

    #[serde(rename = "isFolder")]
    pub is_folder: bool,

    /// Full key relative to the bucket root, without leading or trailing `/`.
    pub path: String,
}
