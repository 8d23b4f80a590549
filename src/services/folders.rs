//! Folder semantics over a flat key space.
//!
//! The backend only knows keys such as `projects/kitchen/a.png`. Folders are
//! made visible by zero-byte placeholder objects and recognised in listings by
//! their missing identifier. Everything here is pure so it can be tested
//! without a backend.

use crate::models::item::{ListedEntry, StorageItem};
use serde::Serialize;
use std::cmp::Ordering;

/// Name of the marker object written by `create_folder`.
pub const FOLDER_PLACEHOLDER: &str = ".keep";

/// Marker names that are never shown in a listing.
pub const PLACEHOLDER_NAMES: [&str; 2] = [FOLDER_PLACEHOLDER, ".emptyFolderPlaceholder"];

pub const IMAGE_EXTENSIONS: [&str; 12] = [
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "tif", "tiff", "heic", "heif", "avif",
];

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Breadcrumb {
    pub label: String,
    pub path: String,
}

/// Trim leading and trailing `/` from a key or prefix.
pub fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Join a (possibly empty) directory path and a child name.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    let name = name.trim_matches('/');
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, name),
    }
}

/// A listing entry without an identifier is a synthesized directory.
pub fn derive_is_folder(entry: &ListedEntry) -> bool {
    entry.id.is_none()
}

pub fn is_placeholder(name: &str) -> bool {
    PLACEHOLDER_NAMES.contains(&name)
}

/// Turn a raw listing entry under `parent` into a browser item.
pub fn to_storage_item(entry: ListedEntry, parent: &str) -> StorageItem {
    let is_folder = derive_is_folder(&entry);
    let size = if is_folder {
        None
    } else {
        entry.metadata.as_ref().and_then(|m| m.size)
    };
    let path = join_path(parent, &entry.name);

    StorageItem {
        id: entry.id,
        name: entry.name,
        created_at: entry.created_at,
        updated_at: entry.updated_at,
        last_accessed_at: entry.last_accessed_at,
        size,
        metadata: entry.metadata,
        is_folder,
        path,
    }
}

/// Folders first, then by name.
pub fn sort_items(items: &mut [StorageItem]) {
    items.sort_by(|a, b| match (a.is_folder, b.is_folder) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Breadcrumb trail for `current_path`, always starting at the bucket root.
pub fn build_breadcrumbs(current_path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        label: "Root".into(),
        path: String::new(),
    }];

    let mut prefix = String::new();
    for segment in current_path.split('/').filter(|s| !s.is_empty()) {
        prefix = join_path(&prefix, segment);
        crumbs.push(Breadcrumb {
            label: segment.to_string(),
            path: prefix.clone(),
        });
    }
    crumbs
}

/// Whether the item can be previewed as an image.
///
/// The declared MIME type wins; the file extension is the fallback.
pub fn is_image_item(item: &StorageItem) -> bool {
    if item.is_folder {
        return false;
    }

    if let Some(mimetype) = item.metadata.as_ref().and_then(|m| m.mimetype.as_deref()) {
        return mimetype
            .get(..6)
            .is_some_and(|p| p.eq_ignore_ascii_case("image/"));
    }

    match item.name.rsplit_once('.') {
        Some((_, ext)) => IMAGE_EXTENSIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Destination key for renaming `path` to `new_name` in the same directory.
pub fn rename_destination(path: &str, new_name: &str) -> String {
    let path = path.trim_matches('/');
    match path.rsplit_once('/') {
        Some((parent, _)) => join_path(parent, new_name),
        None => join_path("", new_name),
    }
}
