//! Signed preview URLs already fetched by a browser instance.
//!
//! Entries live as long as the browser. Expiry is enforced by the backend,
//! so a cached URL may go stale; it is only dropped when the object behind it
//! is deleted or renamed.

use crate::{models::item::StorageItem, services::folders};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct PreviewCache {
    entries: HashMap<String, String>,
}

impl PreviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(path.into(), url.into());
    }

    pub fn merge<I>(&mut self, fetched: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.entries.extend(fetched);
    }

    pub fn invalidate(&mut self, path: &str) -> Option<String> {
        self.entries.remove(path)
    }

    /// Image items of `items` that have no cached URL yet.
    pub fn missing_images<'a>(&self, items: &'a [StorageItem]) -> Vec<&'a StorageItem> {
        items
            .iter()
            .filter(|item| folders::is_image_item(item) && !self.contains(&item.path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::ListedEntry;

    fn item(name: &str, folder: bool) -> StorageItem {
        let mut entry = ListedEntry::folder(name);
        if !folder {
            entry.id = Some(name.into());
        }
        folders::to_storage_item(entry, "projects")
    }

    #[test]
    fn only_uncached_images_are_missing() {
        let items = vec![
            item("a.png", false),
            item("b.jpg", false),
            item("notes.txt", false),
            item("gallery.png", true),
        ];
        let mut cache = PreviewCache::new();
        cache.insert("projects/a.png", "https://signed/a");

        let missing: Vec<&str> = cache
            .missing_images(&items)
            .iter()
            .map(|i| i.path.as_str())
            .collect();
        assert_eq!(missing, vec!["projects/b.jpg"]);
    }

    #[test]
    fn merge_and_invalidate() {
        let mut cache = PreviewCache::new();
        cache.merge(vec![
            ("a".to_string(), "u1".to_string()),
            ("b".to_string(), "u2".to_string()),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some("u1"));

        assert_eq!(cache.invalidate("a").as_deref(), Some("u1"));
        assert!(!cache.contains("a"));
        assert!(cache.invalidate("a").is_none());
    }
}
