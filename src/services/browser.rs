//! StorageBrowser: state behind the admin storage manager.
//!
//! One instance per open manager. Handlers await their gateway calls one at a
//! time; only the preview preload fans out. A failed action leaves the
//! previous state in place and is reported through `message`, so nothing here
//! returns an error to the caller.

use crate::{
    models::{bucket::Bucket, item::StorageItem},
    services::{
        folders::{self, Breadcrumb},
        gateway::{DEFAULT_PREVIEW_TTL_SECS, GatewayResult, StorageGateway, UploadFile},
        preview_cache::PreviewCache,
    },
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// User-facing feedback for the last action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn is_error(&self) -> bool {
        self.kind == NoticeKind::Error
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenameTarget {
    pub path: String,
    pub draft: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenPreview {
    pub path: String,
    pub url: String,
}

/// Identifies one listing request. Only the most recently issued ticket may
/// update the listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingTicket {
    generation: u64,
    pub bucket: String,
    pub path: String,
}

pub struct StorageBrowser {
    gateway: Arc<StorageGateway>,
    buckets: Vec<Bucket>,
    selected_bucket: Option<String>,
    current_path: String,
    items: Vec<StorageItem>,
    new_folder_name: String,
    message: Option<Notice>,
    is_loading: bool,
    is_uploading: bool,
    renaming: Option<RenameTarget>,
    preview_cache: PreviewCache,
    preview: Option<OpenPreview>,
    listing_generation: u64,
}

impl StorageBrowser {
    pub fn new(gateway: Arc<StorageGateway>) -> Self {
        Self {
            gateway,
            buckets: Vec::new(),
            selected_bucket: None,
            current_path: String::new(),
            items: Vec::new(),
            new_folder_name: String::new(),
            message: None,
            is_loading: false,
            is_uploading: false,
            renaming: None,
            preview_cache: PreviewCache::new(),
            preview: None,
            listing_generation: 0,
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn selected_bucket(&self) -> Option<&str> {
        self.selected_bucket.as_deref()
    }

    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn items(&self) -> &[StorageItem] {
        &self.items
    }

    pub fn message(&self) -> Option<&Notice> {
        self.message.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// True while `upload` is awaiting the gateway.
    pub fn is_uploading(&self) -> bool {
        self.is_uploading
    }

    pub fn renaming(&self) -> Option<&RenameTarget> {
        self.renaming.as_ref()
    }

    pub fn preview_cache(&self) -> &PreviewCache {
        &self.preview_cache
    }

    pub fn open_preview(&self) -> Option<&OpenPreview> {
        self.preview.as_ref()
    }

    pub fn is_preview_open(&self) -> bool {
        self.preview.is_some()
    }

    pub fn new_folder_name(&self) -> &str {
        &self.new_folder_name
    }

    pub fn set_new_folder_name(&mut self, name: impl Into<String>) {
        self.new_folder_name = name.into();
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        folders::build_breadcrumbs(&self.current_path)
    }

    pub fn dismiss_message(&mut self) {
        self.message = None;
    }

    fn notify(&mut self, text: impl Into<String>) {
        self.message = Some(Notice {
            kind: NoticeKind::Info,
            text: text.into(),
        });
    }

    fn notify_error(&mut self, text: impl Into<String>) {
        self.message = Some(Notice {
            kind: NoticeKind::Error,
            text: text.into(),
        });
    }

    fn require_bucket(&mut self) -> Option<String> {
        let bucket = self.selected_bucket.clone();
        if bucket.is_none() {
            self.notify_error("Select a bucket first");
        }
        bucket
    }

    pub async fn load_buckets(&mut self) {
        self.is_loading = true;
        let result = self.gateway.list_buckets().await;
        self.is_loading = false;
        match result {
            Ok(buckets) => self.buckets = buckets,
            Err(err) => self.notify_error(format!("Failed to load buckets: {}", err)),
        }
    }

    pub async fn select_bucket(&mut self, bucket: impl Into<String>) {
        self.selected_bucket = Some(bucket.into());
        self.current_path.clear();
        self.items.clear();
        self.renaming = None;
        self.refresh().await;
    }

    pub async fn navigate(&mut self, path: &str) {
        if self.require_bucket().is_none() {
            return;
        }
        self.current_path = folders::normalize_path(path);
        self.renaming = None;
        self.refresh().await;
    }

    /// Start a listing of the current location. Any ticket issued earlier
    /// becomes stale.
    pub fn begin_listing(&mut self) -> Option<ListingTicket> {
        let bucket = self.selected_bucket.clone()?;
        self.listing_generation += 1;
        self.is_loading = true;
        Some(ListingTicket {
            generation: self.listing_generation,
            bucket,
            path: self.current_path.clone(),
        })
    }

    /// Apply a listing result. Returns `true` only when new items were stored.
    pub fn apply_listing(
        &mut self,
        ticket: ListingTicket,
        result: GatewayResult<Vec<StorageItem>>,
    ) -> bool {
        if ticket.generation != self.listing_generation {
            debug!(
                "discarding stale listing of {}/{}",
                ticket.bucket, ticket.path
            );
            return false;
        }

        self.is_loading = false;
        match result {
            Ok(items) => {
                self.items = items;
                true
            }
            Err(err) => {
                self.notify_error(format!("Failed to list objects: {}", err));
                false
            }
        }
    }

    /// Re-list the current location, then preload image previews.
    pub async fn refresh(&mut self) {
        let Some(ticket) = self.begin_listing() else {
            self.notify_error("Select a bucket first");
            return;
        };
        let result = self
            .gateway
            .list_objects(&ticket.bucket, &ticket.path)
            .await;
        if self.apply_listing(ticket, result) {
            self.preload_previews().await;
        }
    }

    pub async fn create_folder(&mut self) -> bool {
        let name = self.new_folder_name.trim().to_string();
        if name.is_empty() {
            self.notify_error("Folder name is required");
            return false;
        }
        let Some(bucket) = self.require_bucket() else {
            return false;
        };

        match self
            .gateway
            .create_folder(&bucket, &self.current_path, &name)
            .await
        {
            Ok(path) => {
                self.new_folder_name.clear();
                self.notify(format!("Folder \"{}\" created", path));
                self.refresh().await;
                true
            }
            Err(err) => {
                self.notify_error(format!("Failed to create folder: {}", err));
                false
            }
        }
    }

    /// Upload into the current location.
    ///
    /// `&mut self` already serialises uploads; `is_uploading` is only the
    /// flag a view reads to show progress while the request is awaited.
    pub async fn upload(&mut self, file: UploadFile) -> bool {
        let Some(bucket) = self.require_bucket() else {
            return false;
        };

        self.is_uploading = true;
        let result = self
            .gateway
            .upload_file(&bucket, &self.current_path, file)
            .await;
        self.is_uploading = false;

        match result {
            Ok(path) => {
                self.preview_cache.invalidate(&path);
                self.notify(format!("Uploaded \"{}\"", path));
                self.refresh().await;
                true
            }
            Err(err) => {
                self.notify_error(format!("Upload failed: {}", err));
                false
            }
        }
    }

    /// Confirmation text shown before deleting `item`.
    pub fn delete_prompt(item: &StorageItem) -> String {
        if item.is_folder {
            format!(
                "Delete folder \"{}\"? Only empty folders can be removed.",
                item.name
            )
        } else {
            format!("Delete file \"{}\"? This cannot be undone.", item.name)
        }
    }

    /// Delete `item` once `confirm` accepts the prompt.
    ///
    /// Folders are removed through their placeholder objects; whatever else
    /// lives under the prefix stays, and the backend decides the outcome.
    pub async fn delete<F>(&mut self, item: &StorageItem, confirm: F) -> bool
    where
        F: FnOnce(&str) -> bool,
    {
        if !confirm(&Self::delete_prompt(item)) {
            return false;
        }
        let Some(bucket) = self.require_bucket() else {
            return false;
        };

        let result = if item.is_folder {
            self.gateway.delete_folder(&bucket, &item.path).await
        } else {
            self.gateway.delete_object(&bucket, &item.path).await
        };

        match result {
            Ok(_) => {
                self.preview_cache.invalidate(&item.path);
                if self.preview.as_ref().is_some_and(|p| p.path == item.path) {
                    self.preview = None;
                }
                self.notify(format!("Deleted \"{}\"", item.name));
                self.refresh().await;
                true
            }
            Err(err) => {
                self.notify_error(format!("Failed to delete \"{}\": {}", item.name, err));
                false
            }
        }
    }

    /// Open the inline rename editor. Folders cannot be renamed.
    pub fn begin_rename(&mut self, item: &StorageItem) -> bool {
        if item.is_folder {
            self.notify_error("Folders cannot be renamed");
            return false;
        }
        self.renaming = Some(RenameTarget {
            path: item.path.clone(),
            draft: item.name.clone(),
        });
        true
    }

    pub fn set_rename_draft(&mut self, draft: impl Into<String>) {
        if let Some(target) = self.renaming.as_mut() {
            target.draft = draft.into();
        }
    }

    pub fn cancel_rename(&mut self) {
        self.renaming = None;
    }

    pub async fn rename(&mut self, item: &StorageItem, new_name: &str) -> bool {
        if item.is_folder {
            self.notify_error("Folders cannot be renamed");
            return false;
        }
        let new_name = new_name.trim();
        if new_name.is_empty() || new_name.contains('/') {
            self.notify_error("Enter a new file name without slashes");
            return false;
        }
        let Some(bucket) = self.require_bucket() else {
            return false;
        };

        let destination = folders::rename_destination(&item.path, new_name);
        if destination == item.path {
            self.renaming = None;
            return true;
        }

        match self
            .gateway
            .move_object(&bucket, &item.path, &destination)
            .await
        {
            Ok(dest) => {
                self.renaming = None;
                self.preview_cache.invalidate(&item.path);
                self.preview_cache.invalidate(&dest);
                self.notify(format!("Renamed to \"{}\"", new_name));
                self.refresh().await;
                true
            }
            Err(err) => {
                self.notify_error(format!("Rename failed: {}", err));
                false
            }
        }
    }

    /// Open the preview modal for an image, fetching a signed URL on a cache miss.
    pub async fn preview(&mut self, item: &StorageItem) -> bool {
        if !folders::is_image_item(item) {
            self.notify_error("Only images can be previewed");
            return false;
        }

        let url = match self.preview_cache.get(&item.path) {
            Some(url) => url.to_string(),
            None => {
                let Some(bucket) = self.require_bucket() else {
                    return false;
                };
                match self
                    .gateway
                    .get_object_preview_url(&bucket, &item.path, DEFAULT_PREVIEW_TTL_SECS)
                    .await
                {
                    Ok(url) => {
                        self.preview_cache.insert(item.path.clone(), url.clone());
                        url
                    }
                    Err(err) => {
                        self.notify_error(format!("Preview failed: {}", err));
                        return false;
                    }
                }
            }
        };

        self.preview = Some(OpenPreview {
            path: item.path.clone(),
            url,
        });
        true
    }

    pub fn close_preview(&mut self) {
        self.preview = None;
    }

    /// Sign every uncached image of the listing concurrently.
    ///
    /// Successful URLs are cached even when some fetches fail; the first
    /// failure becomes the message.
    pub async fn preload_previews(&mut self) {
        let Some(bucket) = self.selected_bucket.clone() else {
            return;
        };
        let pending: Vec<String> = self
            .preview_cache
            .missing_images(&self.items)
            .into_iter()
            .map(|item| item.path.clone())
            .collect();
        if pending.is_empty() {
            return;
        }

        let fetches = pending.into_iter().map(|path| {
            let gateway = Arc::clone(&self.gateway);
            let bucket = bucket.clone();
            async move {
                let result = gateway
                    .get_object_preview_url(&bucket, &path, DEFAULT_PREVIEW_TTL_SECS)
                    .await;
                (path, result)
            }
        });
        let results = join_all(fetches).await;

        let mut fetched = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (path, result) in results {
            match result {
                Ok(url) => fetched.push((path, url)),
                Err(err) => {
                    warn!("preloading preview of {}/{} failed: {}", bucket, path, err);
                    first_error.get_or_insert_with(|| {
                        format!("Failed to load preview for \"{}\": {}", path, err)
                    });
                }
            }
        }
        debug!("preloaded {} previews in {}", fetched.len(), bucket);
        self.preview_cache.merge(fetched);

        if let Some(text) = first_error {
            self.notify_error(text);
        }
    }
}
