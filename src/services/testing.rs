//! In-memory `ObjectStore` used by unit tests.

use crate::{
    models::{
        bucket::Bucket,
        item::{ItemMetadata, ListedEntry},
    },
    services::backend::{ListOptions, ObjectStore, StoreError, StoreResult, UploadOptions},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Clone)]
struct StoredObject {
    id: String,
    content_type: String,
    body: Bytes,
}

#[derive(Default)]
pub struct MemoryStore {
    buckets: HashMap<String, bool>,
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    unsignable: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    moves: AtomicUsize,
    next_id: AtomicUsize,
}

impl MemoryStore {
    pub fn with_buckets(buckets: &[(&str, bool)]) -> Self {
        Self {
            buckets: buckets
                .iter()
                .map(|(name, public)| (name.to_string(), *public))
                .collect(),
            ..Default::default()
        }
    }

    /// Make signing `key` fail.
    pub fn refuse_signing(&self, key: &str) {
        self.unsignable.lock().unwrap().insert(key.to_string());
    }

    /// Total number of backend calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn move_count(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_bucket(&self, bucket: &str) -> StoreResult<bool> {
        self.buckets
            .get(bucket)
            .copied()
            .ok_or_else(|| StoreError::NotFound("Bucket not found".into()))
    }

    fn entry(name: &str, object: &StoredObject) -> ListedEntry {
        ListedEntry {
            id: Some(object.id.clone()),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            last_accessed_at: Some(Utc::now()),
            metadata: Some(ItemMetadata {
                mimetype: Some(object.content_type.clone()),
                size: Some(object.body.len() as u64),
                ..Default::default()
            }),
            ..ListedEntry::folder(name)
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        self.record();
        let now = Utc::now();
        let mut buckets: Vec<Bucket> = self
            .buckets
            .iter()
            .map(|(name, public)| Bucket {
                id: name.clone(),
                name: name.clone(),
                public: *public,
                created_at: now,
                updated_at: now,
            })
            .collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        _options: &ListOptions,
    ) -> StoreResult<Vec<ListedEntry>> {
        self.record();
        self.check_bucket(bucket)?;
        let dir = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let objects = self.objects.lock().unwrap();
        let mut folders = BTreeSet::new();
        let mut files = Vec::new();
        for ((b, key), object) in objects.iter() {
            if b != bucket {
                continue;
            }
            let Some(rest) = key.strip_prefix(&dir) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(folder.to_string());
                }
                None => files.push(Self::entry(rest, object)),
            }
        }

        let mut entries: Vec<ListedEntry> =
            folders.into_iter().map(ListedEntry::folder).collect();
        entries.extend(files);
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String> {
        self.record();
        self.check_bucket(bucket)?;
        let mut objects = self.objects.lock().unwrap();
        let slot = (bucket.to_string(), key.to_string());
        if !options.upsert && objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists("The resource already exists".into()));
        }
        let id = format!("obj-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        objects.insert(
            slot,
            StoredObject {
                id,
                content_type: options.content_type.clone(),
                body,
            },
        );
        Ok(key.to_string())
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<Vec<ListedEntry>> {
        self.record();
        self.check_bucket(bucket)?;
        let mut objects = self.objects.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| {
                objects
                    .remove(&(bucket.to_string(), key.clone()))
                    .map(|object| Self::entry(key, &object))
            })
            .collect())
    }

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> StoreResult<()> {
        self.record();
        self.moves.fetch_add(1, Ordering::SeqCst);
        self.check_bucket(bucket)?;
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .remove(&(bucket.to_string(), from.to_string()))
            .ok_or_else(|| StoreError::NotFound("Object not found".into()))?;
        objects.insert((bucket.to_string(), to.to_string()), object);
        Ok(())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StoreResult<String> {
        self.record();
        self.check_bucket(bucket)?;
        if self.unsignable.lock().unwrap().contains(key) {
            return Err(StoreError::Rejected(format!("cannot sign {}", key)));
        }
        if !self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
        {
            return Err(StoreError::NotFound("Object not found".into()));
        }
        Ok(format!(
            "memory://sign/{}/{}?expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }

    async fn public_url(&self, bucket: &str, key: &str) -> StoreResult<Option<String>> {
        self.record();
        let public = self.check_bucket(bucket)?;
        Ok(public.then(|| format!("memory://public/{}/{}", bucket, key)))
    }
}
