use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BucketError, BucketStore, ObjectLocation};

/// In-process store keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    objects: Mutex<BTreeMap<(String, String), Bytes>>,
    read_only_buckets: Mutex<HashSet<String>>,
    write_budget: Mutex<Option<usize>>,
    operations: AtomicUsize,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write to `bucket` with an access-denied error.
    pub fn deny_writes_to(self, bucket: impl Into<String>) -> Self {
        self.read_only_guard().insert(bucket.into());
        self
    }

    /// Let the next `writes` puts or copies succeed, then fail every later one.
    pub fn fail_writes_after(self, writes: usize) -> Self {
        *self.write_budget_guard() = Some(writes);
        self
    }

    pub fn insert(&self, location: &ObjectLocation, bytes: impl Into<Bytes>) {
        self.objects_guard().insert(
            (location.bucket().to_string(), location.key().to_string()),
            bytes.into(),
        );
    }

    /// Number of trait calls served so far; seeding via `insert` is not counted.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects_guard()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn objects_guard(&self) -> MutexGuard<'_, BTreeMap<(String, String), Bytes>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_budget_guard(&self) -> MutexGuard<'_, Option<usize>> {
        self.write_budget
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self, location: &ObjectLocation) -> Result<(), BucketError> {
        if self.read_only_guard().contains(location.bucket()) {
            return Err(BucketError::Sdk(format!(
                "AccessDenied: writes to bucket '{}' are not permitted",
                location.bucket()
            )));
        }
        match self.write_budget_guard().as_mut() {
            Some(0) => Err(BucketError::Sdk(format!(
                "InternalError: write to {location} failed"
            ))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read_only_guard(&self) -> MutexGuard<'_, HashSet<String>> {
        self.read_only_buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn put_object(
        &self,
        location: &ObjectLocation,
        bytes: Bytes,
        _content_type: &str,
    ) -> Result<(), BucketError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.check_writable(location)?;
        self.insert(location, bytes);
        Ok(())
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Bytes, BucketError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.objects_guard()
            .get(&(location.bucket().to_string(), location.key().to_string()))
            .cloned()
            .ok_or_else(|| BucketError::NotFound(location.to_string()))
    }

    async fn list_prefix(&self, location: &ObjectLocation) -> Result<Vec<String>, BucketError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects_guard()
            .keys()
            .filter(|(bucket, key)| bucket == location.bucket() && key.starts_with(location.key()))
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn copy_object(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<(), BucketError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .objects_guard()
            .get(&(from.bucket().to_string(), from.key().to_string()))
            .cloned()
            .ok_or_else(|| BucketError::NotFound(from.to_string()))?;
        self.check_writable(to)?;
        self.insert(to, bytes);
        Ok(())
    }

    async fn delete_object(&self, location: &ObjectLocation) -> Result<(), BucketError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.objects_guard()
            .remove(&(location.bucket().to_string(), location.key().to_string()));
        Ok(())
    }
}
