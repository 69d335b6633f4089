//! In-memory blob store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use super::{BlobStore, ObjectInfo, StoreError};
use crate::BoxFuture;

struct StoredObject {
    bytes: Vec<u8>,
    modified: DateTime<Utc>,
}

/// A [`BlobStore`] backed by a map, with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_prefixes: Mutex<Vec<String>>,
    bucket: Option<String>,
    put_count: AtomicUsize,
    failing_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `bucket` as the store's bucket, so async jobs can be started.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Make every subsequent `put` under `prefix` fail.
    pub fn fail_writes_under(&self, prefix: impl Into<String>) {
        self.failing_prefixes.lock().unwrap().push(prefix.into());
    }

    /// Make the next `n` calls to `get` fail with a transient error.
    pub fn fail_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Insert an object without going through the async API.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(
            key.into(),
            StoredObject {
                bytes: bytes.into(),
                modified: Utc::now(),
            },
        );
    }

    /// Current contents of `key`, if present.
    pub fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.bytes.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Number of successful `put` calls.
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }
}

impl BlobStore for MemoryStore {
    fn describe(&self) -> String {
        match &self.bucket {
            Some(bucket) => format!("memory://{bucket}"),
            None => "memory".to_string(),
        }
    }

    fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        let failing = self
            .failing_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|p| key.starts_with(p.as_str()));
        let result = if failing {
            Err(StoreError::Backend(format!("injected write failure for {key}")))
        } else {
            self.insert(key, bytes);
            self.put_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StoreError>> {
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if injected {
            Err(StoreError::Transient(format!("injected read failure for {key}")))
        } else {
            self.snapshot(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        };
        Box::pin(async move { result })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StoreError>> {
        let objects: Vec<ObjectInfo> = self
            .objects
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectInfo {
                key: k.clone(),
                size: o.bytes.len() as u64,
                last_modified: Some(o.modified),
            })
            .collect();
        Box::pin(async move { Ok(objects) })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        let found = self.objects.lock().unwrap().contains_key(key);
        Box::pin(async move { Ok(found) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        self.objects.lock().unwrap().remove(key);
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_list_delete() {
        let store = MemoryStore::new();
        store.put("out/b.txt", b"b".to_vec()).await.unwrap();
        store.put("out/a.txt", b"a".to_vec()).await.unwrap();
        store.put("other/c.txt", b"c".to_vec()).await.unwrap();

        assert_eq!(store.get("out/a.txt").await.unwrap(), b"a");
        let listed: Vec<String> = store
            .list("out/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(listed, vec!["out/a.txt", "out/b.txt"]);

        store.delete("out/a.txt").await.unwrap();
        store.delete("out/a.txt").await.unwrap();
        assert!(!store.exists("out/a.txt").await.unwrap());
        assert_eq!(
            store.get("out/a.txt").await.unwrap_err(),
            StoreError::NotFound("out/a.txt".into())
        );
        assert_eq!(store.put_count(), 3);
    }

    #[tokio::test]
    async fn injected_failures_only_hit_prefix() {
        let store = MemoryStore::new();
        store.fail_writes_under("extracted-texts/");
        assert!(store.put("extracted-texts/a.txt", vec![1]).await.is_err());
        assert!(store.put("processing-errors/a_error.json", vec![1]).await.is_ok());
        assert_eq!(store.keys(), vec!["processing-errors/a_error.json"]);
    }

    #[tokio::test]
    async fn injected_read_failures_run_out() {
        let store = MemoryStore::new();
        store.insert("in/a.pdf", b"%PDF-".to_vec());
        store.fail_reads(2);
        assert!(store.get("in/a.pdf").await.unwrap_err().is_transient());
        assert!(store.get("in/a.pdf").await.unwrap_err().is_transient());
        assert_eq!(store.get("in/a.pdf").await.unwrap(), b"%PDF-");
    }
}
