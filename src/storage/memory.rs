//! In-process blob store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::BlobStore;
use crate::error::BlobError;

type Container = BTreeMap<String, Vec<u8>>;

/// Keeps containers and blobs in memory. Mirrors the service's behavior for
/// missing containers so flows can be exercised without Azure.
#[derive(Default)]
pub struct MemoryBlobStore {
    containers: Mutex<BTreeMap<String, Container>>,
    creates: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-creates a container.
    pub async fn with_container(self, container: &str) -> Self {
        self.containers
            .lock()
            .await
            .entry(container.to_string())
            .or_default();
        self
    }

    /// Returns a copy of a blob's content.
    pub async fn get(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.containers
            .lock()
            .await
            .get(container)
            .and_then(|c| c.get(name).cloned())
    }

    /// Sorted blob names in a container.
    pub async fn blob_names(&self, container: &str) -> Vec<String> {
        self.containers
            .lock()
            .await
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of successful `create_container` calls.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful `put_blob` calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn container_exists(&self, container: &str) -> Result<bool, BlobError> {
        Ok(self.containers.lock().await.contains_key(container))
    }

    async fn create_container(&self, container: &str) -> Result<bool, BlobError> {
        let mut containers = self.containers.lock().await;
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), Container::new());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<(), BlobError> {
        let mut containers = self.containers.lock().await;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| BlobError::Service {
                status: 404,
                code: "ContainerNotFound".to_string(),
                message: format!("The specified container '{}' does not exist.", container),
            })?;
        blobs.insert(name.to_string(), content);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
