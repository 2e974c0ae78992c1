//! Blob storage abstraction.
//!
//! The uploader talks to a [`BlobStore`]. [`crate::azure::BlobServiceClient`]
//! implements it against Azure; [`MemoryBlobStore`] keeps blobs in process
//! for dry runs and tests.

pub mod memory;

use async_trait::async_trait;

use crate::error::BlobError;

pub use memory::MemoryBlobStore;

/// The three container/blob operations an upload needs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns whether the container exists.
    async fn container_exists(&self, container: &str) -> Result<bool, BlobError>;

    /// Creates the container. Returns `false` if it already existed.
    async fn create_container(&self, container: &str) -> Result<bool, BlobError>;

    /// Uploads `content` as `name`, replacing any existing blob.
    async fn put_blob(&self, container: &str, name: &str, content: Vec<u8>)
        -> Result<(), BlobError>;
}
