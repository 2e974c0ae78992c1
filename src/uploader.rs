//! Uploads the MNIST split to a blob container as `.npy` blobs.
//!
//! The container is created when missing, then each array is serialized
//! and put under `[{job_id}/]{name}.npy`, overwriting earlier uploads.
//! Uploads are sequential and there is no retry: the first failure ends
//! the run, leaving any blobs already written in place.

use anyhow::Context;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::{blob_name, UploadConfig};
use crate::dataset::{MnistSplit, NamedArray};
use crate::error::BlobError;
use crate::npy;
use crate::storage::BlobStore;

/// One uploaded blob.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadedBlob {
    pub name: String,
    pub shape: Vec<usize>,
    pub bytes: usize,
    pub sha256: String,
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub container: String,
    pub job_id: Option<String>,
    pub container_created: bool,
    pub blobs: Vec<UploadedBlob>,
}

impl UploadReport {
    /// The human-readable completion line.
    pub fn summary_line(&self) -> String {
        format!(
            "MNIST data uploaded to Azure Blob storage successfully. Container: {}, Job ID: {}",
            self.container,
            self.job_id
                .as_deref()
                .filter(|job| !job.is_empty())
                .unwrap_or("Not specified")
        )
    }

    pub fn total_bytes(&self) -> usize {
        self.blobs.iter().map(|b| b.bytes).sum()
    }
}

/// Writes arrays into one container through a [`BlobStore`].
pub struct Uploader<S> {
    store: S,
    container: String,
    job_id: Option<String>,
}

impl<S: BlobStore> Uploader<S> {
    pub fn new(store: S, container: impl Into<String>, job_id: Option<String>) -> Self {
        Self {
            store,
            container: container.into(),
            job_id,
        }
    }

    pub fn from_config(store: S, config: &UploadConfig) -> Self {
        Self::new(store, config.container.clone(), config.job_id.clone())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn blob_name(&self, name: &str) -> String {
        blob_name(self.job_id.as_deref(), name)
    }

    /// Creates the container if it does not exist. Returns whether it was created.
    pub async fn ensure_container(&self) -> Result<bool, BlobError> {
        if self.store.container_exists(&self.container).await? {
            info!(container = %self.container, "Blob container already exists");
            return Ok(false);
        }
        self.store.create_container(&self.container).await
    }

    /// Serializes one array and uploads it, overwriting any existing blob.
    pub async fn upload_array(&self, named: &NamedArray<'_>) -> anyhow::Result<UploadedBlob> {
        let bytes = npy::to_npy_bytes(&named.array)
            .with_context(|| format!("Failed to serialize '{}'", named.name))?;
        npy::verify_npy::<u8>(&bytes, named.array.shape())
            .with_context(|| format!("Serialized '{}' failed verification", named.name))?;
        let blob = self.blob_name(named.name);
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let len = bytes.len();

        self.store
            .put_blob(&self.container, &blob, bytes)
            .await
            .with_context(|| format!("Failed to upload blob '{}'", blob))?;

        info!(
            blob = %blob,
            container = %self.container,
            bytes = len,
            "Uploaded array"
        );
        Ok(UploadedBlob {
            name: blob,
            shape: named.array.shape().to_vec(),
            bytes: len,
            sha256,
        })
    }

    /// Ensures the container and uploads all four arrays in order.
    pub async fn upload_split(&self, split: &MnistSplit) -> anyhow::Result<UploadReport> {
        let container_created = self
            .ensure_container()
            .await
            .with_context(|| format!("Failed to prepare container '{}'", self.container))?;

        let mut blobs = Vec::with_capacity(4);
        for named in split.named_arrays() {
            blobs.push(self.upload_array(&named).await?);
        }

        Ok(UploadReport {
            container: self.container.clone(),
            job_id: self.job_id.clone(),
            container_created,
            blobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::read_npy_header;
    use crate::storage::MemoryBlobStore;
    use ndarray::{Array1, Array3};

    fn tiny_split() -> MnistSplit {
        MnistSplit::new(
            Array3::from_elem((3, 28, 28), 7),
            Array1::from_vec(vec![1, 2, 3]),
            Array3::from_elem((2, 28, 28), 9),
            Array1::from_vec(vec![4, 5]),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_with_job_id() {
        let uploader = Uploader::new(MemoryBlobStore::new(), "data", Some("job42".to_string()));
        let report = uploader.upload_split(&tiny_split()).await.unwrap();

        assert!(report.container_created);
        assert_eq!(
            uploader.store().blob_names("data").await,
            vec![
                "job42/x_test.npy",
                "job42/x_train.npy",
                "job42/y_test.npy",
                "job42/y_train.npy"
            ]
        );
        let names: Vec<_> = report.blobs.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "job42/x_train.npy",
                "job42/y_train.npy",
                "job42/x_test.npy",
                "job42/y_test.npy"
            ]
        );
        assert_eq!(
            report.summary_line(),
            "MNIST data uploaded to Azure Blob storage successfully. Container: data, Job ID: job42"
        );
    }

    #[tokio::test]
    async fn test_upload_without_job_id() {
        let uploader = Uploader::new(MemoryBlobStore::new(), "data", None);
        let report = uploader.upload_split(&tiny_split()).await.unwrap();

        assert_eq!(
            uploader.store().blob_names("data").await,
            vec!["x_test.npy", "x_train.npy", "y_test.npy", "y_train.npy"]
        );
        assert!(report.summary_line().ends_with("Job ID: Not specified"));
    }

    #[tokio::test]
    async fn test_empty_job_id_is_unprefixed() {
        let uploader = Uploader::new(MemoryBlobStore::new(), "data", Some(String::new()));
        let report = uploader.upload_split(&tiny_split()).await.unwrap();

        assert_eq!(report.blobs[0].name, "x_train.npy");
        assert!(report.summary_line().ends_with("Job ID: Not specified"));
    }

    #[tokio::test]
    async fn test_existing_container_not_recreated() {
        let store = MemoryBlobStore::new().with_container("data").await;
        let uploader = Uploader::new(store, "data", None);
        let report = uploader.upload_split(&tiny_split()).await.unwrap();

        assert!(!report.container_created);
        assert_eq!(uploader.store().create_count(), 0);
        assert_eq!(uploader.store().put_count(), 4);
    }

    #[tokio::test]
    async fn test_rerun_overwrites() {
        let uploader = Uploader::new(MemoryBlobStore::new(), "data", Some("job42".to_string()));
        let first = uploader.upload_split(&tiny_split()).await.unwrap();
        let second = uploader.upload_split(&tiny_split()).await.unwrap();

        assert!(first.container_created);
        assert!(!second.container_created);
        assert_eq!(first.blobs, second.blobs);
        assert_eq!(uploader.store().blob_names("data").await.len(), 4);
        assert_eq!(uploader.store().put_count(), 8);
    }

    #[tokio::test]
    async fn test_uploaded_content_is_npy() {
        let uploader = Uploader::new(MemoryBlobStore::new(), "data", None);
        let report = uploader.upload_split(&tiny_split()).await.unwrap();

        let bytes = uploader.store().get("data", "x_train.npy").await.unwrap();
        let header = read_npy_header(&bytes).unwrap();
        assert_eq!(header.descr, "|u1");
        assert_eq!(header.shape, vec![3, 28, 28]);
        assert_eq!(bytes.len(), header.data_offset + 3 * 28 * 28);

        let x_train = &report.blobs[0];
        assert_eq!(x_train.bytes, bytes.len());
        assert_eq!(x_train.sha256, hex::encode(Sha256::digest(&bytes)));
        assert_eq!(report.total_bytes(), report.blobs.iter().map(|b| b.bytes).sum::<usize>());
    }
}
