//! MNIST retrieval: download, optional on-disk cache, gunzip and IDX decode.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use ndarray::{Array1, Array3, ArrayViewD};
use reqwest::Client;
use tracing::{debug, info};

use super::idx;
use crate::error::DatasetError;

/// Archive file names, in the order `x_train`, `y_train`, `x_test`, `y_test`.
pub const MNIST_FILES: [&str; 4] = [
    "train-images-idx3-ubyte.gz",
    "train-labels-idx1-ubyte.gz",
    "t10k-images-idx3-ubyte.gz",
    "t10k-labels-idx1-ubyte.gz",
];

/// Canonical array names, matching the blob names.
pub const ARRAY_NAMES: [&str; 4] = ["x_train", "y_train", "x_test", "y_test"];

/// The four MNIST arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct MnistSplit {
    /// Training images, `(60000, 28, 28)`.
    pub x_train: Array3<u8>,
    /// Training labels, `(60000,)`.
    pub y_train: Array1<u8>,
    /// Test images, `(10000, 28, 28)`.
    pub x_test: Array3<u8>,
    /// Test labels, `(10000,)`.
    pub y_test: Array1<u8>,
}

/// A borrowed array paired with its canonical name.
#[derive(Debug)]
pub struct NamedArray<'a> {
    pub name: &'static str,
    pub array: ArrayViewD<'a, u8>,
}

impl MnistSplit {
    /// Builds a split, checking that image and label counts agree.
    pub fn new(
        x_train: Array3<u8>,
        y_train: Array1<u8>,
        x_test: Array3<u8>,
        y_test: Array1<u8>,
    ) -> Result<Self, DatasetError> {
        check_counts("train", &x_train, &y_train)?;
        check_counts("test", &x_test, &y_test)?;
        Ok(Self {
            x_train,
            y_train,
            x_test,
            y_test,
        })
    }

    /// Decodes a split from the four gzip-compressed IDX archives.
    pub fn from_archives(archives: [&[u8]; 4]) -> Result<Self, DatasetError> {
        let [train_images, train_labels, test_images, test_labels] = archives;
        Self::new(
            idx::parse_images(MNIST_FILES[0], &gunzip(MNIST_FILES[0], train_images)?)?,
            idx::parse_labels(MNIST_FILES[1], &gunzip(MNIST_FILES[1], train_labels)?)?,
            idx::parse_images(MNIST_FILES[2], &gunzip(MNIST_FILES[2], test_images)?)?,
            idx::parse_labels(MNIST_FILES[3], &gunzip(MNIST_FILES[3], test_labels)?)?,
        )
    }

    /// The four arrays in upload order.
    pub fn named_arrays(&self) -> [NamedArray<'_>; 4] {
        [
            NamedArray {
                name: ARRAY_NAMES[0],
                array: self.x_train.view().into_dyn(),
            },
            NamedArray {
                name: ARRAY_NAMES[1],
                array: self.y_train.view().into_dyn(),
            },
            NamedArray {
                name: ARRAY_NAMES[2],
                array: self.x_test.view().into_dyn(),
            },
            NamedArray {
                name: ARRAY_NAMES[3],
                array: self.y_test.view().into_dyn(),
            },
        ]
    }
}

fn check_counts(split: &str, images: &Array3<u8>, labels: &Array1<u8>) -> Result<(), DatasetError> {
    let images_len = images.dim().0;
    if images_len != labels.len() {
        return Err(DatasetError::CountMismatch {
            split: split.to_string(),
            images: images_len,
            labels: labels.len(),
        });
    }
    Ok(())
}

fn gunzip(file: &str, compressed: &[u8]) -> Result<Vec<u8>, DatasetError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| DatasetError::Truncated {
        file: file.to_string(),
        reason: format!("gzip decode failed: {}", e),
    })?;
    Ok(out)
}

/// Fetches the fixed MNIST archives from a mirror.
pub struct MnistSource {
    client: Client,
    mirror: String,
    cache_dir: Option<PathBuf>,
}

impl MnistSource {
    pub fn new(mirror: impl Into<String>, cache_dir: Option<PathBuf>) -> Result<Self, DatasetError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| DatasetError::DownloadFailed {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            mirror: mirror.into().trim_end_matches('/').to_string(),
            cache_dir,
        })
    }

    pub fn mirror(&self) -> &str {
        &self.mirror
    }

    /// Downloads (or reads from cache) and decodes all four arrays.
    pub async fn load(&self) -> Result<MnistSplit, DatasetError> {
        if let Some(dir) = &self.cache_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut archives = Vec::with_capacity(MNIST_FILES.len());
        for file in MNIST_FILES {
            archives.push(self.fetch_archive(file).await?);
        }

        let split = MnistSplit::from_archives([
            &archives[0],
            &archives[1],
            &archives[2],
            &archives[3],
        ])?;
        info!(
            train = split.y_train.len(),
            test = split.y_test.len(),
            "Loaded MNIST dataset"
        );
        Ok(split)
    }

    async fn fetch_archive(&self, file: &str) -> Result<Vec<u8>, DatasetError> {
        let cached = self.cache_dir.as_deref().map(|dir| dir.join(file));

        if let Some(path) = cached.as_deref().filter(|p| p.is_file()) {
            debug!(path = %path.display(), "Using cached MNIST archive");
            return Ok(tokio::fs::read(path).await?);
        }

        let bytes = self.download(file).await?;
        if let Some(path) = cached.as_deref() {
            write_cache(path, &bytes).await?;
        }
        Ok(bytes)
    }

    async fn download(&self, file: &str) -> Result<Vec<u8>, DatasetError> {
        let url = format!("{}/{}", self.mirror, file);
        info!(url = %url, "Downloading MNIST archive");

        let failed = |e: reqwest::Error| DatasetError::DownloadFailed {
            url: url.clone(),
            reason: e.to_string(),
        };
        let response = self.client.get(&url).send().await.map_err(failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(failed)?;
        debug!(url = %url, bytes = bytes.len(), "Downloaded MNIST archive");
        Ok(bytes.to_vec())
    }
}

/// Writes through a temporary file so an interrupted run never leaves a
/// partial archive behind.
async fn write_cache(path: &Path, bytes: &[u8]) -> Result<(), DatasetError> {
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Cached MNIST archive");
    Ok(())
}
