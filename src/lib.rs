//! mnist-uploader: publish the MNIST dataset to Azure Blob Storage.
//!
//! Downloads the four MNIST arrays, serializes each to NumPy `.npy` and
//! uploads them to a blob container, optionally under a job id prefix.

pub mod azure;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod npy;
pub mod storage;
pub mod uploader;

// Re-export commonly used error types
pub use error::{AuthError, BlobError, ConfigError, DatasetError, NpyError};
