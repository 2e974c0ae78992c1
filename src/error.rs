//! Error types for mnist-uploader operations.
//!
//! Defines one error enum per subsystem:
//! - Run configuration validation
//! - Dataset retrieval and IDX parsing
//! - NPY serialization
//! - Azure credential resolution
//! - Blob Storage REST calls

use thiserror::Error;

/// Errors raised while validating the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid storage account name '{0}': must be 3-24 lowercase letters or digits")]
    InvalidAccountName(String),

    #[error("Invalid container name '{name}': {reason}")]
    InvalidContainerName { name: String, reason: String },

    #[error("Invalid job id '{0}': must not start or end with '/'")]
    InvalidJobId(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Errors that can occur while fetching or decoding the MNIST dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Download of '{url}' failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Download of '{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid IDX magic in '{file}': expected {expected}, got {actual}")]
    BadMagic {
        file: String,
        expected: u32,
        actual: u32,
    },

    #[error("Truncated IDX data in '{file}': {reason}")]
    Truncated { file: String, reason: String },

    #[error("Inconsistent split '{split}': {images} images but {labels} labels")]
    CountMismatch {
        split: String,
        images: usize,
        labels: usize,
    },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while encoding or decoding `.npy` data.
#[derive(Debug, Error)]
pub enum NpyError {
    #[error("Header too large: {0} bytes")]
    HeaderTooLarge(usize),

    #[error("Invalid NPY preamble: {0}")]
    InvalidPreamble(String),

    #[error("Serialized array does not match its source: {0}")]
    Mismatch(String),
}

/// Errors that can occur while resolving ambient Azure credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} token request failed: {reason}")]
    TokenRequestFailed {
        provider: &'static str,
        reason: String,
    },

    #[error("No credential provider succeeded:\n{0}")]
    CredentialUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during Blob Storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Blob service error ({status}, {code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl BlobError {
    /// Returns the HTTP status for service errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            BlobError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }
}
