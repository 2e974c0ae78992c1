//! Run configuration for an upload.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default mirror serving the gzip-compressed MNIST IDX files.
pub const DEFAULT_MNIST_MIRROR: &str = "https://ossci-datasets.s3.amazonaws.com/mnist";

/// Public Azure blob endpoint suffix.
const BLOB_ENDPOINT_SUFFIX: &str = "blob.core.windows.net";

static ACCOUNT_NAME: OnceLock<Regex> = OnceLock::new();
static CONTAINER_NAME: OnceLock<Regex> = OnceLock::new();

fn account_name_re() -> &'static Regex {
    ACCOUNT_NAME.get_or_init(|| Regex::new(r"^[a-z0-9]{3,24}$").expect("valid regex"))
}

fn container_name_re() -> &'static Regex {
    CONTAINER_NAME
        .get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex"))
}

/// Configuration for a single upload run. Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Azure storage account name.
    pub storage_account: String,
    /// Target blob container.
    pub container: String,
    /// Optional namespace prefix for the uploaded blobs.
    pub job_id: Option<String>,
    /// Overrides `https://{account}.blob.core.windows.net`.
    pub blob_endpoint: Option<String>,
    /// Base URL the MNIST archives are fetched from.
    pub mnist_mirror: String,
    /// Directory where downloaded archives are kept between runs.
    pub cache_dir: Option<PathBuf>,
    /// Upload into an in-memory store instead of Azure.
    pub dry_run: bool,
}

impl UploadConfig {
    /// Creates a configuration for the given account and container.
    pub fn new(storage_account: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            storage_account: storage_account.into(),
            container: container.into(),
            job_id: None,
            blob_endpoint: None,
            mnist_mirror: DEFAULT_MNIST_MIRROR.to_string(),
            cache_dir: None,
            dry_run: false,
        }
    }

    /// Sets the job id used to namespace blob names. An empty id means none.
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        self.job_id = (!job_id.is_empty()).then_some(job_id);
        self
    }

    /// Sets an explicit blob service endpoint.
    pub fn with_blob_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.blob_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the dataset mirror.
    pub fn with_mnist_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mnist_mirror = mirror.into();
        self
    }

    /// Sets the dataset cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Checks every field. Called before any network access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_account.is_empty() {
            return Err(ConfigError::Missing("storage account"));
        }
        if self.container.is_empty() {
            return Err(ConfigError::Missing("container"));
        }
        // A custom endpoint (emulator, sovereign cloud) may use any account name.
        if self.blob_endpoint.is_none() && !account_name_re().is_match(&self.storage_account) {
            return Err(ConfigError::InvalidAccountName(
                self.storage_account.clone(),
            ));
        }
        validate_container_name(&self.container)?;

        if let Some(job_id) = &self.job_id {
            if job_id.starts_with('/') || job_id.ends_with('/') {
                return Err(ConfigError::InvalidJobId(job_id.clone()));
            }
        }
        if let Some(endpoint) = &self.blob_endpoint {
            validate_http_url(endpoint)?;
        }
        validate_http_url(&self.mnist_mirror)?;
        Ok(())
    }

    /// Base URL of the blob service, without a trailing slash.
    pub fn account_url(&self) -> String {
        match &self.blob_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.{}", self.storage_account, BLOB_ENDPOINT_SUFFIX),
        }
    }

    /// Blob name for an array: `{job_id}/{name}.npy` or `{name}.npy`.
    pub fn blob_name(&self, name: &str) -> String {
        blob_name(self.job_id.as_deref(), name)
    }
}

/// Computes the blob name for an array, namespaced by the job id when present.
pub fn blob_name(job_id: Option<&str>, name: &str) -> String {
    match job_id {
        Some(job) if !job.is_empty() => format!("{}/{}.npy", job, name),
        _ => format!("{}.npy", name),
    }
}

fn validate_container_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidContainerName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < 3 || name.len() > 63 {
        return Err(invalid("must be 3-63 characters long"));
    }
    if !container_name_re().is_match(name) {
        return Err(invalid(
            "must use lowercase letters, digits and hyphens, and start and end with a letter or digit",
        ));
    }
    if name.contains("--") {
        return Err(invalid("must not contain consecutive hyphens"));
    }
    Ok(())
}

fn validate_http_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: "must start with http:// or https://".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_name_with_job_id() {
        assert_eq!(blob_name(Some("job42"), "x_train"), "job42/x_train.npy");
        assert_eq!(blob_name(Some("job42"), "y_test"), "job42/y_test.npy");
    }

    #[test]
    fn test_blob_name_without_job_id() {
        assert_eq!(blob_name(None, "x_train"), "x_train.npy");
        assert_eq!(blob_name(Some(""), "y_train"), "y_train.npy");
    }

    #[test]
    fn test_default_account_url() {
        let config = UploadConfig::new("acct1", "data");
        assert_eq!(config.account_url(), "https://acct1.blob.core.windows.net");
    }

    #[test]
    fn test_endpoint_override_strips_trailing_slash() {
        let config = UploadConfig::new("devstoreaccount1", "data")
            .with_blob_endpoint("http://127.0.0.1:10000/devstoreaccount1/");
        assert_eq!(
            config.account_url(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_typical_config() {
        let config = UploadConfig::new("acct1", "data").with_job_id("job42");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let err = UploadConfig::new("", "data").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("storage account")));

        let err = UploadConfig::new("acct1", "").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("container")));
    }

    #[test]
    fn test_validate_rejects_bad_account_name() {
        let err = UploadConfig::new("My_Account", "data").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAccountName(_)));
    }

    #[test]
    fn test_validate_rejects_bad_container_names() {
        for name in ["ab", "Data", "-data", "data-", "da--ta", "da_ta"] {
            let err = UploadConfig::new("acct1", name).validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidContainerName { .. }),
                "expected {name} to be rejected"
            );
        }
    }

    #[test]
    fn test_empty_job_id_means_none() {
        let config = UploadConfig::new("acct1", "data").with_job_id("");
        assert!(config.job_id.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.blob_name("x_train"), "x_train.npy");
    }

    #[test]
    fn test_validate_rejects_bad_job_id() {
        for job in ["/job", "job/", "/"] {
            let err = UploadConfig::new("acct1", "data")
                .with_job_id(job)
                .validate()
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidJobId(_)));
        }
    }

    #[test]
    fn test_validate_rejects_non_http_mirror() {
        let err = UploadConfig::new("acct1", "data")
            .with_mnist_mirror("ftp://example.com/mnist")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }
}
