//! CLI definition and the top-level upload flow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::azure::{BlobServiceClient, DefaultCredential, TokenCredential};
use crate::config::{UploadConfig, DEFAULT_MNIST_MIRROR};
use crate::dataset::{MnistSource, MnistSplit};
use crate::storage::{BlobStore, MemoryBlobStore};
use crate::uploader::{UploadReport, Uploader};

/// Download MNIST data and upload it to Azure Blob storage.
#[derive(Parser, Debug)]
#[command(name = "mnist-uploader")]
#[command(about = "Download MNIST data and upload to Azure Blob storage.")]
#[command(version)]
#[command(
    long_about = "Downloads the MNIST dataset and uploads x_train, y_train, x_test and y_test as .npy blobs.\n\nCredentials are resolved from the environment (service principal, workload identity, managed identity or Azure CLI).\n\nExample usage:\n  mnist-uploader --storage-account acct1 --container data --job-id job42"
)]
pub struct Cli {
    /// Azure Storage account name.
    #[arg(long)]
    pub storage_account: String,

    /// Blob container name.
    #[arg(long)]
    pub container: String,

    /// Batch job ID (optional). Blobs are written under `{job_id}/` when set.
    #[arg(long)]
    pub job_id: Option<String>,

    /// Blob service endpoint, overriding https://{account}.blob.core.windows.net.
    #[arg(long, env = "AZURE_STORAGE_BLOB_ENDPOINT")]
    pub blob_endpoint: Option<String>,

    /// Base URL serving the gzip-compressed MNIST IDX files.
    #[arg(long, env = "MNIST_MIRROR", default_value = DEFAULT_MNIST_MIRROR)]
    pub mnist_mirror: String,

    /// Directory to cache downloaded archives in.
    #[arg(long, env = "MNIST_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Serialize everything but upload into memory instead of Azure.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the upload report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

impl Cli {
    /// Builds the run configuration from the parsed flags.
    pub fn to_config(&self) -> UploadConfig {
        let mut config = UploadConfig::new(&self.storage_account, &self.container)
            .with_mnist_mirror(&self.mnist_mirror)
            .with_dry_run(self.dry_run);
        if let Some(job_id) = &self.job_id {
            config = config.with_job_id(job_id);
        }
        if let Some(endpoint) = &self.blob_endpoint {
            config = config.with_blob_endpoint(endpoint);
        }
        if let Some(dir) = &self.cache_dir {
            config = config.with_cache_dir(dir.clone());
        }
        config
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the upload.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments and print the outcome.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let report = run_upload(&cli.to_config()).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary_line());
    }
    Ok(())
}

/// Validates the configuration, fetches MNIST and uploads the four arrays.
pub async fn run_upload(config: &UploadConfig) -> anyhow::Result<UploadReport> {
    let split = load_split(config).await?;
    if config.dry_run {
        return dry_run(config, &split).await;
    }

    let credential = DefaultCredential::from_env().context("Failed to resolve credentials")?;
    info!(providers = ?credential.source_names(), "Resolved credential chain");
    upload_to_azure(config, &split, Arc::new(credential)).await
}

/// Same flow as [`run_upload`], authenticating with `credential` instead of
/// the ambient chain.
pub async fn run_upload_with_credential(
    config: &UploadConfig,
    credential: Arc<dyn TokenCredential>,
) -> anyhow::Result<UploadReport> {
    let split = load_split(config).await?;
    if config.dry_run {
        return dry_run(config, &split).await;
    }
    upload_to_azure(config, &split, credential).await
}

async fn load_split(config: &UploadConfig) -> anyhow::Result<MnistSplit> {
    config.validate().context("Invalid arguments")?;

    let source = MnistSource::new(&config.mnist_mirror, config.cache_dir.clone())?;
    source
        .load()
        .await
        .context("Failed to obtain the MNIST dataset")
}

async fn dry_run(config: &UploadConfig, split: &MnistSplit) -> anyhow::Result<UploadReport> {
    info!(container = %config.container, "Dry run: uploading into memory");
    upload_with(MemoryBlobStore::new(), config, split).await
}

async fn upload_to_azure(
    config: &UploadConfig,
    split: &MnistSplit,
    credential: Arc<dyn TokenCredential>,
) -> anyhow::Result<UploadReport> {
    info!(account_url = %config.account_url(), "Connecting to blob service");
    let client = BlobServiceClient::new(config.account_url(), credential)?;
    upload_with(client, config, split).await
}

async fn upload_with<S: BlobStore>(
    store: S,
    config: &UploadConfig,
    split: &MnistSplit,
) -> anyhow::Result<UploadReport> {
    let uploader = Uploader::from_config(store, config);
    let report = uploader.upload_split(split).await?;
    info!(
        container = %report.container,
        blobs = report.blobs.len(),
        bytes = report.total_bytes(),
        "Upload complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_required_arguments() {
        let args = vec![
            "mnist-uploader",
            "--storage-account",
            "acct1",
            "--container",
            "data",
            "--job-id",
            "job42",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        assert_eq!(cli.storage_account, "acct1");
        assert_eq!(cli.container, "data");
        assert_eq!(cli.job_id.as_deref(), Some("job42"));
        assert!(!cli.dry_run);
        assert!(!cli.json);
        assert_eq!(cli.log_level, "info");

        let config = cli.to_config();
        assert_eq!(config.blob_name("x_train"), "job42/x_train.npy");
        assert_eq!(config.account_url(), "https://acct1.blob.core.windows.net");
    }

    #[test]
    fn test_missing_storage_account_is_rejected() {
        let args = vec!["mnist-uploader", "--container", "data"];
        let err = Cli::try_parse_from(args).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_missing_container_is_rejected() {
        let args = vec!["mnist-uploader", "--storage-account", "acct1"];
        let err = Cli::try_parse_from(args).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_optional_flags() {
        let args = vec![
            "mnist-uploader",
            "--storage-account",
            "acct1",
            "--container",
            "data",
            "--blob-endpoint",
            "http://127.0.0.1:10000/acct1",
            "--mnist-mirror",
            "http://mirror.local/mnist",
            "--cache-dir",
            "/tmp/mnist",
            "--dry-run",
            "-j",
            "-l",
            "debug",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");
        let config = cli.to_config();

        assert!(config.job_id.is_none());
        assert!(config.dry_run);
        assert_eq!(config.account_url(), "http://127.0.0.1:10000/acct1");
        assert_eq!(config.mnist_mirror, "http://mirror.local/mnist");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/mnist")));
        assert_eq!(cli.log_level, "debug");
        assert!(cli.json);
    }

    #[test]
    fn test_empty_job_id_flag_means_none() {
        let args = vec![
            "mnist-uploader",
            "--storage-account",
            "acct1",
            "--container",
            "data",
            "--job-id",
            "",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");
        assert_eq!(cli.job_id.as_deref(), Some(""));

        let config = cli.to_config();
        assert!(config.job_id.is_none());
        assert_eq!(config.blob_name("y_test"), "y_test.npy");
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_download() {
        // The mirror is unreachable; validation must fail first.
        let config = UploadConfig::new("acct1", "Bad_Container").with_mnist_mirror("http://127.0.0.1:9");
        let err = run_upload(&config).await.unwrap_err();
        assert!(err.to_string().contains("Invalid arguments"));
    }
}
