//! Command-line interface for mnist-uploader.
//!
//! Parses the storage account, container and job id, then drives the
//! download and upload.

mod commands;

pub use commands::{parse_cli, run, run_upload, run_upload_with_credential, run_with_cli, Cli};
