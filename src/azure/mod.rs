//! Azure Blob Storage access: ambient credentials and a REST client.

pub mod blob;
pub mod credential;

pub use blob::{BlobServiceClient, API_VERSION, STORAGE_SCOPE};
pub use credential::{
    AccessToken, AzureCliCredential, ClientSecretCredential, DefaultCredential,
    ManagedIdentityCredential, StaticTokenCredential, TokenCredential, WorkloadIdentityCredential,
};
