//! Azure Blob Storage REST client.
//!
//! Covers the three calls an upload needs: Get Container Properties (as an
//! existence check), Create Container and Put Blob (block blob, overwriting).
//! Requests are authorized with an OAuth bearer token from a
//! [`TokenCredential`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::credential::TokenCredential;
use crate::error::BlobError;
use crate::storage::BlobStore;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2021-08-06";

/// OAuth scope for Azure Storage data-plane access.
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Client for a single storage account's blob endpoint.
pub struct BlobServiceClient {
    http: Client,
    account_url: String,
    credential: Arc<dyn TokenCredential>,
}

impl BlobServiceClient {
    /// Creates a client for `account_url` (e.g. `https://acct.blob.core.windows.net`).
    pub fn new(
        account_url: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, BlobError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| BlobError::RequestFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            account_url: account_url.into().trim_end_matches('/').to_string(),
            credential,
        })
    }

    pub fn account_url(&self) -> &str {
        &self.account_url
    }

    /// URL of a container resource.
    pub fn container_url(&self, container: &str) -> String {
        format!(
            "{}/{}?restype=container",
            self.account_url,
            urlencoding::encode(container)
        )
    }

    /// URL of a blob; each `/`-separated segment of the name is percent-encoded.
    pub fn blob_url(&self, container: &str, name: &str) -> String {
        let path = name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            self.account_url,
            urlencoding::encode(container),
            path
        )
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, BlobError> {
        let token = self.credential.get_token(STORAGE_SCOPE).await?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token.token)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-date", rfc1123_now())
            .header("x-ms-client-request-id", Uuid::new_v4().to_string()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BlobError> {
        request
            .send()
            .await
            .map_err(|e| BlobError::RequestFailed(e.to_string()))
    }
}

#[async_trait]
impl BlobStore for BlobServiceClient {
    async fn container_exists(&self, container: &str) -> Result<bool, BlobError> {
        let url = self.container_url(container);
        let response = self.send(self.request(Method::GET, &url).await?).await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(service_error(response).await),
        }
    }

    async fn create_container(&self, container: &str) -> Result<bool, BlobError> {
        let url = self.container_url(container);
        let request = self
            .request(Method::PUT, &url)
            .await?
            .body(Vec::<u8>::new());
        let response = self.send(request).await?;

        match response.status() {
            StatusCode::CREATED => {
                info!(container, "Created blob container");
                Ok(true)
            }
            // Another writer created it between the existence check and now.
            StatusCode::CONFLICT => {
                let err = service_error(response).await;
                if matches!(&err, BlobError::Service { code, .. } if code == "ContainerAlreadyExists")
                {
                    warn!(container, "Container appeared concurrently; reusing it");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            _ => Err(service_error(response).await),
        }
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<(), BlobError> {
        let url = self.blob_url(container, name);
        let len = content.len();
        let request = self
            .request(Method::PUT, &url)
            .await?
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", "application/octet-stream")
            .body(content);
        let response = self.send(request).await?;

        if response.status() == StatusCode::CREATED {
            debug!(container, blob = name, bytes = len, "Put blob");
            Ok(())
        } else {
            Err(service_error(response).await)
        }
    }
}

/// Current time in the RFC 1123 form the service expects for `x-ms-date`.
fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

async fn service_error(response: Response) -> BlobError {
    let status = response.status().as_u16();
    let code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .to_string();
    let body = response.text().await.unwrap_or_default();
    BlobError::Service {
        status,
        code,
        message: xml_message(&body).unwrap_or(body),
    }
}

/// Pulls `<Message>` out of the service's XML error body.
fn xml_message(body: &str) -> Option<String> {
    let start = body.find("<Message>")? + "<Message>".len();
    let end = body[start..].find("</Message>")? + start;
    Some(body[start..end].trim().to_string())
}
