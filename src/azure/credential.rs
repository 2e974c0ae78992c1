//! Ambient Azure credentials.
//!
//! [`DefaultCredential`] walks a fixed chain of providers resolved from the
//! process environment and returns the first token obtained:
//!
//! 1. `AZURE_STORAGE_ACCESS_TOKEN` (a pre-issued bearer token)
//! 2. service principal secret (`AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`)
//! 3. workload identity (`AZURE_FEDERATED_TOKEN_FILE` plus tenant and client id)
//! 4. managed identity (App Service `IDENTITY_ENDPOINT` or the VM metadata endpoint)
//! 5. the Azure CLI (`az account get-access-token`)
//!
//! There is no interactive flow.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AuthError;

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const JWT_BEARER_ASSERTION: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// The Azure CLI ships as a batch script on Windows.
const AZ_PROGRAM: &str = if cfg!(windows) { "az.cmd" } else { "az" };

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A bearer token and its expiry, when known.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// True when the token expires within the refresh margin.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.expires_on {
            Some(exp) => (exp - now).num_seconds() < EXPIRY_MARGIN_SECS,
            None => false,
        }
    }
}

/// Something that can produce bearer tokens for an OAuth scope.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short provider name for logs and error messages.
    fn name(&self) -> &'static str;

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError>;
}

/// Converts `https://storage.azure.com/.default` into the v1 resource form.
fn scope_to_resource(scope: &str) -> String {
    let resource = scope.strip_suffix(".default").unwrap_or(scope);
    if resource.ends_with('/') {
        resource.to_string()
    } else {
        format!("{}/", resource)
    }
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn require(env: EnvLookup<'_>, provider: &'static str, key: &str) -> Result<String, AuthError> {
    env(key).ok_or_else(|| AuthError::NotConfigured {
        provider,
        reason: format!("{} is not set", key),
    })
}

/// Accepts `expires_on` as either a number or a numeric string of epoch seconds.
fn parse_epoch(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}

/// A fixed token, typically minted by an outer orchestrator.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    fn from_lookup(env: EnvLookup<'_>) -> Result<Self, AuthError> {
        Ok(Self::new(require(
            env,
            "StaticTokenCredential",
            "AZURE_STORAGE_ACCESS_TOKEN",
        )?))
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    fn name(&self) -> &'static str {
        "StaticTokenCredential"
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken, AuthError> {
        Ok(AccessToken::new(self.token.clone(), None))
    }
}

#[derive(Debug, Deserialize)]
struct AadTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Posts a token request to the Microsoft identity platform v2 endpoint.
async fn request_aad_token(
    http: &Client,
    provider: &'static str,
    authority: &str,
    tenant_id: &str,
    form: &[(&str, &str)],
) -> Result<AccessToken, AuthError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        tenant_id
    );
    let failed = |reason: String| AuthError::TokenRequestFailed { provider, reason };

    let response = http
        .post(&url)
        .form(form)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(failed(format!("HTTP {}: {}", status, body)));
    }

    let parsed: AadTokenResponse = response
        .json()
        .await
        .map_err(|e| failed(format!("invalid token response: {}", e)))?;
    let expires_on = parsed
        .expires_in
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    Ok(AccessToken::new(parsed.access_token, expires_on))
}

/// Service principal authenticated with a client secret.
pub struct ClientSecretCredential {
    http: Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    fn from_lookup(http: Client, env: EnvLookup<'_>) -> Result<Self, AuthError> {
        const NAME: &str = "ClientSecretCredential";
        Ok(Self {
            tenant_id: require(env, NAME, "AZURE_TENANT_ID")?,
            client_id: require(env, NAME, "AZURE_CLIENT_ID")?,
            client_secret: require(env, NAME, "AZURE_CLIENT_SECRET")?,
            authority: env("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            http,
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    fn name(&self) -> &'static str {
        "ClientSecretCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        request_aad_token(
            &self.http,
            self.name(),
            &self.authority,
            &self.tenant_id,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ],
        )
        .await
    }
}

/// Federated workload identity (e.g. Kubernetes service account tokens).
pub struct WorkloadIdentityCredential {
    http: Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    token_file: String,
}

impl WorkloadIdentityCredential {
    fn from_lookup(http: Client, env: EnvLookup<'_>) -> Result<Self, AuthError> {
        const NAME: &str = "WorkloadIdentityCredential";
        Ok(Self {
            token_file: require(env, NAME, "AZURE_FEDERATED_TOKEN_FILE")?,
            tenant_id: require(env, NAME, "AZURE_TENANT_ID")?,
            client_id: require(env, NAME, "AZURE_CLIENT_ID")?,
            authority: env("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            http,
        })
    }
}

#[async_trait]
impl TokenCredential for WorkloadIdentityCredential {
    fn name(&self) -> &'static str {
        "WorkloadIdentityCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        // The projected token is rotated on disk, so it is re-read per request.
        let assertion = tokio::fs::read_to_string(&self.token_file).await?;
        request_aad_token(
            &self.http,
            self.name(),
            &self.authority,
            &self.tenant_id,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_assertion_type", JWT_BEARER_ASSERTION),
                ("client_assertion", assertion.trim()),
                ("scope", scope),
            ],
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ManagedIdentityResponse {
    access_token: String,
    #[serde(default)]
    expires_on: serde_json::Value,
}

enum ManagedIdentityEndpoint {
    AppService { endpoint: String, header: String },
    Imds,
}

/// Managed identity via App Service or the instance metadata service.
pub struct ManagedIdentityCredential {
    http: Client,
    endpoint: ManagedIdentityEndpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    fn from_lookup(env: EnvLookup<'_>) -> Result<Self, AuthError> {
        let endpoint = match (env("IDENTITY_ENDPOINT"), env("IDENTITY_HEADER")) {
            (Some(endpoint), Some(header)) => ManagedIdentityEndpoint::AppService { endpoint, header },
            _ => ManagedIdentityEndpoint::Imds,
        };
        // Off Azure the metadata address is unroutable; fail fast instead of hanging.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::NotConfigured {
                provider: "ManagedIdentityCredential",
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint,
            client_id: env("AZURE_CLIENT_ID"),
        })
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let resource = scope_to_resource(scope);
        let mut query: Vec<(&str, &str)> = vec![("resource", resource.as_str())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.endpoint {
            ManagedIdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.http
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header.as_str())
                    .query(&query)
            }
            ManagedIdentityEndpoint::Imds => {
                query.push(("api-version", IMDS_API_VERSION));
                self.http
                    .get(IMDS_ENDPOINT)
                    .header("Metadata", "true")
                    .query(&query)
            }
        };

        let failed = |reason: String| AuthError::TokenRequestFailed {
            provider: "ManagedIdentityCredential",
            reason,
        };
        let response = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ManagedIdentityResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid token response: {}", e)))?;
        Ok(AccessToken::new(
            parsed.access_token,
            parse_epoch(&parsed.expires_on),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: serde_json::Value,
}

/// Tokens from a logged-in Azure CLI session.
pub struct AzureCliCredential {
    program: String,
}

impl AzureCliCredential {
    /// Uses `program` instead of the platform's `az` executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::with_program(AZ_PROGRAM)
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let resource = scope_to_resource(scope);
        let output = tokio::process::Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--output",
                "json",
                "--resource",
                &resource,
            ])
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AuthError::NotConfigured {
                    provider: "AzureCliCredential",
                    reason: format!("{} is not installed", self.program),
                },
                _ => AuthError::Io(e),
            })?;

        if !output.status.success() {
            return Err(AuthError::TokenRequestFailed {
                provider: "AzureCliCredential",
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_cli_token(&output.stdout)
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken, AuthError> {
    let parsed: CliTokenResponse =
        serde_json::from_slice(stdout).map_err(|e| AuthError::TokenRequestFailed {
            provider: "AzureCliCredential",
            reason: format!("invalid az output: {}", e),
        })?;
    Ok(AccessToken::new(
        parsed.access_token,
        parse_epoch(&parsed.expires_on),
    ))
}

/// The ambient credential chain, with a cached token.
pub struct DefaultCredential {
    sources: Vec<Box<dyn TokenCredential>>,
    skipped: Vec<String>,
    cached: Mutex<Option<(String, AccessToken)>>,
}

impl DefaultCredential {
    /// Builds the chain from the process environment. Performs no network I/O.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(&process_env)
    }

    fn from_lookup(env: EnvLookup<'_>) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::TokenRequestFailed {
                provider: "DefaultCredential",
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        let mut sources: Vec<Box<dyn TokenCredential>> = Vec::new();
        let mut skipped = Vec::new();
        let mut add = |source: Result<Box<dyn TokenCredential>, AuthError>| match source {
            Ok(s) => sources.push(s),
            Err(e) => skipped.push(e.to_string()),
        };

        add(StaticTokenCredential::from_lookup(env).map(|c| Box::new(c) as Box<dyn TokenCredential>));
        add(ClientSecretCredential::from_lookup(http.clone(), env).map(|c| Box::new(c) as Box<dyn TokenCredential>));
        add(WorkloadIdentityCredential::from_lookup(http, env).map(|c| Box::new(c) as Box<dyn TokenCredential>));
        add(ManagedIdentityCredential::from_lookup(env).map(|c| Box::new(c) as Box<dyn TokenCredential>));
        add(Ok(Box::new(AzureCliCredential::default())));

        Ok(Self::with_sources(sources).with_skipped(skipped))
    }

    /// Builds a chain from explicit providers, tried in order.
    pub fn with_sources(sources: Vec<Box<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            skipped: Vec::new(),
            cached: Mutex::new(None),
        }
    }

    fn with_skipped(mut self, skipped: Vec<String>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Names of the providers that will be tried, in order.
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    fn name(&self) -> &'static str {
        "DefaultCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some((cached_scope, token)) = cached.as_ref() {
            if cached_scope == scope && !token.is_stale(Utc::now()) {
                return Ok(token.clone());
            }
        }

        let mut failures: Vec<String> = self.skipped.iter().map(|s| format!("- {}", s)).collect();
        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    info!(provider = source.name(), "Acquired storage access token");
                    *cached = Some((scope.to_string(), token.clone()));
                    return Ok(token);
                }
                Err(e) => {
                    debug!(provider = source.name(), error = %e, "Credential provider failed");
                    failures.push(format!("- {}", e));
                }
            }
        }
        Err(AuthError::CredentialUnavailable(failures.join("\n")))
    }
}
