//! Azure AD access tokens for the management plane.
//!
//! Tokens come from a service principal (client credentials) or the host's
//! managed identity. `AzureCredential` caches the current token and fetches a
//! new one shortly before it expires, or after the control plane rejects it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{ExternalServiceError, ensure_success};
use crate::config::AzureAuthConfig;

const SERVICE: &str = "azure-ad";

/// ARM resource the tokens are issued for.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Fetch a new token this long before the current one expires.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// A bearer token and how long it stays valid from the moment it was issued.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub secret: String,
    pub expires_in: Duration,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Where fresh tokens come from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, ExternalServiceError>;
}

/// AAD returns `expires_in` as a number; the managed identity endpoints
/// return it as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Seconds,
}

impl TokenResponse {
    fn into_token(self) -> Result<AccessToken, ExternalServiceError> {
        let seconds = match self.expires_in {
            Seconds::Number(n) => n,
            Seconds::Text(raw) => raw.trim().parse().map_err(|_| ExternalServiceError::Decode {
                service: SERVICE,
                message: format!("expires_in '{raw}' is not a number of seconds"),
            })?,
        };
        Ok(AccessToken {
            secret: self.access_token,
            expires_in: Duration::from_secs(seconds),
        })
    }
}

async fn read_token(response: reqwest::Response) -> Result<AccessToken, ExternalServiceError> {
    let body: TokenResponse = ensure_success(SERVICE, response)
        .await?
        .json()
        .await
        .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;
    body.into_token()
}

/// Service principal login (`grant_type=client_credentials`).
pub struct ClientSecretSource {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretSource {
    pub fn new(
        client: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                authority_host.trim_end_matches('/'),
                tenant_id
            ),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenSource for ClientSecretSource {
    async fn fetch(&self) -> Result<AccessToken, ExternalServiceError> {
        let scope = format!("{MANAGEMENT_RESOURCE}.default");
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;
        read_token(response).await
    }
}

/// Managed identity of the host: App Service style when `IDENTITY_ENDPOINT`
/// is provided, the VM metadata service otherwise.
pub struct ManagedIdentitySource {
    client: reqwest::Client,
    endpoint: String,
    api_version: &'static str,
    header: (&'static str, String),
    client_id: Option<String>,
}

impl ManagedIdentitySource {
    pub const IMDS_ENDPOINT: &'static str = "http://169.254.169.254/metadata/identity/oauth2/token";

    pub fn imds(client: reqwest::Client, client_id: Option<String>) -> Self {
        Self {
            client,
            endpoint: Self::IMDS_ENDPOINT.to_string(),
            api_version: "2018-02-01",
            header: ("Metadata", "true".to_string()),
            client_id,
        }
    }

    pub fn app_service(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        identity_header: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_version: "2019-08-01",
            header: ("X-IDENTITY-HEADER", identity_header.into()),
            client_id,
        }
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![
            ("api-version", self.api_version),
            ("resource", MANAGEMENT_RESOURCE),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }
        query
    }
}

#[async_trait]
impl TokenSource for ManagedIdentitySource {
    async fn fetch(&self) -> Result<AccessToken, ExternalServiceError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&self.query())
            .header(self.header.0, &self.header.1)
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;
        read_token(response).await
    }
}

struct CachedToken {
    secret: String,
    refresh_at: Instant,
}

/// Token cache in front of a `TokenSource`.
///
/// Concurrent callers wait on the same refresh instead of each fetching.
pub struct AzureCredential {
    source: Box<dyn TokenSource>,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredential").finish_non_exhaustive()
    }
}

impl AzureCredential {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    pub fn from_config(config: &AzureAuthConfig, client: reqwest::Client) -> Self {
        match config {
            AzureAuthConfig::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                client_secret,
            } => Self::new(ClientSecretSource::new(
                client,
                authority_host,
                tenant_id,
                client_id.clone(),
                client_secret.clone(),
            )),
            AzureAuthConfig::ManagedIdentity {
                endpoint: Some((endpoint, header)),
                client_id,
            } => Self::new(ManagedIdentitySource::app_service(
                client,
                endpoint.clone(),
                header.clone(),
                client_id.clone(),
            )),
            AzureAuthConfig::ManagedIdentity {
                endpoint: None,
                client_id,
            } => Self::new(ManagedIdentitySource::imds(client, client_id.clone())),
        }
    }

    /// Current token, fetching a new one if the cached one is close to expiry.
    pub async fn bearer(&self) -> Result<String, ExternalServiceError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.secret.clone());
        }

        let fresh = self.source.fetch().await?;
        let valid_for = fresh.expires_in.saturating_sub(REFRESH_MARGIN);
        info!(valid_secs = fresh.expires_in.as_secs(), "acquired management token");
        *cached = Some(CachedToken {
            secret: fresh.secret.clone(),
            refresh_at: Instant::now() + valid_for,
        });
        Ok(fresh.secret)
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        debug!("management token invalidated");
        *self.cached.lock().await = None;
    }
}
