//! Azure Container Instances control plane over the ARM REST API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::azure_auth::AzureCredential;
use super::compute::ComputeResourceManager;
use super::{ExternalServiceError, ensure_success};
use crate::config::ComputeConfig;

const SERVICE: &str = "azure-container-instances";
const API_VERSION: &str = "2023-05-01";

/// Starts and stops a container group, authenticating with a refreshed
/// Azure AD token.
#[derive(Debug, Clone)]
pub struct AzureContainerManager {
    management_url: String,
    subscription_id: String,
    resource_group: String,
    credential: Arc<AzureCredential>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ContainerGroup {
    #[serde(default)]
    properties: Option<ContainerGroupProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerGroupProperties {
    #[serde(default)]
    instance_view: Option<InstanceView>,
}

#[derive(Debug, Deserialize)]
struct InstanceView {
    #[serde(default)]
    state: Option<String>,
}

impl ContainerGroup {
    fn state(self) -> String {
        self.properties
            .and_then(|p| p.instance_view)
            .and_then(|v| v.state)
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

impl AzureContainerManager {
    pub fn new(config: &ComputeConfig) -> Result<Self, ExternalServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        let credential = AzureCredential::from_config(&config.auth, client.clone());
        Ok(Self::with_credential(config, client, Arc::new(credential)))
    }

    pub fn with_credential(
        config: &ComputeConfig,
        client: reqwest::Client,
        credential: Arc<AzureCredential>,
    ) -> Self {
        Self {
            management_url: config.management_url.trim_end_matches('/').to_string(),
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            credential,
            client,
        }
    }

    fn group_url(&self, name: &str, action: Option<&str>) -> String {
        let mut url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups/{}",
            self.management_url, self.subscription_id, self.resource_group, name
        );
        if let Some(action) = action {
            url.push('/');
            url.push_str(action);
        }
        url.push_str("?api-version=");
        url.push_str(API_VERSION);
        url
    }

    async fn send_once(&self, method: &Method, url: &str) -> Result<reqwest::Response, ExternalServiceError> {
        let token = self.credential.bearer().await?;
        let mut request = self.client.request(method.clone(), url).bearer_auth(token);
        if *method == Method::POST {
            request = request.header(reqwest::header::CONTENT_LENGTH, "0");
        }
        request
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))
    }

    /// Send with the cached token; on 401 drop it and retry once with a new one.
    async fn send(&self, method: Method, url: String) -> Result<reqwest::Response, ExternalServiceError> {
        let response = self.send_once(&method, &url).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(SERVICE, response).await;
        }

        warn!(%url, "management token rejected; fetching a new one");
        self.credential.invalidate().await;
        let response = self.send_once(&method, &url).await?;
        ensure_success(SERVICE, response).await
    }

    async fn post_action(&self, name: &str, action: &str) -> Result<(), ExternalServiceError> {
        self.send(Method::POST, self.group_url(name, Some(action))).await?;
        Ok(())
    }
}

#[async_trait]
impl ComputeResourceManager for AzureContainerManager {
    async fn start(&self, name: &str) -> Result<(), ExternalServiceError> {
        info!(container = name, resource_group = %self.resource_group, "starting container");
        match self.post_action(name, "start").await {
            Ok(()) => {
                info!(container = name, "container started");
                Ok(())
            }
            Err(e) => {
                error!(container = name, error = %e, "failed to start container");
                Err(e)
            }
        }
    }

    async fn stop(&self, name: &str) -> Result<(), ExternalServiceError> {
        info!(container = name, resource_group = %self.resource_group, "stopping container");
        match self.post_action(name, "stop").await {
            Ok(()) => {
                info!(container = name, "container stopped");
                Ok(())
            }
            Err(e) => {
                error!(container = name, error = %e, "failed to stop container");
                Err(e)
            }
        }
    }

    async fn status(&self, name: &str) -> Result<String, ExternalServiceError> {
        let group: ContainerGroup = self
            .send(Method::GET, self.group_url(name, None))
            .await?
            .json()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;
        Ok(group.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::AzureAuthConfig;

    fn manager() -> AzureContainerManager {
        AzureContainerManager::new(&ComputeConfig {
            management_url: "https://management.azure.com/".to_string(),
            subscription_id: "sub-1".to_string(),
            resource_group: "rg-aetos".to_string(),
            auth: AzureAuthConfig::ManagedIdentity {
                endpoint: None,
                client_id: None,
            },
            container_name: "scraperv2".to_string(),
            warmup: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        })
        .unwrap()
    }

    #[test]
    fn action_urls_target_the_container_group() {
        assert_eq!(
            manager().group_url("scraperv2", Some("stop")),
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg-aetos/providers/Microsoft.ContainerInstance/containerGroups/scraperv2/stop?api-version=2023-05-01"
        );
    }

    #[test]
    fn missing_instance_view_reads_as_unknown() {
        let running: ContainerGroup = serde_json::from_str(
            r#"{"properties":{"instanceView":{"state":"Running"}}}"#,
        )
        .unwrap();
        let bare: ContainerGroup = serde_json::from_str(r#"{"properties":{}}"#).unwrap();

        assert_eq!(running.state(), "Running");
        assert_eq!(bare.state(), "Unknown");
    }
}
