//! Configuration loading and representation.
//!
//! Read once at startup; each collaborator is handed only its own section.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub compute: ComputeConfig,
    pub polling: PollingConfig,
    pub schedule: ScheduleConfig,
    pub event_bus: EventBusConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ComputeConfig {
    pub management_url: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub auth: AzureAuthConfig,
    /// Container group hosting the scraper.
    pub container_name: String,
    pub warmup: Duration,
    pub timeout: Duration,
}

/// How management-plane tokens are obtained.
///
/// A service principal when `AZURE_CLIENT_SECRET` is set, otherwise the
/// host's managed identity.
#[derive(Clone, PartialEq, Eq)]
pub enum AzureAuthConfig {
    ClientSecret {
        authority_host: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    ManagedIdentity {
        /// `(IDENTITY_ENDPOINT, IDENTITY_HEADER)` on App Service / Container Apps.
        endpoint: Option<(String, String)>,
        /// User-assigned identity; `None` for the system identity.
        client_id: Option<String>,
    },
}

impl std::fmt::Debug for AzureAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("authority_host", authority_host)
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Self::ManagedIdentity { endpoint, client_id } => f
                .debug_struct("ManagedIdentity")
                .field("endpoint", &endpoint.as_ref().map(|(url, _)| url))
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

impl AzureAuthConfig {
    /// Resolve from variables looked up through `var`, using the names the
    /// Azure SDKs read.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let client_id = var("AZURE_CLIENT_ID");

        if let Some(client_secret) = var("AZURE_CLIENT_SECRET") {
            return Ok(Self::ClientSecret {
                authority_host: var("AZURE_AUTHORITY_HOST")
                    .unwrap_or_else(|| "https://login.microsoftonline.com".to_string()),
                tenant_id: var("AZURE_TENANT_ID")
                    .context("AZURE_TENANT_ID must be set with AZURE_CLIENT_SECRET")?,
                client_id: client_id
                    .context("AZURE_CLIENT_ID must be set with AZURE_CLIENT_SECRET")?,
                client_secret,
            });
        }

        let endpoint = match (var("IDENTITY_ENDPOINT"), var("IDENTITY_HEADER")) {
            (Some(url), Some(header)) => Some((url, header)),
            (Some(_), None) => bail!("IDENTITY_ENDPOINT is set but IDENTITY_HEADER is not"),
            _ => None,
        };
        Ok(Self::ManagedIdentity { endpoint, client_id })
    }
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// UTC hours at which a scrape is started.
    pub hours: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Unset means events are only logged.
    pub redis_url: Option<String>,
    pub channel_prefix: String,
}

impl Settings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let http_timeout = Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 30)?);

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            },
            scraper: ScraperConfig {
                base_url: string_or("SCRAPER_API_URL", "http://scraperv2:8000"),
                api_key: string_or("SCRAPER_API_KEY", ""),
                timeout: http_timeout,
            },
            compute: ComputeConfig {
                management_url: string_or("AZURE_MANAGEMENT_URL", "https://management.azure.com"),
                subscription_id: env::var("AZURE_SUBSCRIPTION_ID")
                    .context("AZURE_SUBSCRIPTION_ID must be set")?,
                resource_group: env::var("AZURE_RESOURCE_GROUP")
                    .context("AZURE_RESOURCE_GROUP must be set")?,
                auth: AzureAuthConfig::from_vars(|key| env::var(key).ok())?,
                container_name: string_or("SCRAPER_CONTAINER", "scraperv2"),
                warmup: Duration::from_secs(parse_or("SCRAPER_WARMUP_SECS", 30)?),
                timeout: http_timeout,
            },
            polling: PollingConfig {
                interval: Duration::from_secs(parse_or("POLL_INTERVAL_SECS", 180)?),
                max_attempts: parse_or("POLL_MAX_ATTEMPTS", 40)?,
            },
            schedule: ScheduleConfig {
                hours: parse_hours(&string_or("SCRAPE_SCHEDULE_HOURS", "9,14,21"))
                    .context("SCRAPE_SCHEDULE_HOURS must be a comma-separated list of hours")?,
            },
            event_bus: EventBusConfig {
                redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
                channel_prefix: string_or("EVENT_CHANNEL_PREFIX", "orchestrator.events"),
            },
            log_level: string_or("LOG_LEVEL", "info"),
        })
    }
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

/// Parse `"9, 14,21"` into sorted, de-duplicated UTC hours.
pub fn parse_hours(raw: &str) -> Result<Vec<u32>> {
    let mut hours = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let hour: u32 = part.parse().with_context(|| format!("invalid hour '{part}'"))?;
        if hour > 23 {
            bail!("hour {hour} is out of range 0..=23");
        }
        hours.push(hour);
    }
    if hours.is_empty() {
        bail!("at least one hour is required");
    }
    hours.sort_unstable();
    hours.dedup();
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hours_are_sorted_and_deduplicated() {
        assert_eq!(parse_hours("21, 9,14,9").unwrap(), vec![9, 14, 21]);
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn client_secret_selects_the_service_principal() {
        let auth = AzureAuthConfig::from_vars(vars(&[
            ("AZURE_TENANT_ID", "tenant-1"),
            ("AZURE_CLIENT_ID", "app-1"),
            ("AZURE_CLIENT_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(
            auth,
            AzureAuthConfig::ClientSecret {
                authority_host: "https://login.microsoftonline.com".to_string(),
                tenant_id: "tenant-1".to_string(),
                client_id: "app-1".to_string(),
                client_secret: "s3cret".to_string(),
            }
        );
        assert!(!format!("{auth:?}").contains("s3cret"));
    }

    #[test]
    fn client_secret_without_tenant_is_rejected() {
        let err = AzureAuthConfig::from_vars(vars(&[
            ("AZURE_CLIENT_ID", "app-1"),
            ("AZURE_CLIENT_SECRET", "s3cret"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("AZURE_TENANT_ID"));
    }

    #[test]
    fn without_a_secret_the_managed_identity_is_used() {
        assert_eq!(
            AzureAuthConfig::from_vars(vars(&[])).unwrap(),
            AzureAuthConfig::ManagedIdentity {
                endpoint: None,
                client_id: None,
            }
        );
        assert_eq!(
            AzureAuthConfig::from_vars(vars(&[
                ("IDENTITY_ENDPOINT", "http://localhost:42356/msi/token"),
                ("IDENTITY_HEADER", "hdr"),
                ("AZURE_CLIENT_ID", "app-2"),
            ]))
            .unwrap(),
            AzureAuthConfig::ManagedIdentity {
                endpoint: Some(("http://localhost:42356/msi/token".to_string(), "hdr".to_string())),
                client_id: Some("app-2".to_string()),
            }
        );
        assert!(AzureAuthConfig::from_vars(vars(&[("IDENTITY_ENDPOINT", "http://x")])).is_err());
    }

    #[test]
    fn hours_reject_out_of_range_and_empty_lists() {
        assert!(parse_hours("9,24").is_err());
        assert!(parse_hours(" , ").is_err());
        assert!(parse_hours("nine").is_err());
    }
}
