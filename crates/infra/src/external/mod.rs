//! External service clients/adapters.
//!
//! Ports the job flow consumes (`ScraperJobService`, `ComputeResourceManager`)
//! and their HTTP implementations. Every call carries a per-request timeout.

pub mod azure;
pub mod azure_auth;
pub mod compute;
pub mod http_scraper;
pub mod scraper;

use thiserror::Error;

pub use azure::AzureContainerManager;
pub use azure_auth::{AzureCredential, TokenSource};
pub use compute::ComputeResourceManager;
pub use http_scraper::HttpScraperClient;
pub use scraper::{
    ScrapeJobResult, ScrapeJobSnapshot, ScrapeJobStatus, ScrapeMatch, ScraperJobService,
    TriggeredJob,
};

/// Failure talking to the scraper service or the compute control plane.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to reach {service}: {message}")]
    Unreachable {
        service: &'static str,
        message: String,
    },

    #[error("{service} did not answer in time")]
    Timeout { service: &'static str },

    #[error("failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl ExternalServiceError {
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service }
        } else if err.is_decode() {
            Self::Decode {
                service,
                message: err.to_string(),
            }
        } else {
            Self::Unreachable {
                service,
                message: err.to_string(),
            }
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            Self::Status { service, .. }
            | Self::Unreachable { service, .. }
            | Self::Timeout { service }
            | Self::Decode { service, .. } => service,
        }
    }
}

/// Turn a non-success response into `ExternalServiceError::Status`.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ExternalServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ExternalServiceError::Status {
        service,
        status,
        body,
    })
}
