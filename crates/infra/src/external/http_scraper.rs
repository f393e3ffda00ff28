//! HTTP client for the scraper service.
//!
//! - `POST {base}/scrape` with `{brand, search}` starts a job.
//! - `GET {base}/scrape/{job_id}` reports its status and, once completed, the
//!   nested match list.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aetos_core::ScrapeJobId;

use super::scraper::{
    ScrapeJobResult, ScrapeJobSnapshot, ScrapeJobStatus, ScrapeMatch, ScraperJobService,
    TriggeredJob,
};
use super::{ExternalServiceError, ensure_success};
use crate::config::ScraperConfig;

const SERVICE: &str = "scraper";

/// Scraper service client.
#[derive(Debug, Clone)]
pub struct HttpScraperClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    brand: &'a str,
    search: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScrapeStarted {
    job_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    job_id: String,
    status: String,
    #[serde(default)]
    result: Option<JobResultPayload>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResultPayload {
    #[serde(default)]
    matches: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    listing: RawListing,
    product: RawProduct,
    confidence: Decimal,
    potential_profit: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawListing {
    url: String,
    title: String,
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    id: i64,
    brand: String,
    model: String,
}

impl From<RawMatch> for ScrapeMatch {
    fn from(raw: RawMatch) -> Self {
        ScrapeMatch {
            url: raw.listing.url,
            title: raw.listing.title,
            price: raw.listing.price,
            product_id: raw.product.id,
            brand: raw.product.brand,
            model: raw.product.model,
            confidence: raw.confidence,
            potential_profit: raw.potential_profit,
        }
    }
}

impl HttpScraperClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, ExternalServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

fn parse_job_id(raw: &str) -> Result<ScrapeJobId, ExternalServiceError> {
    raw.parse().map_err(|e| ExternalServiceError::Decode {
        service: SERVICE,
        message: format!("job id '{raw}': {e}"),
    })
}

/// Flatten the nested match list, dropping entries that do not decode.
fn decode_matches(raw: Vec<serde_json::Value>) -> ScrapeJobResult {
    let mut result = ScrapeJobResult::default();
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<RawMatch>(value) {
            Ok(m) => result.matches.push(m.into()),
            Err(e) => {
                warn!(index, error = %e, "dropping undecodable scrape match");
                result.undecodable += 1;
            }
        }
    }
    result
}

fn decode_status(body: JobStatusResponse) -> Result<ScrapeJobSnapshot, ExternalServiceError> {
    Ok(ScrapeJobSnapshot {
        job_id: parse_job_id(&body.job_id)?,
        status: ScrapeJobStatus::parse(&body.status),
        result: body.result.map(|r| decode_matches(r.matches)),
        error: body.error,
    })
}

#[async_trait]
impl ScraperJobService for HttpScraperClient {
    async fn trigger(&self, brand: &str, search: &str) -> Result<TriggeredJob, ExternalServiceError> {
        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&ScrapeRequest { brand, search })
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        let started: ScrapeStarted = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        let job = TriggeredJob {
            job_id: parse_job_id(&started.job_id)?,
            status: ScrapeJobStatus::parse(&started.status),
        };
        info!(job_id = %job.job_id, brand, search, status = %job.status, "scrape job started");
        Ok(job)
    }

    async fn get_status(
        &self,
        job_id: ScrapeJobId,
    ) -> Result<ScrapeJobSnapshot, ExternalServiceError> {
        let response = self
            .client
            .get(format!("{}/scrape/{}", self.base_url, job_id))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        let body: JobStatusResponse = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        decode_status(body)
    }
}
