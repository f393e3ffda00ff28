use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use aetos_core::ScrapeJobId;

use super::ExternalServiceError;

/// Status reported by the scraper for a job.
///
/// Anything outside the known vocabulary is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScrapeJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Error,
    Other(String),
}

impl ScrapeJobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "error" => Self::Error,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ScrapeJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One matched marketplace listing, flattened from the scraper payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeMatch {
    pub url: String,
    pub title: String,
    pub price: Decimal,
    pub product_id: i64,
    pub brand: String,
    pub model: String,
    /// 0..=100
    pub confidence: Decimal,
    pub potential_profit: Decimal,
}

/// Result payload of a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeJobResult {
    pub matches: Vec<ScrapeMatch>,
    /// Match entries that could not be decoded and were dropped.
    pub undecodable: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeJobSnapshot {
    pub job_id: ScrapeJobId,
    pub status: ScrapeJobStatus,
    pub result: Option<ScrapeJobResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredJob {
    pub job_id: ScrapeJobId,
    pub status: ScrapeJobStatus,
}

/// The external scraping service.
#[async_trait]
pub trait ScraperJobService: Send + Sync {
    async fn trigger(&self, brand: &str, search: &str) -> Result<TriggeredJob, ExternalServiceError>;

    async fn get_status(&self, job_id: ScrapeJobId)
    -> Result<ScrapeJobSnapshot, ExternalServiceError>;
}

#[async_trait]
impl<S> ScraperJobService for Arc<S>
where
    S: ScraperJobService + ?Sized,
{
    async fn trigger(&self, brand: &str, search: &str) -> Result<TriggeredJob, ExternalServiceError> {
        (**self).trigger(brand, search).await
    }

    async fn get_status(
        &self,
        job_id: ScrapeJobId,
    ) -> Result<ScrapeJobSnapshot, ExternalServiceError> {
        (**self).get_status(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_is_case_insensitive_and_keeps_unknowns() {
        assert_eq!(ScrapeJobStatus::parse("Completed"), ScrapeJobStatus::Completed);
        assert_eq!(ScrapeJobStatus::parse(" error "), ScrapeJobStatus::Error);

        let drifted = ScrapeJobStatus::parse("queued_for_retry");
        assert_eq!(drifted, ScrapeJobStatus::Other("queued_for_retry".to_string()));
        assert_eq!(drifted.to_string(), "queued_for_retry");
    }
}
