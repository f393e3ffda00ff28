//! Core polling types and policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use aetos_core::{ListingId, ScrapeJobId};

use crate::config::PollingConfig;
use crate::external::{ExternalServiceError, ScrapeJobStatus};
use crate::use_cases::UseCaseError;

/// How long and how often to poll a scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingPolicy {
    /// Sleep before each status check.
    pub interval: Duration,
    /// Ceiling on status checks, failed ones included.
    pub max_attempts: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::fixed(40, Duration::from_secs(180))
    }
}

impl PollingPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest time a poller can stay alive.
    pub fn max_lifetime(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }

    pub fn should_poll(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl From<&PollingConfig> for PollingPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self::fixed(config.max_attempts, config.interval)
    }
}

/// The job a poller is watching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTarget {
    pub job_id: ScrapeJobId,
    pub brand: String,
    pub search: String,
}

/// How a polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Results ingested; `skipped` includes undecodable matches.
    Completed {
        created: Vec<ListingId>,
        skipped: usize,
        attempts: u32,
    },
    /// The scraper reported `failed`/`error`.
    Failed {
        status: ScrapeJobStatus,
        error: Option<String>,
        attempts: u32,
    },
    /// Attempt ceiling reached without completion.
    TimedOut { attempts: u32 },
    /// Stopped by shutdown or an explicit cancel.
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Completed { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// A single failed polling attempt. Counted against the ceiling, never fatal.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("status check failed: {0}")]
    Status(#[from] ExternalServiceError),

    #[error("ingestion failed: {0}")]
    Ingest(#[from] UseCaseError),

    #[error("malformed job result: {0}")]
    MalformedResult(String),
}
