//! Job polling coordinator.
//!
//! One loop per triggered scrape job: sleep, check status, and on a terminal
//! status ingest (if completed) and release the compute resource. Every
//! single-attempt failure is logged and counted against the ceiling; nothing
//! aborts the loop early except a terminal status or cancellation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{PollError, PollOutcome, PollTarget, PollingPolicy};
use crate::external::{ComputeResourceManager, ScrapeJobStatus, ScraperJobService};
use crate::use_cases::{MatchBatch, MatchIngestor};

/// `triggered_by` recorded on listings created from polled results.
pub const POLLER_SOURCE: &str = "scrape_poller";

pub struct PollingCoordinator<S, C, I> {
    scraper: Arc<S>,
    compute: Arc<C>,
    ingestor: Arc<I>,
    policy: PollingPolicy,
    resource_name: String,
}

impl<S, C, I> Clone for PollingCoordinator<S, C, I> {
    fn clone(&self) -> Self {
        Self {
            scraper: self.scraper.clone(),
            compute: self.compute.clone(),
            ingestor: self.ingestor.clone(),
            policy: self.policy,
            resource_name: self.resource_name.clone(),
        }
    }
}

impl<S, C, I> PollingCoordinator<S, C, I>
where
    S: ScraperJobService,
    C: ComputeResourceManager,
    I: MatchIngestor,
{
    pub fn new(
        scraper: Arc<S>,
        compute: Arc<C>,
        ingestor: Arc<I>,
        policy: PollingPolicy,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            scraper,
            compute,
            ingestor,
            policy,
            resource_name: resource_name.into(),
        }
    }

    pub fn policy(&self) -> PollingPolicy {
        self.policy
    }

    /// Poll `target` until it finishes, the ceiling is hit, or `cancel` fires.
    ///
    /// The compute resource is released on every exit path.
    pub async fn run(&self, target: PollTarget, cancel: CancellationToken) -> PollOutcome {
        let mut attempts = 0;
        info!(
            job_id = %target.job_id,
            brand = %target.brand,
            max_attempts = self.policy.max_attempts,
            interval_secs = self.policy.interval.as_secs(),
            "polling started"
        );

        while self.policy.should_poll(attempts) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(job_id = %target.job_id, attempts, "polling cancelled");
                    self.release(&target).await;
                    return PollOutcome::Cancelled { attempts };
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            attempts += 1;
            debug!(
                job_id = %target.job_id,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                "checking scrape job"
            );

            match self.poll_once(&target, attempts).await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) => {
                    error!(
                        job_id = %target.job_id,
                        attempt = attempts,
                        error = %e,
                        "polling attempt failed; will retry"
                    );
                }
            }
        }

        warn!(
            job_id = %target.job_id,
            attempts,
            waited_secs = self.policy.max_lifetime().as_secs(),
            "polling gave up before the job completed"
        );
        self.release(&target).await;
        PollOutcome::TimedOut { attempts }
    }

    async fn poll_once(
        &self,
        target: &PollTarget,
        attempts: u32,
    ) -> Result<Option<PollOutcome>, PollError> {
        let snapshot = self.scraper.get_status(target.job_id).await?;
        if snapshot.job_id != target.job_id {
            return Err(PollError::MalformedResult(format!(
                "asked for job {} but got job {}",
                target.job_id, snapshot.job_id
            )));
        }

        match snapshot.status {
            ScrapeJobStatus::Completed => {
                let result = snapshot.result.unwrap_or_default();
                info!(
                    job_id = %target.job_id,
                    matches = result.matches.len(),
                    undecodable = result.undecodable,
                    "scrape job completed"
                );

                let outcome = self
                    .ingestor
                    .ingest(MatchBatch {
                        job_id: target.job_id,
                        brand: target.brand.clone(),
                        matches: result.matches,
                        source: POLLER_SOURCE.to_string(),
                    })
                    .await?;

                self.release(target).await;
                Ok(Some(PollOutcome::Completed {
                    created: outcome.created,
                    skipped: outcome.skipped + result.undecodable,
                    attempts,
                }))
            }
            ScrapeJobStatus::Failed | ScrapeJobStatus::Error => {
                error!(
                    job_id = %target.job_id,
                    status = %snapshot.status,
                    error = snapshot.error.as_deref().unwrap_or("unknown error"),
                    "scrape job failed"
                );
                self.release(target).await;
                Ok(Some(PollOutcome::Failed {
                    status: snapshot.status,
                    error: snapshot.error,
                    attempts,
                }))
            }
            ScrapeJobStatus::Pending | ScrapeJobStatus::Running => {
                debug!(job_id = %target.job_id, status = %snapshot.status, "scrape job still in progress");
                Ok(None)
            }
            ScrapeJobStatus::Other(raw) => {
                warn!(
                    job_id = %target.job_id,
                    status = %raw,
                    attempt = attempts,
                    "unrecognised scrape job status; treating as retryable"
                );
                Ok(None)
            }
        }
    }

    /// Stop the compute resource. Failures are logged, never retried.
    async fn release(&self, target: &PollTarget) {
        match self.compute.stop(&self.resource_name).await {
            Ok(()) => info!(
                job_id = %target.job_id,
                resource = %self.resource_name,
                "compute resource released"
            ),
            Err(e) => error!(
                job_id = %target.job_id,
                resource = %self.resource_name,
                error = %e,
                "failed to release compute resource"
            ),
        }
    }
}
