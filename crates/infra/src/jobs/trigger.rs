//! Scrape trigger flow: start the compute resource, wait for warm-up, submit
//! the job, announce it, and hand it to a registered poller.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use aetos_core::ScrapeJobId;
use aetos_events::EventPublisher;
use aetos_listings::{ListingEvent, ScraperJobCreated};

use super::coordinator::PollingCoordinator;
use super::registry::{PollingRegistry, RegistryError};
use super::types::{PollTarget, PollingPolicy};
use crate::config::ComputeConfig;
use crate::external::{ComputeResourceManager, ExternalServiceError, ScraperJobService};
use crate::use_cases::MatchIngestor;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to start compute resource: {0}")]
    ComputeStart(#[source] ExternalServiceError),

    #[error("failed to trigger scrape job: {0}")]
    JobTrigger(#[source] ExternalServiceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What the caller gets back once a scrape is under way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggeredScrape {
    pub job_id: ScrapeJobId,
    pub status: String,
    pub brand: String,
    pub search: String,
}

/// Compute resource settings the trigger flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSettings {
    pub resource_name: String,
    pub warmup: Duration,
}

impl From<&ComputeConfig> for TriggerSettings {
    fn from(config: &ComputeConfig) -> Self {
        Self {
            resource_name: config.container_name.clone(),
            warmup: config.warmup,
        }
    }
}

pub struct ScrapeOrchestrator<S, C, I, P: ?Sized> {
    scraper: Arc<S>,
    compute: Arc<C>,
    publisher: Arc<P>,
    registry: Arc<PollingRegistry>,
    coordinator: PollingCoordinator<S, C, I>,
    settings: TriggerSettings,
}

impl<S, C, I, P> ScrapeOrchestrator<S, C, I, P>
where
    S: ScraperJobService + 'static,
    C: ComputeResourceManager + 'static,
    I: MatchIngestor + 'static,
    P: EventPublisher<ListingEvent> + ?Sized,
{
    pub fn new(
        scraper: Arc<S>,
        compute: Arc<C>,
        ingestor: Arc<I>,
        publisher: Arc<P>,
        registry: Arc<PollingRegistry>,
        policy: PollingPolicy,
        settings: TriggerSettings,
    ) -> Self {
        let coordinator = PollingCoordinator::new(
            scraper.clone(),
            compute.clone(),
            ingestor,
            policy,
            settings.resource_name.clone(),
        );
        Self {
            scraper,
            compute,
            publisher,
            registry,
            coordinator,
            settings,
        }
    }

    /// Kick off a scrape for `brand`. `search` defaults to the brand.
    ///
    /// Returns as soon as the job is submitted; polling continues in the
    /// background until the registry's poller finishes or is cancelled.
    pub async fn trigger(&self, brand: &str, search: Option<&str>) -> Result<TriggeredScrape, TriggerError> {
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(brand)
            .to_string();
        let resource = self.settings.resource_name.as_str();
        self.registry.ensure_accepting()?;

        info!(brand, search = %search, resource, "starting scrape");
        self.compute
            .start(resource)
            .await
            .map_err(TriggerError::ComputeStart)?;

        info!(warmup_secs = self.settings.warmup.as_secs(), "waiting for scraper warm-up");
        tokio::select! {
            _ = tokio::time::sleep(self.settings.warmup) => {}
            _ = self.registry.closed() => {
                info!(resource, "shutdown during warm-up; releasing compute resource");
                self.release_unpolled(resource).await;
                return Err(RegistryError::ShuttingDown.into());
            }
        }

        let job = match self.scraper.trigger(brand, &search).await {
            Ok(job) => job,
            Err(e) => {
                self.release_unpolled(resource).await;
                return Err(TriggerError::JobTrigger(e));
            }
        };

        let coordinator = self.coordinator.clone();
        let target = PollTarget {
            job_id: job.job_id,
            brand: brand.to_string(),
            search: search.clone(),
        };
        let registered = self.registry.spawn(job.job_id, move |cancel| async move {
            coordinator.run(target, cancel).await
        });
        if let Err(e) = registered {
            error!(job_id = %job.job_id, error = %e, "scrape job submitted but no poller could be registered");
            self.release_unpolled(resource).await;
            return Err(e.into());
        }

        self.publisher
            .publish(ListingEvent::ScraperJobCreated(ScraperJobCreated::new(
                job.job_id,
                brand,
                search.clone(),
            )))
            .await;

        info!(
            job_id = %job.job_id,
            poll_every_secs = self.coordinator.policy().interval.as_secs(),
            "scrape job submitted; polling in background"
        );
        Ok(TriggeredScrape {
            job_id: job.job_id,
            status: job.status.to_string(),
            brand: brand.to_string(),
            search,
        })
    }

    /// Stop the resource when no poller will ever do it. Best-effort.
    async fn release_unpolled(&self, resource: &str) {
        if let Err(e) = self.compute.stop(resource).await {
            error!(resource, error = %e, "failed to release compute resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use aetos_events::InMemoryEventPublisher;

    use crate::external::ScrapeJobStatus;

    use crate::jobs::coordinator::fakes::*;
    use crate::jobs::types::PollOutcome;

    type Orchestrator = ScrapeOrchestrator<
        ScriptedScraper,
        FakeCompute,
        RecordingIngestor,
        InMemoryEventPublisher<ListingEvent>,
    >;

    struct Harness {
        scraper: Arc<ScriptedScraper>,
        compute: Arc<FakeCompute>,
        publisher: Arc<InMemoryEventPublisher<ListingEvent>>,
        registry: Arc<PollingRegistry>,
        orchestrator: Orchestrator,
    }

    fn harness(script: Vec<Step>, compute: FakeCompute) -> Harness {
        let scraper = Arc::new(ScriptedScraper::new(ScrapeJobId::new(), script));
        let compute = Arc::new(compute);
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let registry = Arc::new(PollingRegistry::new());
        let orchestrator = ScrapeOrchestrator::new(
            scraper.clone(),
            compute.clone(),
            Arc::new(RecordingIngestor::default()),
            publisher.clone(),
            registry.clone(),
            PollingPolicy::default(),
            TriggerSettings {
                resource_name: "scraperv2".to_string(),
                warmup: Duration::from_secs(30),
            },
        );
        Harness {
            scraper,
            compute,
            publisher,
            registry,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_starts_announces_and_registers_a_poller() {
        let h = harness(
            vec![Step::Status(ScrapeJobStatus::Failed)],
            FakeCompute::default(),
        );

        let triggered = h.orchestrator.trigger("Sony", None).await.unwrap();

        assert_eq!(triggered.job_id, h.scraper.job_id);
        assert_eq!(triggered.status, "pending");
        assert_eq!(triggered.search, "Sony");
        assert_eq!(h.compute.starts(), 1);
        assert_eq!(
            *h.scraper.triggered.lock().unwrap(),
            vec![("Sony".to_string(), "Sony".to_string())]
        );
        assert!(h.registry.is_polling(triggered.job_id));

        let published = h.publisher.published();
        assert_eq!(published.len(), 1);
        assert!(matches!(
            &published[0],
            ListingEvent::ScraperJobCreated(e) if e.job_id == triggered.job_id && e.search == "Sony"
        ));

        let outcomes = h.registry.shutdown().await;
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn registered_poller_runs_to_completion() {
        let h = harness(
            vec![Step::Status(ScrapeJobStatus::Running), Step::Status(ScrapeJobStatus::Failed)],
            FakeCompute::default(),
        );

        let triggered = h.orchestrator.trigger("Canon", Some("canon r6")).await.unwrap();
        assert_eq!(triggered.search, "canon r6");

        tokio::time::sleep(Duration::from_secs(3 * 180)).await;

        assert!(!h.registry.is_polling(triggered.job_id));
        assert_eq!(h.scraper.calls(), 2);
        assert_eq!(h.compute.stops(), 1);
        assert!(h.registry.shutdown().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn compute_start_failure_is_fatal_and_submits_nothing() {
        let h = harness(
            vec![],
            FakeCompute {
                fail_start: true,
                ..FakeCompute::default()
            },
        );

        let err = h.orchestrator.trigger("Sony", None).await.unwrap_err();

        assert!(matches!(err, TriggerError::ComputeStart(_)));
        assert!(h.scraper.triggered.lock().unwrap().is_empty());
        assert!(h.publisher.published().is_empty());
        assert_eq!(h.registry.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn job_trigger_failure_releases_the_resource() {
        let h = harness(vec![], FakeCompute::default());
        *h.scraper.trigger_error.lock().unwrap() = Some(ExternalServiceError::Status {
            service: "scraper",
            status: 503,
            body: "busy".to_string(),
        });

        let err = h.orchestrator.trigger("Sony", None).await.unwrap_err();

        assert!(matches!(err, TriggerError::JobTrigger(_)));
        assert_eq!(h.compute.starts(), 1);
        assert_eq!(h.compute.stops(), 1);
        assert_eq!(h.registry.active(), 0);
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutting_down_registry_refuses_before_starting_compute() {
        let h = harness(vec![], FakeCompute::default());
        assert!(h.registry.shutdown().await.is_empty());

        let err = h.orchestrator.trigger("Sony", None).await.unwrap_err();

        assert!(matches!(err, TriggerError::Registry(RegistryError::ShuttingDown)));
        assert_eq!(h.compute.starts(), 0);
        assert!(h.scraper.triggered.lock().unwrap().is_empty());
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_warmup_releases_the_resource() {
        let h = harness(vec![], FakeCompute::default());
        let registry = h.registry.clone();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            registry.shutdown().await
        });

        let started = tokio::time::Instant::now();
        let err = h.orchestrator.trigger("Sony", None).await.unwrap_err();
        stopper.await.unwrap();

        assert!(matches!(err, TriggerError::Registry(RegistryError::ShuttingDown)));
        assert!(started.elapsed() < h.orchestrator.settings.warmup);
        assert_eq!(h.compute.starts(), 1);
        assert!(h.scraper.triggered.lock().unwrap().is_empty());
        assert_eq!(h.compute.stops(), 1);
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_job_id_releases_the_resource_and_announces_nothing() {
        let h = harness(vec![], FakeCompute::default());
        h.orchestrator.trigger("Sony", None).await.unwrap();
        assert_eq!(h.publisher.published().len(), 1);

        let err = h.orchestrator.trigger("Sony", None).await.unwrap_err();

        assert!(matches!(err, TriggerError::Registry(RegistryError::AlreadyPolling(id)) if id == h.scraper.job_id));
        assert_eq!(h.compute.starts(), 2);
        assert_eq!(h.compute.stops(), 1);
        assert_eq!(h.publisher.published().len(), 1);
        h.registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_background_pollers() {
        let h = harness(vec![], FakeCompute::default());
        let triggered = h.orchestrator.trigger("Nikon", None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2 * 180 + 5)).await;
        let outcomes = h.registry.shutdown().await;

        assert_eq!(
            outcomes,
            vec![(triggered.job_id, PollOutcome::Cancelled { attempts: 2 })]
        );
        assert_eq!(h.compute.stops(), 1);
    }
}
