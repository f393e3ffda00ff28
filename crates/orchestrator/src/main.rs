//! Scheduled scrape orchestrator.
//!
//! Wakes at each configured UTC hour, picks the next brand from the search
//! rotation, and triggers a scrape. Pollers keep running in the background;
//! Ctrl-C cancels and awaits all of them before exit, including a scrape that
//! is still warming up.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aetos_events::{EventPublisher, NoopEventPublisher};
use aetos_infra::config::{EventBusConfig, Settings};
use aetos_infra::db;
use aetos_infra::external::{AzureContainerManager, HttpScraperClient};
use aetos_infra::jobs::{PollingPolicy, PollingRegistry, RunSchedule, ScrapeOrchestrator, TriggerSettings};
use aetos_infra::search_rotation::{PostgresSearchRotation, SearchRotation};
use aetos_infra::use_cases::PgListingService;
use aetos_listings::ListingEvent;

type SharedPublisher = dyn EventPublisher<ListingEvent>;

type Orchestrator = ScrapeOrchestrator<
    HttpScraperClient,
    AzureContainerManager,
    PgListingService<SharedPublisher>,
    SharedPublisher,
>;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    aetos_observability::init(&settings.log_level);

    let pool = db::connect(&settings.database)
        .await
        .context("failed to connect to database")?;
    db::migrate(&pool).await.context("failed to run migrations")?;

    let publisher = build_publisher(&settings.event_bus)?;
    let service = Arc::new(PgListingService::new(pool.clone(), publisher.clone()));
    let registry = Arc::new(PollingRegistry::new());

    let orchestrator: Orchestrator = ScrapeOrchestrator::new(
        Arc::new(HttpScraperClient::new(&settings.scraper)?),
        Arc::new(AzureContainerManager::new(&settings.compute)?),
        service,
        publisher,
        registry.clone(),
        PollingPolicy::from(&settings.polling),
        TriggerSettings::from(&settings.compute),
    );
    let rotation = PostgresSearchRotation::new(pool.clone());
    let schedule = RunSchedule::from_config(&settings.schedule)?;

    info!(hours = ?schedule.hours(), "orchestrator started");

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_ctrl_c(shutdown.clone()));

    let (orchestrator, rotation) = (&orchestrator, &rotation);
    drive_schedule(&schedule, &shutdown, &registry, move || run_scheduled(orchestrator, rotation)).await;

    for (job_id, outcome) in registry.shutdown().await {
        info!(%job_id, outcome = ?outcome, "poller stopped");
    }
    pool.close().await;
    Ok(())
}

async fn forward_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "failed to listen for ctrl-c; shutting down"),
    }
    shutdown.cancel();
}

/// Run `run` at every scheduled hour until `shutdown` fires.
///
/// A run in flight when shutdown arrives is not dropped: the registry is
/// closed so the trigger releases what it holds, and the run is awaited.
async fn drive_schedule<F, Fut>(
    schedule: &RunSchedule,
    shutdown: &CancellationToken,
    registry: &PollingRegistry,
    mut run: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "waiting for next scheduled scrape");

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let scheduled = run();
        tokio::pin!(scheduled);
        tokio::select! {
            biased;
            _ = &mut scheduled => {}
            _ = shutdown.cancelled() => {
                info!("shutdown requested during a scheduled scrape; unwinding it");
                registry.close();
                scheduled.await;
                break;
            }
        }
    }
}

/// One scheduled run. Failures are logged; the schedule keeps going.
async fn run_scheduled(orchestrator: &Orchestrator, rotation: &PostgresSearchRotation) {
    let next = match rotation.next_search().await {
        Ok(Some(next)) => next,
        Ok(None) => {
            warn!("no enabled search rotation entries; skipping scheduled scrape");
            return;
        }
        Err(e) => {
            error!(error = %e, "failed to read search rotation");
            return;
        }
    };

    info!(brand = %next.brand, search = %next.search, "scheduled scrape");
    match orchestrator.trigger(&next.brand, Some(&next.search)).await {
        Ok(started) => info!(job_id = %started.job_id, brand = %started.brand, "scheduled scrape started"),
        Err(e) => error!(brand = %next.brand, error = %e, "scheduled scrape failed to start"),
    }
}

#[cfg(feature = "redis")]
fn build_publisher(config: &EventBusConfig) -> Result<Arc<SharedPublisher>> {
    use aetos_infra::event_bus::RedisEventPublisher;

    match RedisEventPublisher::<ListingEvent>::from_config(config)? {
        Some(redis) => {
            info!(prefix = %config.channel_prefix, "publishing events to redis");
            Ok(Arc::new(redis))
        }
        None => Ok(Arc::new(NoopEventPublisher::<ListingEvent>::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn build_publisher(config: &EventBusConfig) -> Result<Arc<SharedPublisher>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but the redis feature is disabled; events will be discarded");
    }
    Ok(Arc::new(NoopEventPublisher::<ListingEvent>::new()))
}
