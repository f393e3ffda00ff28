//! Process-wide registry of running polling tasks.
//!
//! Every poller gets a child of the registry's root `CancellationToken`, so
//! shutdown can signal all of them at once and then await each task instead of
//! leaving them detached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use aetos_core::ScrapeJobId;

use super::types::PollOutcome;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} is already being polled")]
    AlreadyPolling(ScrapeJobId),

    #[error("polling registry is shutting down")]
    ShuttingDown,
}

struct PollingTask {
    cancel: CancellationToken,
    handle: JoinHandle<PollOutcome>,
}

#[derive(Default)]
pub struct PollingRegistry {
    root: CancellationToken,
    tasks: Mutex<HashMap<ScrapeJobId, PollingTask>>,
}

impl PollingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails once shutdown has started. Lets callers refuse work before
    /// acquiring anything a poller would have to release.
    pub fn ensure_accepting(&self) -> Result<(), RegistryError> {
        if self.root.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }
        Ok(())
    }

    /// Refuse new pollers from now on without waiting for running ones.
    pub fn close(&self) {
        self.root.cancel();
    }

    /// Resolves once the registry stops accepting pollers.
    pub async fn closed(&self) {
        self.root.cancelled().await
    }

    /// Spawn the poller built by `make` for `job_id`.
    ///
    /// `make` receives the task's own cancellation token. At most one poller
    /// runs per job id.
    pub fn spawn<F, Fut>(&self, job_id: ScrapeJobId, make: F) -> Result<(), RegistryError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = PollOutcome> + Send + 'static,
    {
        let mut tasks = self.tasks();
        self.ensure_accepting()?;
        reap(&mut tasks);
        if tasks.contains_key(&job_id) {
            return Err(RegistryError::AlreadyPolling(job_id));
        }

        let cancel = self.root.child_token();
        let poll = make(cancel.clone());
        let handle = tokio::spawn(async move {
            let outcome = poll.await;
            info!(%job_id, outcome = ?outcome, "poller finished");
            outcome
        });

        tasks.insert(job_id, PollingTask { cancel, handle });
        info!(%job_id, active = tasks.len(), "poller registered");
        Ok(())
    }

    /// Number of pollers still running.
    pub fn active(&self) -> usize {
        let mut tasks = self.tasks();
        reap(&mut tasks);
        tasks.len()
    }

    pub fn is_polling(&self, job_id: ScrapeJobId) -> bool {
        let mut tasks = self.tasks();
        reap(&mut tasks);
        tasks.contains_key(&job_id)
    }

    /// Signal one poller to stop. Returns `false` if none is running for `job_id`.
    pub fn cancel(&self, job_id: ScrapeJobId) -> bool {
        match self.tasks().get(&job_id) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every poller and wait for all of them to exit.
    ///
    /// New registrations are refused from this point on.
    pub async fn shutdown(&self) -> Vec<(ScrapeJobId, PollOutcome)> {
        let drained: Vec<(ScrapeJobId, PollingTask)> = {
            let mut tasks = self.tasks();
            self.close();
            tasks.drain().collect()
        };
        info!(pending = drained.len(), "shutting down pollers");

        let mut outcomes = Vec::with_capacity(drained.len());
        for (job_id, task) in drained {
            match task.handle.await {
                Ok(outcome) => outcomes.push((job_id, outcome)),
                Err(e) => error!(%job_id, error = %e, "poller task did not finish cleanly"),
            }
        }
        outcomes
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<ScrapeJobId, PollingTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn reap(tasks: &mut HashMap<ScrapeJobId, PollingTask>) {
    tasks.retain(|_, task| !task.handle.is_finished());
}
