use std::sync::Arc;

use async_trait::async_trait;

use super::ExternalServiceError;

/// Control plane for the container/instance hosting the scraper.
///
/// `start` failures abort a scrape trigger; `stop` is always best-effort for
/// callers, who log and move on.
#[async_trait]
pub trait ComputeResourceManager: Send + Sync {
    async fn start(&self, name: &str) -> Result<(), ExternalServiceError>;

    async fn stop(&self, name: &str) -> Result<(), ExternalServiceError>;

    /// Provider-reported state, e.g. `Running` or `Stopped`.
    async fn status(&self, name: &str) -> Result<String, ExternalServiceError>;
}

#[async_trait]
impl<C> ComputeResourceManager for Arc<C>
where
    C: ComputeResourceManager + ?Sized,
{
    async fn start(&self, name: &str) -> Result<(), ExternalServiceError> {
        (**self).start(name).await
    }

    async fn stop(&self, name: &str) -> Result<(), ExternalServiceError> {
        (**self).stop(name).await
    }

    async fn status(&self, name: &str) -> Result<String, ExternalServiceError> {
        (**self).status(name).await
    }
}
