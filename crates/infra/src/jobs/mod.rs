//! Background scrape jobs.
//!
//! ## Components
//!
//! - `ScrapeOrchestrator`: starts the compute resource, submits a scrape job
//!   and registers a poller for it
//! - `PollingCoordinator`: the per-job poll loop (ingest on completion,
//!   release the resource on every exit)
//! - `PollingRegistry`: owns every running poller so shutdown can cancel and
//!   await them
//! - `RunSchedule`: daily UTC slots for scheduled scrapes

pub mod coordinator;
pub mod registry;
pub mod schedule;
pub mod trigger;
pub mod types;

pub use coordinator::{POLLER_SOURCE, PollingCoordinator};
pub use registry::{PollingRegistry, RegistryError};
pub use schedule::{RunSchedule, ScheduleError};
pub use trigger::{ScrapeOrchestrator, TriggerError, TriggerSettings, TriggeredScrape};
pub use types::{PollError, PollOutcome, PollTarget, PollingPolicy};
