//! Domain event mechanics: the event contract, its wire envelope, and the
//! publisher port used to hand events to downstream consumers.

pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod publisher;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryEventPublisher, Subscription};
pub use publisher::{BufferedEventPublisher, EventPublisher, NoopEventPublisher};
