//! Event publisher port.
//!
//! Publication is **best-effort** relative to the caller: implementations log
//! and swallow transport failures instead of surfacing them. Durability after a
//! successful hand-off belongs to the transport, not to the publishing code.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::event::Event;

/// Port for handing domain events to downstream consumers.
#[async_trait]
pub trait EventPublisher<E: Event>: Send + Sync {
    /// Publish a single event. Never fails from the caller's point of view.
    async fn publish(&self, event: E);

    /// Publish events one after another, in order.
    ///
    /// There is no cross-event atomicity: a failed event does not stop the
    /// ones after it.
    async fn publish_many(&self, events: Vec<E>) {
        for event in events {
            self.publish(event).await;
        }
    }
}

#[async_trait]
impl<E, P> EventPublisher<E> for Arc<P>
where
    E: Event,
    P: EventPublisher<E> + ?Sized,
{
    async fn publish(&self, event: E) {
        (**self).publish(event).await
    }

    async fn publish_many(&self, events: Vec<E>) {
        (**self).publish_many(events).await
    }
}

/// Publisher that discards every event.
///
/// Used when no broker is configured.
#[derive(Debug)]
pub struct NoopEventPublisher<E> {
    _event: PhantomData<fn(E)>,
}

impl<E> NoopEventPublisher<E> {
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for NoopEventPublisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Event> EventPublisher<E> for NoopEventPublisher<E> {
    async fn publish(&self, event: E) {
        debug!(routing_key = %event.routing_key(), event_id = %event.event_id(), "event discarded");
    }
}

/// Publisher that holds events until the owner takes them.
///
/// Lets a unit of work stage its events and hand them on only after it has
/// committed.
#[derive(Debug)]
pub struct BufferedEventPublisher<E> {
    buffered: Mutex<Vec<E>>,
}

impl<E> BufferedEventPublisher<E> {
    pub fn new() -> Self {
        Self {
            buffered: Mutex::new(Vec::new()),
        }
    }

    /// Remove and return everything staged so far, in publication order.
    pub fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.buffered())
    }

    fn buffered(&self) -> MutexGuard<'_, Vec<E>> {
        self.buffered.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E> Default for BufferedEventPublisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Event> EventPublisher<E> for BufferedEventPublisher<E> {
    async fn publish(&self, event: E) {
        self.buffered().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    struct Tick(Uuid);

    impl Event for Tick {
        fn event_type(&self) -> &'static str {
            "test.tick"
        }

        fn event_id(&self) -> Uuid {
            self.0
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    #[tokio::test]
    async fn buffered_events_are_held_until_taken() {
        let buffer = BufferedEventPublisher::new();
        let (a, b) = (Tick(Uuid::new_v4()), Tick(Uuid::new_v4()));

        buffer.publish_many(vec![a.clone(), b.clone()]).await;

        assert_eq!(buffer.take(), vec![a, b]);
        assert!(buffer.take().is_empty());
    }
}
