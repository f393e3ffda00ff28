//! In-memory event publisher for tests/dev.

use std::sync::{Mutex, mpsc};

use async_trait::async_trait;
use tracing::warn;

use crate::event::Event;
use crate::publisher::EventPublisher;

/// A subscription to events published on an [`InMemoryEventPublisher`].
///
/// Each subscription receives a copy of every event published after it was
/// created. Designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// In-memory publisher.
///
/// - No IO
/// - Keeps a log of everything published (for assertions)
/// - Best-effort fan-out to subscribers; dead subscribers are dropped
#[derive(Debug)]
pub struct InMemoryEventPublisher<E> {
    published: Mutex<Vec<E>>,
    subscribers: Mutex<Vec<mpsc::Sender<E>>>,
}

impl<E> InMemoryEventPublisher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still hands out a subscription; it just never
        // receives anything.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

impl<E: Clone> InMemoryEventPublisher<E> {
    /// Snapshot of every event published so far, in publication order.
    pub fn published(&self) -> Vec<E> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl<E> Default for InMemoryEventPublisher<E> {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<E: Event> EventPublisher<E> for InMemoryEventPublisher<E> {
    async fn publish(&self, event: E) {
        match self.published.lock() {
            Ok(mut log) => log.push(event.clone()),
            Err(_) => {
                warn!(event_id = %event.event_id(), "in-memory event log poisoned; dropping event");
                return;
            }
        }

        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
