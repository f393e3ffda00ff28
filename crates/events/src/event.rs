use std::borrow::Cow;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **uniquely identified** (`event_id`) so consumers can deduplicate
/// - **routed** by a topic key derived from their kind and content
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "listing.created").
    fn event_type(&self) -> &'static str;

    /// Topic key used by transports to route the event.
    ///
    /// Defaults to `event_type`; variants whose topic depends on their payload
    /// (e.g. a destination state) override it.
    fn routing_key(&self) -> Cow<'static, str> {
        Cow::Borrowed(self.event_type())
    }

    /// Unique identifier of this occurrence.
    fn event_id(&self) -> Uuid;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
