//! Infrastructure event publisher implementations.
//!
//! The publisher port lives in `aetos-events`; this module provides the
//! broker-backed implementation (Redis pub/sub).

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisEventPublisher};
