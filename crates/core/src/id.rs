//! Strongly-typed identifiers used across the orchestrator.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a tracked marketplace listing (the aggregate identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(Uuid);

/// Identifier of a job on the external scraping service.
///
/// Assigned by the scraper, so it is usually parsed rather than generated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScrapeJobId(Uuid);

/// Identifier of a single state-history audit row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryRecordId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::InvalidId {
                        kind: $name,
                        raw: s.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(ListingId, "ListingId");
impl_uuid_newtype!(ScrapeJobId, "ScrapeJobId");
impl_uuid_newtype!(HistoryRecordId, "HistoryRecordId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_id_assigned_by_scraper() {
        let raw = "6f1c2b8e-3c1a-4a8e-9d7e-2f0b5a9c4d11";
        let id: ScrapeJobId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn rejects_malformed_ids_with_type_name() {
        let err = "not-a-uuid".parse::<ListingId>().unwrap_err();
        match err {
            DomainError::InvalidId { kind, raw, .. } => {
                assert_eq!(kind, "ListingId");
                assert_eq!(raw, "not-a-uuid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
