use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::StoreError;

/// The next brand to scrape and the term to search it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatedSearch {
    pub brand: String,
    pub search: String,
}

impl RotatedSearch {
    /// A missing or blank search term falls back to the brand.
    pub fn new(brand: impl Into<String>, search_term: Option<&str>) -> Self {
        let brand = brand.into();
        let search = search_term
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| brand.clone());
        Self { brand, search }
    }
}

#[async_trait]
pub trait SearchRotation: Send + Sync {
    /// Advance to the next enabled entry (by id, wrapping around) and return it.
    ///
    /// `None` when no entry is enabled.
    async fn next_search(&self) -> Result<Option<RotatedSearch>, StoreError>;
}

#[async_trait]
impl<R> SearchRotation for Arc<R>
where
    R: SearchRotation + ?Sized,
{
    async fn next_search(&self) -> Result<Option<RotatedSearch>, StoreError> {
        (**self).next_search().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_search_term_falls_back_to_brand() {
        assert_eq!(RotatedSearch::new("Sony", None).search, "Sony");
        assert_eq!(RotatedSearch::new("Sony", Some("  ")).search, "Sony");
        assert_eq!(RotatedSearch::new("Sony", Some("a7 iii")).search, "a7 iii");
    }
}
