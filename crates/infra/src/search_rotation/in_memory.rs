use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::r#trait::{RotatedSearch, SearchRotation};
use crate::db::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEntry {
    pub id: i64,
    pub brand: String,
    pub search_term: Option<String>,
    pub enabled: bool,
}

impl RotationEntry {
    pub fn new(id: i64, brand: impl Into<String>, search_term: Option<&str>) -> Self {
        Self {
            id,
            brand: brand.into(),
            search_term: search_term.map(str::to_string),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Default)]
struct RotationState {
    entries: Vec<RotationEntry>,
    current: Option<i64>,
}

/// In-memory rotation. Entries are kept sorted by id.
#[derive(Debug, Default)]
pub struct InMemorySearchRotation {
    state: Mutex<RotationState>,
}

impl InMemorySearchRotation {
    pub fn new(entries: impl IntoIterator<Item = RotationEntry>) -> Self {
        let mut entries: Vec<RotationEntry> = entries.into_iter().collect();
        entries.sort_by_key(|e| e.id);
        Self {
            state: Mutex::new(RotationState {
                entries,
                current: None,
            }),
        }
    }

    pub fn set_enabled(&self, id: i64, enabled: bool) {
        if let Some(entry) = self.state().entries.iter_mut().find(|e| e.id == id) {
            entry.enabled = enabled;
        }
    }

    fn state(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SearchRotation for InMemorySearchRotation {
    async fn next_search(&self) -> Result<Option<RotatedSearch>, StoreError> {
        let mut state = self.state();
        let current = state.current;

        let next = {
            let mut enabled = state.entries.iter().filter(|e| e.enabled);
            let after_current = match current {
                Some(id) => enabled.clone().find(|e| e.id > id),
                None => None,
            };
            after_current.or_else(|| enabled.next()).cloned()
        };

        state.current = next.as_ref().map(|e| e.id);
        Ok(next.map(|e| RotatedSearch::new(e.brand, e.search_term.as_deref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn brands(rotation: &InMemorySearchRotation, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(rotation.next_search().await.unwrap().unwrap().brand);
        }
        out
    }

    #[tokio::test]
    async fn cycles_through_enabled_entries_in_id_order() {
        let rotation = InMemorySearchRotation::new([
            RotationEntry::new(3, "Nikon", None),
            RotationEntry::new(1, "Sony", Some("sony a7")),
            RotationEntry::new(2, "Canon", None).disabled(),
        ]);

        assert_eq!(brands(&rotation, 4).await, ["Sony", "Nikon", "Sony", "Nikon"]);
    }

    #[tokio::test]
    async fn search_term_defaults_to_brand() {
        let rotation = InMemorySearchRotation::new([
            RotationEntry::new(1, "Sony", Some("sony a7")),
            RotationEntry::new(2, "Fuji", None),
        ]);

        let first = rotation.next_search().await.unwrap().unwrap();
        let second = rotation.next_search().await.unwrap().unwrap();
        assert_eq!(first.search, "sony a7");
        assert_eq!(second.search, "Fuji");
    }

    #[tokio::test]
    async fn disabling_the_current_entry_moves_on() {
        let rotation = InMemorySearchRotation::new([
            RotationEntry::new(1, "Sony", None),
            RotationEntry::new(2, "Canon", None),
            RotationEntry::new(3, "Nikon", None),
        ]);
        assert_eq!(brands(&rotation, 2).await, ["Sony", "Canon"]);

        rotation.set_enabled(2, false);
        assert_eq!(brands(&rotation, 2).await, ["Nikon", "Sony"]);
    }

    #[tokio::test]
    async fn nothing_enabled_yields_none() {
        let empty = InMemorySearchRotation::default();
        assert_eq!(empty.next_search().await.unwrap(), None);

        let all_off = InMemorySearchRotation::new([RotationEntry::new(1, "Sony", None).disabled()]);
        assert_eq!(all_off.next_search().await.unwrap(), None);
    }
}
