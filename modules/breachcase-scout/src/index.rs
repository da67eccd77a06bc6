//! Run-scoped in-memory projection of every known incident.

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use breachcase_common::{IncidentId, IncidentStub};

use crate::fuzzy::{self, FuzzyCandidate};
use crate::traits::IncidentStore;

/// Stubs loaded at run start plus those created during the run.
///
/// Owned by the pipeline and passed to the resolution engine by reference.
#[derive(Debug, Default, Clone)]
pub struct CandidateIndex {
    stubs: Vec<IncidentStub>,
    ids: HashSet<IncidentId>,
}

impl CandidateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stubs(stubs: impl IntoIterator<Item = IncidentStub>) -> Self {
        let mut index = Self::new();
        for stub in stubs {
            index.push(stub);
        }
        index
    }

    /// Page through every stub in the store.
    pub async fn load(store: &dyn IncidentStore, page_size: usize) -> Result<Self> {
        anyhow::ensure!(page_size > 0, "stub page size must be positive");

        let mut index = Self::new();
        let mut offset = 0;
        let mut pages = 0;
        loop {
            let page = store.stub_page(offset, page_size).await?;
            let fetched = page.len();
            pages += 1;
            for stub in page {
                index.push(stub);
            }
            offset += fetched;
            if fetched < page_size {
                break;
            }
        }

        info!(stubs = index.len(), pages, "Loaded candidate index");
        Ok(index)
    }

    /// Append a stub. Duplicate ids are ignored.
    pub fn push(&mut self, stub: IncidentStub) -> bool {
        if !self.ids.insert(stub.id.clone()) {
            return false;
        }
        self.stubs.push(stub);
        true
    }

    pub fn stubs(&self) -> &[IncidentStub] {
        &self.stubs
    }

    pub fn contains(&self, id: &IncidentId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn find_candidates(&self, name: &str, threshold: f64) -> Vec<FuzzyCandidate> {
        fuzzy::find_candidates(name, &self.stubs, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub, MockIncidentStore};

    #[tokio::test]
    async fn load_pages_until_short_page() {
        let store = MockIncidentStore::new()
            .with_stubs((0..5).map(|i| stub(&format!("S{i}"), &format!("Org {i}"))));

        let index = CandidateIndex::load(&store, 2).await.unwrap();
        assert_eq!(index.len(), 5);
        // 2 + 2 + 1
        assert_eq!(store.stub_page_calls(), 3);
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_needs_one_empty_page() {
        let store = MockIncidentStore::new()
            .with_stubs((0..4).map(|i| stub(&format!("S{i}"), &format!("Org {i}"))));

        let index = CandidateIndex::load(&store, 2).await.unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(store.stub_page_calls(), 3);
    }

    #[test]
    fn pushed_stub_is_visible_to_matching() {
        let mut index = CandidateIndex::from_stubs([stub("A1", "Acme Corp")]);
        assert!(index.push(stub("A2", "Acme Corp")));
        assert!(!index.push(stub("A2", "Acme Corp")));

        let ids: Vec<_> = index
            .find_candidates("Acme Corp", 0.6)
            .into_iter()
            .map(|c| c.stub.id)
            .collect();
        assert_eq!(ids, vec![IncidentId::from("A1"), IncidentId::from("A2")]);
    }
}
