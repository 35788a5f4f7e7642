//! Local set of deletion requests, keyed by request id.

use super::models::{DeletionRequest, EntityType};
use std::collections::{BTreeMap, HashSet};

/// Fetched deletion requests. Iteration order is by request id, so any
/// view derived from the store is independent of fetch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestStore {
    requests: BTreeMap<String, DeletionRequest>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a fetched list. The first occurrence of a request id wins.
    pub fn from_requests(requests: impl IntoIterator<Item = DeletionRequest>) -> Self {
        let mut store = Self::new();
        for request in requests {
            store
                .requests
                .entry(request.request_id.clone())
                .or_insert(request);
        }
        store
    }

    pub fn get(&self, request_id: &str) -> Option<&DeletionRequest> {
        self.requests.get(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.requests.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeletionRequest> {
        self.requests.values()
    }

    pub fn pending(&self) -> impl Iterator<Item = &DeletionRequest> {
        self.requests.values().filter(|r| r.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// The pending request targeting an entity of `project_id`. With
    /// duplicates, the smallest request id wins. Requests scoped to another
    /// project never match, even on an id clash.
    pub fn pending_for(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Option<&DeletionRequest> {
        self.pending().find(|r| {
            r.entity_type == entity_type
                && r.entity_id() == Some(entity_id)
                && r.project_id.as_deref().map_or(true, |p| p == project_id)
        })
    }

    /// Pending requests that belong to a project.
    pub fn pending_in_project<'a>(
        &'a self,
        project_id: &'a str,
    ) -> impl Iterator<Item = &'a DeletionRequest> + 'a {
        self.pending()
            .filter(move |r| r.project_id.as_deref() == Some(project_id))
    }

    /// Drop a request from the active store.
    pub fn retire(&mut self, request_id: &str) -> Option<DeletionRequest> {
        self.requests.remove(request_id)
    }

    /// Remove every request whose id is in `excluded`. Returns how many went.
    pub fn exclude(&mut self, excluded: &HashSet<String>) -> usize {
        let before = self.requests.len();
        self.requests.retain(|id, _| !excluded.contains(id));
        before - self.requests.len()
    }
}

impl FromIterator<DeletionRequest> for RequestStore {
    fn from_iter<I: IntoIterator<Item = DeletionRequest>>(iter: I) -> Self {
        Self::from_requests(iter)
    }
}
