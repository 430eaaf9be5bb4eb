//! In-memory store, for tests and for hosts that persist state themselves.
use std::collections::{BTreeMap, HashMap};

use crate::{
    error::StoreError,
    header::Digest,
    requests::{Request, RequestId},
    store::{ChangeSet, HeaderRecord, HeaderStore, RelayStore, Slot},
};

/// Maps behind a [`RelayStore`] whose commits validate before applying.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    headers: HashMap<Digest, HeaderRecord>,
    slots: BTreeMap<Slot, Digest>,
    requests: HashMap<RequestId, Request>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored header records.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}

impl HeaderStore for MemoryStore {
    fn header(&self, digest: &Digest) -> Result<Option<HeaderRecord>, StoreError> {
        Ok(self.headers.get(digest).cloned())
    }

    fn slot(&self, slot: Slot) -> Result<Option<Digest>, StoreError> {
        Ok(self.slots.get(&slot).copied())
    }

    fn request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.requests.get(id).cloned())
    }
}

impl RelayStore for MemoryStore {
    fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError> {
        // Validate first so a conflict leaves the store untouched.
        for (digest, record) in &changes.headers {
            if let Some(existing) = self.headers.get(digest) {
                if existing != record {
                    return Err(StoreError::Conflict(*digest));
                }
            }
        }

        self.headers.extend(changes.headers);
        self.slots.extend(changes.slots);
        self.requests.extend(changes.requests);
        Ok(())
    }
}
