use crate::changelog::types::{CollectionElement, now_ms};
use crate::error::StoreError;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory collections of string keys.
///
/// Expired elements are invisible to reads immediately and physically removed by
/// [`Database::start_expiry_sweep`].
#[derive(Default)]
pub struct Database {
    collections: DashMap<String, DashMap<String, CollectionElement>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&self, name: &str) -> Result<(), StoreError> {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(format!("collection {}", name))),
            Entry::Vacant(slot) => {
                slot.insert(DashMap::new());
                Ok(())
            }
        }
    }

    pub fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| collection_not_found(name))
    }

    /// Removes every element but keeps the collection.
    pub fn flush_collection(&self, name: &str) -> Result<(), StoreError> {
        let collection = self
            .collections
            .get(name)
            .ok_or_else(|| collection_not_found(name))?;
        collection.clear();
        Ok(())
    }

    pub fn upsert_element(
        &self,
        collection_name: &str,
        key: &str,
        element: CollectionElement,
    ) -> Result<(), StoreError> {
        let collection = self
            .collections
            .get(collection_name)
            .ok_or_else(|| collection_not_found(collection_name))?;
        collection.insert(key.to_string(), element);
        Ok(())
    }

    pub fn get_element(
        &self,
        collection_name: &str,
        key: &str,
    ) -> Result<CollectionElement, StoreError> {
        let collection = self
            .collections
            .get(collection_name)
            .ok_or_else(|| collection_not_found(collection_name))?;

        collection
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|element| !element.is_expired(now_ms()))
            .ok_or_else(|| StoreError::NotFound(format!("key {} in {}", key, collection_name)))
    }

    /// Deleting a key that is not there is not an error.
    pub fn delete_element(&self, collection_name: &str, key: &str) -> Result<(), StoreError> {
        let collection = self
            .collections
            .get(collection_name)
            .ok_or_else(|| collection_not_found(collection_name))?;
        collection.remove(key);
        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Drops every element expired at `now`. Returns how many were removed.
    pub fn remove_expired(&self, now: u64) -> usize {
        let mut removed = 0;
        for collection in self.collections.iter() {
            let before = collection.len();
            collection.retain(|_, element| !element.is_expired(now));
            removed += before.saturating_sub(collection.len());
        }
        removed
    }

    pub fn start_expiry_sweep(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.remove_expired(now_ms());
                        if removed > 0 {
                            tracing::debug!("Expiry sweep removed {} elements", removed);
                        }
                    }
                }
            }
        });
    }
}

fn collection_not_found(name: &str) -> StoreError {
    StoreError::NotFound(format!("collection {}", name))
}
