//! Write-once store of created resource URLs, keyed by activity name.
//!
//! Each activity records its own entry exactly once, when it completes.
//! Downstream activities read entries concurrently while resolving their
//! request bodies, so the store is shared behind a `DashMap`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::definition::WorkflowError;

#[derive(Debug, Default)]
pub struct ResultsStore {
    urls: DashMap<String, String>,
    /// Completion order, for cleanup.
    order: Mutex<Vec<String>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `activity`'s resource URL. A second write for the same
    /// activity is rejected and leaves the first value in place.
    pub fn record(&self, activity: &str, resource_url: &str) -> Result<(), WorkflowError> {
        match self.urls.entry(activity.to_string()) {
            Entry::Occupied(_) => Err(WorkflowError::DuplicateResult(activity.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(resource_url.to_string());
                self.order().push(resource_url.to_string());
                Ok(())
            }
        }
    }

    pub fn get(&self, activity: &str) -> Option<String> {
        self.urls.get(activity).map(|v| v.value().clone())
    }

    pub fn contains(&self, activity: &str) -> bool {
        self.urls.contains_key(activity)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Every recorded URL, in completion order.
    pub fn urls(&self) -> Vec<String> {
        self.order().clone()
    }

    /// Poisoning is ignored: the list is only ever appended to.
    fn order(&self) -> MutexGuard<'_, Vec<String>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy as an ordered map.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.urls
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
