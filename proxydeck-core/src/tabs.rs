//! Per-tab assignment records. Pure data store, no policy.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{TabId, TabState};

#[derive(Default)]
pub struct TabTracker {
    tabs: RwLock<HashMap<TabId, TabState>>,
}

impl TabTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab_id: TabId) -> Option<TabState> {
        self.tabs.read().get(&tab_id).cloned()
    }

    pub fn set(&self, tab_id: TabId, state: TabState) {
        self.tabs.write().insert(tab_id, state);
    }

    pub fn remove(&self, tab_id: TabId) -> Option<TabState> {
        self.tabs.write().remove(&tab_id)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.tabs.read().contains_key(&tab_id)
    }

    /// Full copy of the table, for the inspection/debugging surface.
    pub fn snapshot(&self) -> HashMap<TabId, TabState> {
        self.tabs.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tabs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.read().is_empty()
    }
}
