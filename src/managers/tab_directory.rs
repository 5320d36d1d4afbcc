//! In-memory view of the browser's live tabs.
//!
//! Fed by lifecycle events pushed from the host and queried by the lock
//! engine through [`TabSource`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::adapters::TabSource;
use crate::types::errors::TabError;
use crate::types::tab::{TabId, TabInfo};

#[derive(Default)]
struct DirectoryState {
    tabs: HashMap<TabId, TabInfo>,
    active_tab_id: Option<TabId>,
}

/// Tab metadata cache keyed by tab id.
#[derive(Default)]
pub struct TabDirectory {
    state: RwLock<DirectoryState>,
}

impl TabDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly opened tab, replacing any stale entry with the same id.
    pub fn open_tab(&self, tab_id: TabId, info: TabInfo) {
        if let Ok(mut state) = self.state.write() {
            state.tabs.insert(tab_id, info);
        }
    }

    /// Applies a navigation. Unknown tabs are added as non-incognito.
    pub fn update_tab(&self, tab_id: TabId, url: &str, title: &str) {
        if let Ok(mut state) = self.state.write() {
            let entry = state.tabs.entry(tab_id).or_default();
            entry.url = url.to_string();
            entry.title = title.to_string();
        }
    }

    /// Forgets a closed tab.
    pub fn close_tab(&self, tab_id: TabId) -> Result<(), TabError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| TabError::Unavailable(e.to_string()))?;
        state.tabs.remove(&tab_id).ok_or(TabError::NotFound(tab_id))?;
        if state.active_tab_id == Some(tab_id) {
            state.active_tab_id = None;
        }
        Ok(())
    }

    /// Last known metadata for a tab, if it is open.
    pub fn tab_info(&self, tab_id: TabId) -> Option<TabInfo> {
        self.state.read().ok().and_then(|s| s.tabs.get(&tab_id).cloned())
    }

    pub fn switch_tab(&self, tab_id: TabId) {
        if let Ok(mut state) = self.state.write() {
            state.active_tab_id = Some(tab_id);
        }
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.state.read().ok().and_then(|s| s.active_tab_id)
    }

    pub fn tab_count(&self) -> usize {
        self.state.read().map(|s| s.tabs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TabSource for TabDirectory {
    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, TabError> {
        let state = self
            .state
            .read()
            .map_err(|e| TabError::Unavailable(e.to_string()))?;
        state.tabs.get(&tab_id).cloned().ok_or(TabError::NotFound(tab_id))
    }
}
