use serde::{Deserialize, Serialize};

/// Browser-assigned tab identifier, stable for the lifetime of the tab.
pub type TabId = i64;

/// A tab the user has marked private.
///
/// `is_locked == true` exactly when `last_unlocked` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateTabRecord {
    pub tab_id: TabId,
    pub url: String,
    pub title: String,
    /// Page title saved while locked so it can be restored on unlock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    pub is_locked: bool,
    /// Milliseconds since the Unix epoch.
    pub marked_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unlocked: Option<i64>,
    /// Incognito flag observed when the tab was marked.
    #[serde(default)]
    pub incognito: bool,
}

impl PrivateTabRecord {
    pub fn new(tab_id: TabId, url: &str, title: &str, incognito: bool, marked_at: i64) -> Self {
        Self {
            tab_id,
            url: url.to_string(),
            title: title.to_string(),
            original_title: None,
            is_locked: true,
            marked_at,
            last_unlocked: None,
            incognito,
        }
    }

    pub fn status(&self) -> TabStatus {
        if self.is_locked {
            TabStatus::PrivateLocked
        } else {
            TabStatus::PrivateUnlocked
        }
    }
}

/// Metadata the browser reports for a live tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub is_incognito: bool,
}

/// Privacy status of a tab as reported to the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TabStatus {
    Normal,
    PrivateUnlocked,
    PrivateLocked,
}

/// Published whenever a tab's privacy status changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub tab_id: TabId,
    pub status: TabStatus,
}
