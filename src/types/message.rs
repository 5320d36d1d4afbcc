use serde::{Deserialize, Serialize};

use super::tab::TabId;

/// Tab attached to a message sender (present for content scripts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SenderTab {
    pub id: TabId,
}

/// Origin of an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSender {
    /// Runtime id of the sending extension.
    pub id: String,
    /// URL of the sending page or frame.
    pub url: Option<String>,
    pub tab: Option<SenderTab>,
    /// `0` is the top-level frame.
    pub frame_id: Option<i64>,
}

impl MessageSender {
    /// A sender representing one of the extension's own pages.
    pub fn extension_page(extension_id: &str, path: &str) -> Self {
        Self {
            id: extension_id.to_string(),
            url: Some(format!("chrome-extension://{}/{}", extension_id, path)),
            tab: None,
            frame_id: None,
        }
    }

    /// A sender representing a content script in a tab frame.
    pub fn content_script(extension_id: &str, tab_id: TabId, frame_id: i64) -> Self {
        Self {
            id: extension_id.to_string(),
            url: None,
            tab: Some(SenderTab { id: tab_id }),
            frame_id: Some(frame_id),
        }
    }
}

/// Per-run bookkeeping persisted under the `session_meta` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: String,
    pub started_at: i64,
    pub restored_tabs: usize,
    #[serde(default)]
    pub last_cleanup_at: Option<i64>,
}
