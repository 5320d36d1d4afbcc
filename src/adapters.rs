//! Contracts for the collaborators surrounding the lock engine.
//!
//! The engine only talks to the browser through these traits: a tab metadata
//! source, an overlay renderer living in the page, and a notification sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::errors::{DeliveryError, TabError};
use crate::types::tab::{TabId, TabInfo};

/// Answers metadata queries about live tabs.
#[async_trait]
pub trait TabSource: Send + Sync {
    /// # Errors
    /// `TabError::NotFound` when the tab no longer exists.
    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, TabError>;
}

/// Directional commands to the page-side overlay.
#[async_trait]
pub trait OverlayAdapter: Send + Sync {
    async fn show_lock_overlay(&self, tab_id: TabId) -> Result<(), DeliveryError>;
    async fn hide_lock_overlay(&self, tab_id: TabId) -> Result<(), DeliveryError>;
    async fn show_verification_error(&self, tab_id: TabId, message: &str) -> Result<(), DeliveryError>;
    async fn set_displayed_title(&self, tab_id: TabId, title: &str) -> Result<(), DeliveryError>;
}

/// User-visible notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<(), DeliveryError>;
}

/// A command emitted towards the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum OutboundCommand {
    #[serde(rename_all = "camelCase")]
    ShowLockOverlay { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    HideLockOverlay { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    ShowVerificationError { tab_id: TabId, message: String },
    #[serde(rename_all = "camelCase")]
    SetDisplayedTitle { tab_id: TabId, title: String },
    Notify { title: String, body: String },
}

/// Forwards overlay and notification commands over a channel.
///
/// The receiving end is drained by whatever transport talks to the host.
#[derive(Clone)]
pub struct ChannelBridge {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl ChannelBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: OutboundCommand) -> Result<(), DeliveryError> {
        self.tx
            .send(command)
            .map_err(|_| DeliveryError("outbound channel closed".to_string()))
    }
}

#[async_trait]
impl OverlayAdapter for ChannelBridge {
    async fn show_lock_overlay(&self, tab_id: TabId) -> Result<(), DeliveryError> {
        self.send(OutboundCommand::ShowLockOverlay { tab_id })
    }

    async fn hide_lock_overlay(&self, tab_id: TabId) -> Result<(), DeliveryError> {
        self.send(OutboundCommand::HideLockOverlay { tab_id })
    }

    async fn show_verification_error(&self, tab_id: TabId, message: &str) -> Result<(), DeliveryError> {
        self.send(OutboundCommand::ShowVerificationError {
            tab_id,
            message: message.to_string(),
        })
    }

    async fn set_displayed_title(&self, tab_id: TabId, title: &str) -> Result<(), DeliveryError> {
        self.send(OutboundCommand::SetDisplayedTitle {
            tab_id,
            title: title.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for ChannelBridge {
    async fn notify(&self, title: &str, body: &str) -> Result<(), DeliveryError> {
        self.send(OutboundCommand::Notify {
            title: title.to_string(),
            body: body.to_string(),
        })
    }
}
