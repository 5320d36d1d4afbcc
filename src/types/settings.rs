use serde::{Deserialize, Serialize};

/// How incognito tabs are treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IncognitoMode {
    /// Incognito tabs may not be marked private.
    Disabled,
    /// Incognito tabs may be private and are never auto-unlocked.
    AlwaysLock,
    /// Incognito tabs behave like any other tab.
    #[default]
    Normal,
}

/// Global lock settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LockSettings {
    /// Master switch; when false nothing is locked.
    pub locking_enabled: bool,
    /// Inactivity timeout in minutes, `0` disables auto-lock.
    pub auto_lock_timeout: u32,
    pub lock_on_tab_switch: bool,
    pub show_notifications: bool,
    pub incognito_mode: IncognitoMode,
    /// Keeps every private tab locked and suppresses session timers.
    pub private_mode: bool,
    /// Glob patterns exempt from timeout-driven locking.
    pub whitelisted_urls: Vec<String>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            locking_enabled: true,
            auto_lock_timeout: 15,
            lock_on_tab_switch: false,
            show_notifications: true,
            incognito_mode: IncognitoMode::Normal,
            private_mode: false,
            whitelisted_urls: Vec::new(),
        }
    }
}

impl LockSettings {
    /// Auto-lock timeout in milliseconds.
    pub fn auto_lock_timeout_ms(&self) -> u64 {
        u64::from(self.auto_lock_timeout) * 60_000
    }
}
