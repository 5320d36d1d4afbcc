//! Policy evaluation for private tabs.
//!
//! Decides whether a tab may stay unlocked without an inactivity timer and
//! whether incognito tabs may be made private. Reads settings and tab
//! metadata only; never mutates anything except its compiled-pattern cache.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;

use crate::types::settings::{IncognitoMode, LockSettings};
use crate::types::tab::TabInfo;

/// Trait defining policy decisions.
pub trait PolicyEngineTrait: Send + Sync {
    /// True when no inactivity timer should run for this tab.
    ///
    /// Checks are evaluated in a fixed order: private mode, whitelist,
    /// then incognito handling. Any one of them suppresses auto-lock.
    fn is_auto_lock_suppressed(&self, tab: &TabInfo, settings: &LockSettings) -> bool;

    /// False only for incognito tabs while incognito support is disabled.
    fn is_incognito_allowed(&self, tab: &TabInfo, settings: &LockSettings) -> bool;

    /// True when `url` matches any whitelist pattern.
    fn is_whitelisted(&self, url: &str, patterns: &[String]) -> bool;
}

/// Translates a whitelist glob into an anchored, case-insensitive regex.
///
/// `**` matches any run of characters, `*` any run without `/`, and
/// everything else is literal.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?i)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str(".*");
            } else {
                out.push_str("[^/]*");
            }
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
        }
    }
    out.push('$');
    out
}

/// Compiles a glob pattern. Returns `None` for patterns that cannot be compiled.
pub fn compile_glob(pattern: &str) -> Option<Regex> {
    Regex::new(&glob_to_regex(pattern)).ok()
}

/// Matches `url` against a single glob. Unparsable patterns never match.
pub fn glob_matches(pattern: &str, url: &str) -> bool {
    compile_glob(pattern).map(|re| re.is_match(url)).unwrap_or(false)
}

/// Policy evaluator with a cache of compiled whitelist patterns.
pub struct PolicyEngine {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            compiled: Mutex::new(HashMap::new()),
        }
    }

    fn matches(&self, pattern: &str, url: &str) -> bool {
        let Ok(mut cache) = self.compiled.lock() else {
            return glob_matches(pattern, url);
        };
        cache
            .entry(pattern.to_string())
            .or_insert_with(|| compile_glob(pattern))
            .as_ref()
            .map(|re| re.is_match(url))
            .unwrap_or(false)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngineTrait for PolicyEngine {
    fn is_auto_lock_suppressed(&self, tab: &TabInfo, settings: &LockSettings) -> bool {
        if settings.private_mode {
            return true;
        }
        if self.is_whitelisted(&tab.url, &settings.whitelisted_urls) {
            return true;
        }
        if tab.is_incognito {
            // Disabled should never reach here: such tabs are unmarked.
            return matches!(
                settings.incognito_mode,
                IncognitoMode::AlwaysLock | IncognitoMode::Disabled
            );
        }
        false
    }

    fn is_incognito_allowed(&self, tab: &TabInfo, settings: &LockSettings) -> bool {
        !(tab.is_incognito && settings.incognito_mode == IncognitoMode::Disabled)
    }

    fn is_whitelisted(&self, url: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|p| self.matches(p, url))
    }
}
