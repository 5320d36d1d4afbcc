//! Event router for the TabGuard request protocol.
//!
//! Validates where a request came from, maps the request onto the lock
//! engine / password manager / settings engine, and throttles unlock
//! attempts. `dispatch` always returns a JSON value: failures become
//! `{"success": false, "error": ...}` and never escape to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::adapters::OverlayAdapter;
use crate::managers::lock_manager::LockEngine;
use crate::managers::tab_directory::TabDirectory;
use crate::services::password_manager::PasswordManager;
use crate::services::settings_engine::SettingsEngine;
use crate::types::credential::{AttemptCounter, VerifyOutcome};
use crate::types::errors::{PasswordError, RouterError};
use crate::types::message::MessageSender;
use crate::types::settings::IncognitoMode;
use crate::types::tab::{TabId, TabInfo};

/// Failed attempts allowed before a tab is locked out.
pub const MAX_UNLOCK_ATTEMPTS: u32 = 5;

/// How long a lockout lasts, counted from the last failed attempt.
pub const LOCKOUT_WINDOW: Duration = Duration::from_secs(5 * 60);

pub const INCORRECT_PASSWORD_MESSAGE: &str = "Incorrect password";
pub const TOO_MANY_ATTEMPTS_MESSAGE: &str = "Too many attempts. Try again later.";

/// Settings keys that carry side effects and go through the engine.
const ENGINE_SETTINGS: [&str; 3] = ["lockingEnabled", "privateMode", "incognitoMode"];

/// Routes inbound requests. Cheap to clone.
#[derive(Clone)]
pub struct EventRouter {
    engine: LockEngine,
    settings: Arc<SettingsEngine>,
    passwords: Arc<PasswordManager>,
    overlay: Arc<dyn OverlayAdapter>,
    tabs: Arc<TabDirectory>,
    attempts: Arc<Mutex<HashMap<TabId, AttemptCounter>>>,
    extension_id: String,
}

/// Converts an error into the wire error shape.
pub fn error_response(err: &RouterError) -> Value {
    json!({"success": false, "error": err.to_string()})
}

impl EventRouter {
    pub fn new(
        engine: LockEngine,
        passwords: Arc<PasswordManager>,
        overlay: Arc<dyn OverlayAdapter>,
        tabs: Arc<TabDirectory>,
        extension_id: &str,
    ) -> Self {
        let settings = engine.settings().clone();
        Self {
            engine,
            settings,
            passwords,
            overlay,
            tabs,
            attempts: Arc::new(Mutex::new(HashMap::new())),
            extension_id: extension_id.to_string(),
        }
    }

    /// Accepts the extension's own pages and top-level content scripts of its own runtime.
    pub fn is_valid_source(&self, sender: &MessageSender) -> bool {
        if sender.id != self.extension_id {
            return false;
        }
        let page_prefix = format!("chrome-extension://{}/", self.extension_id);
        let own_page = sender
            .url
            .as_deref()
            .map(|url| url.starts_with(&page_prefix))
            .unwrap_or(false);
        let top_frame_script = sender.tab.is_some() && sender.frame_id == Some(0);
        own_page || top_frame_script
    }

    /// Handles one request. Never fails: errors and handler panics become error responses.
    pub async fn dispatch(&self, sender: &MessageSender, method: &str, params: Value) -> Value {
        if !self.is_valid_source(sender) {
            warn!(sender = %sender.id, method, "rejected message from invalid source");
            return error_response(&RouterError::InvalidSource);
        }

        let router = self.clone();
        let sender = sender.clone();
        let method_name = method.to_string();
        let task = tokio::spawn(async move { router.handle_method(&sender, &method_name, &params).await });

        match task.await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                debug!(method, error = %e, "request failed");
                error_response(&e)
            }
            Err(e) => {
                error!(method, error = %e, "request handler aborted");
                json!({"success": false, "error": "internal error"})
            }
        }
    }

    async fn handle_method(
        &self,
        sender: &MessageSender,
        method: &str,
        params: &Value,
    ) -> Result<Value, RouterError> {
        match method {
            "ping" => Ok(json!({"success": true, "version": env!("CARGO_PKG_VERSION")})),

            // ─── Tabs ───
            "tab.mark_private" => {
                let tab_id = tab_id_param(params, sender)?;
                let is_private = bool_param(params, "isPrivate")?;
                if !is_private {
                    self.engine.unmark_private(tab_id).await?;
                    return Ok(self.status_response(tab_id).await);
                }
                if !self.passwords.is_set().await? {
                    return Err(PasswordError::NotSet.into());
                }
                let known = self.tabs.tab_info(tab_id);
                let url = opt_str_param(params, "url")
                    .map(str::to_string)
                    .or_else(|| known.as_ref().map(|t| t.url.clone()))
                    .unwrap_or_default();
                let title = opt_str_param(params, "title")
                    .map(str::to_string)
                    .or_else(|| known.as_ref().map(|t| t.title.clone()))
                    .unwrap_or_default();
                // A tab the host never announced is registered from the request.
                if known.is_none() {
                    if let Some(is_incognito) = params.get("incognito").and_then(Value::as_bool) {
                        self.tabs.open_tab(
                            tab_id,
                            TabInfo {
                                url: url.clone(),
                                title: title.clone(),
                                is_incognito,
                            },
                        );
                    }
                }
                self.engine.mark_private(tab_id, &url, &title).await?;
                Ok(self.status_response(tab_id).await)
            }
            "tab.status" => {
                let tab_id = tab_id_param(params, sender)?;
                Ok(self.status_response(tab_id).await)
            }
            "tab.list_private" => {
                let tabs = self.engine.get_all_private_tabs().await;
                Ok(json!({"success": true, "tabs": tabs}))
            }
            "tab.lock" => {
                let tab_id = tab_id_param(params, sender)?;
                self.engine.lock(tab_id).await?;
                Ok(self.status_response(tab_id).await)
            }
            "tab.lock_all" => {
                let failed: Vec<TabId> = self.engine.lock_all().await.into_iter().map(|(id, _)| id).collect();
                Ok(json!({"success": failed.is_empty(), "failed": failed}))
            }
            "tab.event" => self.handle_tab_event(params).await,

            // ─── Master password ───
            "password.verify" => {
                let tab_id = tab_id_param(params, sender)?;
                let password = str_param(params, "password")?;
                let outcome = self.verify_password(tab_id, password).await?;
                Ok(serde_json::to_value(outcome).map_err(|e| RouterError::Internal(e.to_string()))?)
            }
            "password.set" => {
                let password = str_param(params, "password")?;
                self.passwords.set_master_password(password).await?;
                Ok(json!({"success": true}))
            }
            "password.change" => {
                let current = str_param(params, "currentPassword")?;
                let new = str_param(params, "newPassword")?;
                self.passwords.change_master_password(current, new).await?;
                Ok(json!({"success": true}))
            }
            "password.is_set" => {
                let is_set = self.passwords.is_set().await?;
                Ok(json!({"success": true, "isSet": is_set}))
            }

            // ─── Settings ───
            "settings.get" => self.settings_response().await,
            "settings.update" => {
                let patch = params
                    .get("settings")
                    .unwrap_or(params)
                    .as_object()
                    .ok_or_else(|| RouterError::InvalidParam("settings must be an object".to_string()))?;
                self.update_settings(patch).await?;
                self.settings_response().await
            }
            "settings.whitelist_add" => {
                let pattern = str_param(params, "pattern")?;
                self.engine.add_whitelist_pattern(pattern).await?;
                self.settings_response().await
            }
            "settings.whitelist_remove" => {
                let pattern = str_param(params, "pattern")?;
                self.engine.remove_whitelist_pattern(pattern).await?;
                self.settings_response().await
            }

            _ => Err(RouterError::UnknownMessageType(method.to_string())),
        }
    }

    /// Checks an unlock attempt, applying the attempt lockout.
    ///
    /// The attempt is counted before the password is checked, so concurrent
    /// guesses against one tab can never exceed [`MAX_UNLOCK_ATTEMPTS`]
    /// verifier calls per window.
    pub async fn verify_password(&self, tab_id: TabId, password: &str) -> Result<VerifyOutcome, RouterError> {
        let reserved = self.reserve_attempt(tab_id);
        let count = match reserved {
            Ok(count) => count,
            Err(count) => {
                warn!(tab_id, "unlock attempt rejected during lockout");
                self.show_error(tab_id, TOO_MANY_ATTEMPTS_MESSAGE).await;
                return Ok(VerifyOutcome {
                    success: false,
                    attempts: Some(count),
                });
            }
        };

        let verified = match self.passwords.verify(password).await {
            Ok(verified) => verified,
            Err(e) => {
                self.release_attempt(tab_id);
                return Err(e.into());
            }
        };

        if verified {
            self.attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&tab_id);
            self.engine.unlock(tab_id).await?;
            if let Err(e) = self.overlay.hide_lock_overlay(tab_id).await {
                debug!(tab_id, error = %e, "overlay hide not delivered");
            }
            return Ok(VerifyOutcome {
                success: true,
                attempts: None,
            });
        }

        debug!(tab_id, attempts = count, "unlock attempt failed");
        let message = if count >= MAX_UNLOCK_ATTEMPTS {
            TOO_MANY_ATTEMPTS_MESSAGE
        } else {
            INCORRECT_PASSWORD_MESSAGE
        };
        self.show_error(tab_id, message).await;
        Ok(VerifyOutcome {
            success: false,
            attempts: Some(count),
        })
    }

    /// Counts one attempt for `tab_id`. `Err` carries the count while locked out.
    fn reserve_attempt(&self, tab_id: TabId) -> Result<u32, u32> {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let counter = attempts.entry(tab_id).or_insert(AttemptCounter {
            count: 0,
            last_attempt_at: now,
        });
        if counter.count >= MAX_UNLOCK_ATTEMPTS {
            if now.duration_since(counter.last_attempt_at) < LOCKOUT_WINDOW {
                return Err(counter.count);
            }
            counter.count = 0;
        }
        counter.count += 1;
        counter.last_attempt_at = now;
        Ok(counter.count)
    }

    /// Gives back an attempt whose verification never ran to completion.
    fn release_attempt(&self, tab_id: TabId) {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(counter) = attempts.get_mut(&tab_id) {
            counter.count = counter.count.saturating_sub(1);
            if counter.count == 0 {
                attempts.remove(&tab_id);
            }
        }
    }

    pub fn failed_attempts(&self, tab_id: TabId) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tab_id)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    async fn show_error(&self, tab_id: TabId, message: &str) {
        if let Err(e) = self.overlay.show_verification_error(tab_id, message).await {
            debug!(tab_id, error = %e, "verification error not delivered");
        }
    }

    /// Applies a partial settings update. Side-effecting toggles go through the engine.
    ///
    /// Every toggle value is type-checked before anything is written, and a
    /// toggle only runs its side effects when its value actually changes.
    async fn update_settings(&self, patch: &Map<String, Value>) -> Result<(), RouterError> {
        let locking_enabled = patch.get("lockingEnabled").map(|v| bool_value(v, "lockingEnabled")).transpose()?;
        let private_mode = patch.get("privateMode").map(|v| bool_value(v, "privateMode")).transpose()?;
        let incognito_mode = patch
            .get("incognitoMode")
            .map(|v| {
                serde_json::from_value::<IncognitoMode>(v.clone())
                    .map_err(|e| RouterError::InvalidParam(format!("incognitoMode: {}", e)))
            })
            .transpose()?;

        let plain: Map<String, Value> = patch
            .iter()
            .filter(|(key, _)| !ENGINE_SETTINGS.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let current = if plain.is_empty() {
            self.settings.get().await?
        } else {
            self.settings.update(&Value::Object(plain)).await?
        };

        if let Some(enabled) = locking_enabled.filter(|&v| v != current.locking_enabled) {
            self.engine.toggle_locking_feature(enabled).await?;
        }
        if let Some(enabled) = private_mode.filter(|&v| v != current.private_mode) {
            self.engine.toggle_private_mode(enabled).await?;
        }
        if let Some(mode) = incognito_mode.filter(|&m| m != current.incognito_mode) {
            self.engine.set_incognito_mode(mode).await?;
        }
        Ok(())
    }

    async fn status_response(&self, tab_id: TabId) -> Value {
        let status = self.engine.get_tab_status(tab_id).await;
        json!({"success": true, "status": status})
    }

    async fn settings_response(&self) -> Result<Value, RouterError> {
        let settings = self.settings.get().await?;
        Ok(json!({"success": true, "settings": settings}))
    }

    /// Lifecycle events pushed by the host: `opened`, `activated`, `updated`, `removed`.
    async fn handle_tab_event(&self, params: &Value) -> Result<Value, RouterError> {
        let kind = str_param(params, "kind")?;
        let tab_id = params
            .get("tabId")
            .and_then(Value::as_i64)
            .ok_or_else(|| RouterError::MissingParam("tabId".to_string()))?;
        match kind {
            "opened" => {
                let info = TabInfo {
                    url: opt_str_param(params, "url").unwrap_or_default().to_string(),
                    title: opt_str_param(params, "title").unwrap_or_default().to_string(),
                    is_incognito: params.get("incognito").and_then(Value::as_bool).unwrap_or(false),
                };
                self.tabs.open_tab(tab_id, info);
            }
            "activated" => {
                self.tabs.switch_tab(tab_id);
                self.engine.handle_tab_activated(tab_id).await?;
            }
            "updated" => {
                let url = str_param(params, "url")?;
                let title = opt_str_param(params, "title").unwrap_or_default();
                self.tabs.update_tab(tab_id, url, title);
                self.engine.handle_tab_navigated(tab_id, url, title).await?;
            }
            "removed" => {
                if let Err(e) = self.tabs.close_tab(tab_id) {
                    debug!(tab_id, error = %e, "removed tab was not in the directory");
                }
                self.attempts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&tab_id);
                self.engine.handle_tab_removed(tab_id).await?;
            }
            other => return Err(RouterError::InvalidParam(format!("unknown tab event: {}", other))),
        }
        Ok(json!({"success": true}))
    }
}

// ─── Parameter helpers ───

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, RouterError> {
    opt_str_param(params, name).ok_or_else(|| RouterError::MissingParam(name.to_string()))
}

fn opt_str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

fn bool_value(value: &Value, name: &str) -> Result<bool, RouterError> {
    value
        .as_bool()
        .ok_or_else(|| RouterError::InvalidParam(format!("{} must be a boolean", name)))
}

fn bool_param(params: &Value, name: &str) -> Result<bool, RouterError> {
    params
        .get(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| RouterError::MissingParam(name.to_string()))
}

/// Explicit `tabId`, else the tab the sending content script lives in.
fn tab_id_param(params: &Value, sender: &MessageSender) -> Result<TabId, RouterError> {
    params
        .get("tabId")
        .and_then(Value::as_i64)
        .or_else(|| sender.tab.as_ref().map(|t| t.id))
        .ok_or_else(|| RouterError::MissingParam("tabId".to_string()))
}
