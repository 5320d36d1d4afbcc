//! Tests for the event router: source validation, request mapping, unlock throttling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use tabguard::adapters::{ChannelBridge, OutboundCommand};
use tabguard::app::App;
use tabguard::config::AppConfig;
use tabguard::database::{KeyValueStore, MemoryStore};
use tabguard::managers::lock_manager::{EngineCollaborators, LockEngine};
use tabguard::managers::tab_directory::TabDirectory;
use tabguard::rpc_handler::{EventRouter, LOCKOUT_WINDOW, TOO_MANY_ATTEMPTS_MESSAGE};
use tabguard::services::crypto_service::{CryptoService, CryptoServiceTrait};
use tabguard::services::password_manager::PasswordManager;
use tabguard::services::policy_engine::PolicyEngine;
use tabguard::services::settings_engine::SettingsEngine;
use tabguard::types::credential::{HashedPassword, StrengthCheck};
use tabguard::types::errors::CryptoError;
use tabguard::types::message::{MessageSender, SenderTab};

const EXT: &str = "ext-id";

/// Real verifier that counts verification calls, optionally panicking.
struct CountingCrypto {
    inner: CryptoService,
    verifications: AtomicUsize,
    panic_on_verify: bool,
}

impl CryptoServiceTrait for CountingCrypto {
    fn hash_password(&self, password: &str, salt: Option<&[u8]>) -> Result<HashedPassword, CryptoError> {
        self.inner.hash_password(password, salt)
    }

    fn verify_password(&self, password: &str, stored_hash: &str, stored_salt: &str, iterations: u32) -> bool {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_verify {
            panic!("verifier exploded");
        }
        self.inner.verify_password(password, stored_hash, stored_salt, iterations)
    }

    fn validate_strength(&self, password: &str) -> StrengthCheck {
        self.inner.validate_strength(password)
    }

    fn generate_salt(&self) -> Result<Vec<u8>, CryptoError> {
        self.inner.generate_salt()
    }
}

struct Fixture {
    router: EventRouter,
    engine: LockEngine,
    crypto: Arc<CountingCrypto>,
    commands: UnboundedReceiver<OutboundCommand>,
}

fn fixture_with(panic_on_verify: bool) -> Fixture {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let settings = Arc::new(SettingsEngine::new(store.clone()));
    let tabs = Arc::new(TabDirectory::new());
    let (bridge, commands) = ChannelBridge::new();
    let overlay = Arc::new(bridge.clone());
    let engine = LockEngine::new(
        store.clone(),
        settings,
        Arc::new(PolicyEngine::new()),
        EngineCollaborators {
            tabs: tabs.clone(),
            overlay: overlay.clone(),
            notifier: Arc::new(bridge),
        },
    );
    let crypto = Arc::new(CountingCrypto {
        inner: CryptoService::new(),
        verifications: AtomicUsize::new(0),
        panic_on_verify,
    });
    let passwords = Arc::new(PasswordManager::new(store, crypto.clone()));
    let router = EventRouter::new(engine.clone(), passwords, overlay, tabs, EXT);
    Fixture {
        router,
        engine,
        crypto,
        commands,
    }
}

fn fixture() -> Fixture {
    fixture_with(false)
}

fn popup() -> MessageSender {
    MessageSender::extension_page(EXT, "popup.html")
}

impl Fixture {
    async fn call(&self, method: &str, params: Value) -> Value {
        self.router.dispatch(&popup(), method, params).await
    }

    async fn open_tab(&self, tab_id: i64, url: &str, incognito: bool) {
        let res = self
            .call(
                "tab.event",
                json!({"kind": "opened", "tabId": tab_id, "url": url, "title": "Page", "incognito": incognito}),
            )
            .await;
        assert_eq!(res["success"], true);
    }

    async fn status(&self, tab_id: i64) -> Value {
        self.call("tab.status", json!({"tabId": tab_id})).await["status"].clone()
    }

    fn commands(&mut self) -> Vec<OutboundCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }
}

// ─── Source validation ───

#[tokio::test]
async fn test_foreign_extension_rejected() {
    let f = fixture();
    let sender = MessageSender::extension_page("someone-else", "popup.html");
    let res = f.router.dispatch(&sender, "ping", json!({})).await;
    assert_eq!(res, json!({"success": false, "error": "Invalid message source"}));
}

#[tokio::test]
async fn test_nested_iframe_rejected() {
    let f = fixture();
    let sender = MessageSender::content_script(EXT, 4, 2);
    let res = f.router.dispatch(&sender, "tab.status", json!({})).await;
    assert_eq!(res["error"], "Invalid message source");
}

#[tokio::test]
async fn test_own_id_without_page_or_tab_rejected() {
    let f = fixture();
    let sender = MessageSender {
        id: EXT.to_string(),
        url: Some("https://evil.com/".to_string()),
        tab: None,
        frame_id: None,
    };
    assert!(!f.router.is_valid_source(&sender));
}

#[tokio::test]
async fn test_top_frame_content_script_accepted() {
    let f = fixture();
    let mut sender = MessageSender::content_script(EXT, 4, 0);
    sender.url = Some("https://bank.com/".to_string());
    let res = f.router.dispatch(&sender, "tab.status", json!({})).await;
    assert_eq!(res, json!({"success": true, "status": "normal"}));
}

#[tokio::test]
async fn test_rejected_source_has_no_side_effect() {
    let f = fixture();
    let sender = MessageSender {
        id: EXT.to_string(),
        url: None,
        tab: Some(SenderTab { id: 1 }),
        frame_id: Some(3),
    };
    f.router
        .dispatch(&sender, "password.set", json!({"password": "Sn0wman!"}))
        .await;
    let res = f.call("password.is_set", json!({})).await;
    assert_eq!(res["isSet"], false);
}

// ─── Protocol basics ───

#[tokio::test]
async fn test_ping() {
    let f = fixture();
    let res = f.call("ping", json!({})).await;
    assert_eq!(res["success"], true);
    assert!(res["version"].is_string());
}

#[tokio::test]
async fn test_unknown_method() {
    let f = fixture();
    let res = f.call("tab.teleport", json!({})).await;
    assert_eq!(res, json!({"success": false, "error": "Unknown message type: tab.teleport"}));
}

#[tokio::test]
async fn test_missing_parameter() {
    let f = fixture();
    let res = f.call("tab.status", json!({})).await;
    assert_eq!(res["error"], "Missing parameter: tabId");
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let f = fixture_with(true);
    f.call("password.set", json!({"password": "Sn0wman!"})).await;
    f.open_tab(1, "https://a.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 1, "isPrivate": true})).await;

    let res = f.call("password.verify", json!({"tabId": 1, "password": "Sn0wman!"})).await;
    assert_eq!(res, json!({"success": false, "error": "internal error"}));

    // The router keeps serving.
    assert_eq!(f.call("ping", json!({})).await["success"], true);
}

// ─── Marking ───

#[tokio::test]
async fn test_mark_private_requires_master_password() {
    let f = fixture();
    f.open_tab(42, "https://bank.com", false).await;
    let res = f.call("tab.mark_private", json!({"tabId": 42, "isPrivate": true})).await;
    assert_eq!(res, json!({"success": false, "error": "Master password not set"}));
    assert_eq!(f.status(42).await, "normal");
    assert!(f.engine.get_all_private_tabs().await.is_empty());
}

#[tokio::test]
async fn test_mark_and_unmark() {
    let f = fixture();
    f.call("password.set", json!({"password": "Sn0wman!"})).await;
    f.open_tab(42, "https://bank.com", false).await;

    let res = f.call("tab.mark_private", json!({"tabId": 42, "isPrivate": true})).await;
    assert_eq!(res, json!({"success": true, "status": "private-locked"}));
    let record = f.engine.get_record(42).await.unwrap();
    assert_eq!(record.url, "https://bank.com");

    let res = f.call("tab.mark_private", json!({"tabId": 42, "isPrivate": false})).await;
    assert_eq!(res, json!({"success": true, "status": "normal"}));
}

#[tokio::test]
async fn test_mark_incognito_blocked_reports_error() {
    let f = fixture();
    f.call("password.set", json!({"password": "Sn0wman!"})).await;
    f.call("settings.update", json!({"incognitoMode": "disabled"})).await;
    f.open_tab(9, "https://a.com", true).await;

    let res = f.call("tab.mark_private", json!({"tabId": 9, "isPrivate": true})).await;
    assert_eq!(res["success"], false);
    assert_eq!(res["error"], "Incognito tabs cannot be made private (tab 9)");
}

#[tokio::test]
async fn test_unannounced_tab_fails_closed_when_incognito_disabled() {
    let f = fixture();
    f.call("password.set", json!({"password": "Sn0wman!"})).await;
    f.call("settings.update", json!({"incognitoMode": "disabled"})).await;

    let res = f.call("tab.mark_private", json!({"tabId": 77, "isPrivate": true})).await;
    assert_eq!(res["error"], "Unknown tab 77: cannot confirm it is not incognito");

    let res = f
        .call("tab.mark_private", json!({"tabId": 77, "isPrivate": true, "incognito": true}))
        .await;
    assert_eq!(res["error"], "Incognito tabs cannot be made private (tab 77)");
    assert_eq!(f.status(77).await, "normal");

    let res = f
        .call("tab.mark_private", json!({"tabId": 78, "isPrivate": true, "incognito": false, "url": "https://a.com"}))
        .await;
    assert_eq!(res, json!({"success": true, "status": "private-locked"}));
}

// ─── Unlock attempts ───

#[tokio::test(start_paused = true)]
async fn test_attempt_lockout_scenario() {
    let mut f = fixture();
    f.call("password.set", json!({"password": "Sn0wman!"})).await;
    f.open_tab(42, "https://bank.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 42, "isPrivate": true})).await;
    assert_eq!(f.status(42).await, "private-locked");

    for expected in 1..=5 {
        let res = f.call("password.verify", json!({"tabId": 42, "password": "wrong"})).await;
        assert_eq!(res, json!({"success": false, "attempts": expected}));
    }
    assert_eq!(f.crypto.verifications.load(Ordering::SeqCst), 5);

    // Locked out: the verifier is not consulted, even for the right password.
    let res = f.call("password.verify", json!({"tabId": 42, "password": "wrong"})).await;
    assert_eq!(res, json!({"success": false, "attempts": 5}));
    let res = f.call("password.verify", json!({"tabId": 42, "password": "Sn0wman!"})).await;
    assert_eq!(res, json!({"success": false, "attempts": 5}));
    assert_eq!(f.crypto.verifications.load(Ordering::SeqCst), 5);
    assert_eq!(f.status(42).await, "private-locked");

    let errors: Vec<String> = f
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            OutboundCommand::ShowVerificationError { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 7);
    assert_eq!(errors[0], "Incorrect password");
    assert_eq!(errors[6], TOO_MANY_ATTEMPTS_MESSAGE);

    tokio::time::advance(LOCKOUT_WINDOW).await;
    let res = f.call("password.verify", json!({"tabId": 42, "password": "Sn0wman!"})).await;
    assert_eq!(res, json!({"success": true}));
    assert_eq!(f.status(42).await, "private-unlocked");
    assert_eq!(f.router.failed_attempts(42), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_wrong_guesses_stay_within_attempt_cap() {
    let f = fixture();
    f.call("password.set", json!({"password": "Sn0wman!"})).await;
    f.open_tab(1, "https://bank.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 1, "isPrivate": true})).await;

    let guesses = (0..24).map(|_| {
        let router = f.router.clone();
        tokio::spawn(async move { router.verify_password(1, "wrong").await })
    });
    for outcome in futures::future::join_all(guesses).await {
        assert!(!outcome.unwrap().unwrap().success);
    }

    assert_eq!(f.crypto.verifications.load(Ordering::SeqCst), 5);
    assert_eq!(f.router.failed_attempts(1), 5);
    let res = f.call("password.verify", json!({"tabId": 1, "password": "Sn0wman!"})).await;
    assert_eq!(res, json!({"success": false, "attempts": 5}));
    assert_eq!(f.status(1).await, "private-locked");
}

#[tokio::test]
async fn test_lockout_is_per_tab() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    for tab in [1, 2] {
        f.open_tab(tab, "https://a.com", false).await;
        f.call("tab.mark_private", json!({"tabId": tab, "isPrivate": true})).await;
    }
    for _ in 0..5 {
        f.call("password.verify", json!({"tabId": 1, "password": "nope"})).await;
    }
    let res = f.call("password.verify", json!({"tabId": 2, "password": "pw"})).await;
    assert_eq!(res, json!({"success": true}));
}

#[tokio::test]
async fn test_successful_verify_hides_overlay_and_resets_counter() {
    let mut f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    f.open_tab(3, "https://a.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 3, "isPrivate": true})).await;
    f.call("password.verify", json!({"tabId": 3, "password": "bad"})).await;
    assert_eq!(f.router.failed_attempts(3), 1);
    f.commands();

    let res = f.call("password.verify", json!({"tabId": 3, "password": "pw"})).await;
    assert_eq!(res, json!({"success": true}));
    assert_eq!(f.router.failed_attempts(3), 0);
    assert!(f.commands().contains(&OutboundCommand::HideLockOverlay { tab_id: 3 }));
}

#[tokio::test]
async fn test_verify_without_master_password() {
    let f = fixture();
    let res = f.call("password.verify", json!({"tabId": 3, "password": "pw"})).await;
    assert_eq!(res["error"], "Master password not set");
}

#[tokio::test]
async fn test_closing_tab_drops_attempt_counter() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    f.open_tab(3, "https://a.com", false).await;
    f.call("password.verify", json!({"tabId": 3, "password": "bad"})).await;
    assert_eq!(f.router.failed_attempts(3), 1);

    f.call("tab.event", json!({"kind": "removed", "tabId": 3})).await;
    assert_eq!(f.router.failed_attempts(3), 0);
}

// ─── Master password ───

#[tokio::test]
async fn test_password_set_errors() {
    let f = fixture();
    assert_eq!(
        f.call("password.set", json!({"password": ""})).await,
        json!({"success": false, "error": "Password cannot be empty"})
    );
    assert_eq!(f.call("password.set", json!({"password": "a"})).await, json!({"success": true}));
    assert_eq!(
        f.call("password.set", json!({"password": "b"})).await,
        json!({"success": false, "error": "Master password already set"})
    );
    assert_eq!(f.call("password.is_set", json!({})).await["isSet"], true);
}

#[tokio::test]
async fn test_password_change() {
    let f = fixture();
    f.call("password.set", json!({"password": "old"})).await;
    assert_eq!(
        f.call("password.change", json!({"currentPassword": "bad", "newPassword": "new"})).await,
        json!({"success": false, "error": "Current password is incorrect"})
    );
    assert_eq!(
        f.call("password.change", json!({"currentPassword": "old", "newPassword": "new"})).await,
        json!({"success": true})
    );
}

// ─── Settings ───

#[tokio::test]
async fn test_settings_get_returns_full_snapshot() {
    let f = fixture();
    let res = f.call("settings.get", json!({})).await;
    assert_eq!(res["success"], true);
    assert_eq!(res["settings"]["autoLockTimeout"], 15);
    assert_eq!(res["settings"]["incognitoMode"], "normal");
}

#[tokio::test]
async fn test_settings_update_plain_keys() {
    let f = fixture();
    let res = f
        .call("settings.update", json!({"settings": {"autoLockTimeout": 2, "lockOnTabSwitch": true}}))
        .await;
    assert_eq!(res["settings"]["autoLockTimeout"], 2);
    assert_eq!(res["settings"]["lockOnTabSwitch"], true);
}

#[tokio::test]
async fn test_settings_update_rejects_unknown_key() {
    let f = fixture();
    let res = f.call("settings.update", json!({"theme": "dark"})).await;
    assert_eq!(res, json!({"success": false, "error": "Invalid settings key: theme"}));
}

#[tokio::test]
async fn test_settings_update_routes_toggles_through_engine() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    f.open_tab(1, "https://a.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 1, "isPrivate": true})).await;

    let res = f.call("settings.update", json!({"lockingEnabled": false})).await;
    assert_eq!(res["settings"]["lockingEnabled"], false);
    assert_eq!(f.status(1).await, "private-unlocked");

    f.call("settings.update", json!({"lockingEnabled": true})).await;
    assert_eq!(f.status(1).await, "private-locked");
}

#[tokio::test]
async fn test_settings_update_with_unchanged_toggles_keeps_tabs_unlocked() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    f.open_tab(1, "https://a.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 1, "isPrivate": true})).await;
    f.call("password.verify", json!({"tabId": 1, "password": "pw"})).await;
    assert_eq!(f.status(1).await, "private-unlocked");

    let res = f
        .call(
            "settings.update",
            json!({"settings": {
                "autoLockTimeout": 20,
                "lockingEnabled": true,
                "privateMode": false,
                "incognitoMode": "normal"
            }}),
        )
        .await;
    assert_eq!(res["success"], true);
    assert_eq!(res["settings"]["autoLockTimeout"], 20);
    assert_eq!(f.status(1).await, "private-unlocked");
    assert!(f.engine.has_session_timer(1));
}

#[tokio::test]
async fn test_settings_update_incognito_disabled_unmarks() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    f.open_tab(1, "https://a.com", true).await;
    f.call("tab.mark_private", json!({"tabId": 1, "isPrivate": true})).await;

    f.call("settings.update", json!({"incognitoMode": "disabled"})).await;
    assert_eq!(f.status(1).await, "normal");
}

#[tokio::test]
async fn test_settings_update_bad_toggle_type() {
    let f = fixture();
    let res = f
        .call("settings.update", json!({"autoLockTimeout": 3, "privateMode": "yes"}))
        .await;
    assert_eq!(res["error"], "Invalid parameter: privateMode must be a boolean");

    let res = f.call("settings.get", json!({})).await;
    assert_eq!(res["settings"]["autoLockTimeout"], 15);
    assert_eq!(res["settings"]["privateMode"], false);

    let res = f
        .call("settings.update", json!({"autoLockTimeout": 3, "incognitoMode": "sometimes"}))
        .await;
    assert_eq!(res["success"], false);
    assert_eq!(f.call("settings.get", json!({})).await["settings"]["autoLockTimeout"], 15);
}

#[tokio::test]
async fn test_whitelist_requests() {
    let f = fixture();
    let res = f.call("settings.whitelist_add", json!({"pattern": "https://a.com/*"})).await;
    assert_eq!(res["settings"]["whitelistedUrls"], json!(["https://a.com/*"]));
    let res = f.call("settings.whitelist_remove", json!({"pattern": "https://a.com/*"})).await;
    assert_eq!(res["settings"]["whitelistedUrls"], json!([]));
}

// ─── Tab listing and events ───

#[tokio::test]
async fn test_list_and_lock_all() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    for tab in [1, 2] {
        f.open_tab(tab, "https://a.com", false).await;
        f.call("tab.mark_private", json!({"tabId": tab, "isPrivate": true})).await;
    }
    f.call("password.verify", json!({"tabId": 1, "password": "pw"})).await;

    let res = f.call("tab.lock_all", json!({})).await;
    assert_eq!(res, json!({"success": true, "failed": []}));

    let res = f.call("tab.list_private", json!({})).await;
    let tabs = res["tabs"].as_array().unwrap();
    assert_eq!(tabs.len(), 2);
    assert!(tabs.iter().all(|t| t["isLocked"] == true));
}

#[tokio::test]
async fn test_tab_events_drive_engine() {
    let f = fixture();
    f.call("password.set", json!({"password": "pw"})).await;
    f.open_tab(5, "https://a.com", false).await;
    f.call("tab.mark_private", json!({"tabId": 5, "isPrivate": true})).await;

    f.call(
        "tab.event",
        json!({"kind": "updated", "tabId": 5, "url": "https://a.com/2", "title": "Two"}),
    )
    .await;
    assert_eq!(f.engine.get_record(5).await.unwrap().url, "https://a.com/2");

    f.call("tab.event", json!({"kind": "removed", "tabId": 5})).await;
    assert_eq!(f.status(5).await, "normal");

    let res = f.call("tab.event", json!({"kind": "exploded", "tabId": 5})).await;
    assert_eq!(res["error"], "Invalid parameter: unknown tab event: exploded");
}

// ─── Composition root ───

#[tokio::test]
async fn test_app_in_memory_serves_requests() {
    let config = AppConfig {
        extension_id: EXT.to_string(),
        ..AppConfig::default()
    };
    let (bridge, _commands) = ChannelBridge::new();
    let app = App::in_memory(config, bridge);
    assert_eq!(app.startup().await.unwrap(), 0);

    let res = app.router.dispatch(&popup(), "ping", json!({})).await;
    assert_eq!(res["success"], true);
    assert!(app.engine.is_cleanup_running());

    app.shutdown();
    assert!(!app.engine.is_cleanup_running());
}
