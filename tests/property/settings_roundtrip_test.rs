//! Property-based tests for settings persistence through the settings engine.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use tabguard::database::{KeyValueStore, MemoryStore};
use tabguard::services::settings_engine::SettingsEngine;
use tabguard::types::settings::{IncognitoMode, LockSettings};

fn arb_incognito_mode() -> impl Strategy<Value = IncognitoMode> {
    prop_oneof![
        Just(IncognitoMode::Disabled),
        Just(IncognitoMode::AlwaysLock),
        Just(IncognitoMode::Normal),
    ]
}

fn arb_settings() -> impl Strategy<Value = LockSettings> {
    (
        any::<bool>(),
        0u32..=240,
        any::<bool>(),
        any::<bool>(),
        arb_incognito_mode(),
        any::<bool>(),
        proptest::collection::vec("https://[a-z]{1,8}\\.com/\\*{0,2}", 0..4),
    )
        .prop_map(
            |(locking_enabled, auto_lock_timeout, lock_on_tab_switch, show_notifications, incognito_mode, private_mode, whitelisted_urls)| {
                LockSettings {
                    locking_enabled,
                    auto_lock_timeout,
                    lock_on_tab_switch,
                    show_notifications,
                    incognito_mode,
                    private_mode,
                    whitelisted_urls,
                }
            },
        )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Saved settings read back identically through a fresh engine.
    #[test]
    fn save_then_load_roundtrip(settings in arb_settings()) {
        let rt = runtime();
        let loaded = rt.block_on(async {
            let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
            SettingsEngine::new(store.clone()).save(&settings).await.unwrap();
            SettingsEngine::new(store).load().await.unwrap()
        });
        prop_assert_eq!(loaded, settings);
    }

    // A partial update changes only the keys it names.
    #[test]
    fn partial_update_touches_only_named_keys(settings in arb_settings(), timeout in 0u32..=240) {
        let rt = runtime();
        let updated = rt.block_on(async {
            let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
            let engine = SettingsEngine::new(store);
            engine.save(&settings).await.unwrap();
            engine.update(&json!({"autoLockTimeout": timeout})).await.unwrap();
            engine.get().await.unwrap()
        });
        let mut expected = settings.clone();
        expected.auto_lock_timeout = timeout;
        prop_assert_eq!(updated, expected);
    }
}
