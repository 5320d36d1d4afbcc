//! Property-based tests: lock-state invariants hold under arbitrary operation sequences.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use tabguard::adapters::ChannelBridge;
use tabguard::database::store::PRIVATE_TABS_KEY;
use tabguard::database::{KeyValueStore, MemoryStore};
use tabguard::managers::lock_manager::{EngineCollaborators, LockEngine};
use tabguard::managers::tab_directory::TabDirectory;
use tabguard::services::policy_engine::PolicyEngine;
use tabguard::services::settings_engine::SettingsEngine;
use tabguard::types::tab::{PrivateTabRecord, TabInfo};

#[derive(Debug, Clone)]
enum Op {
    Mark(i64),
    Unmark(i64),
    Lock(i64),
    Unlock(i64),
    Activate(i64),
    Remove(i64),
    Navigate(i64),
    LockAll,
    UnlockAll,
    PrivateMode(bool),
    Locking(bool),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let id = 1i64..=4;
    prop_oneof![
        3 => id.clone().prop_map(Op::Mark),
        1 => id.clone().prop_map(Op::Unmark),
        2 => id.clone().prop_map(Op::Lock),
        3 => id.clone().prop_map(Op::Unlock),
        2 => id.clone().prop_map(Op::Activate),
        1 => id.clone().prop_map(Op::Remove),
        1 => id.prop_map(Op::Navigate),
        1 => Just(Op::LockAll),
        1 => Just(Op::UnlockAll),
        1 => any::<bool>().prop_map(Op::PrivateMode),
        1 => any::<bool>().prop_map(Op::Locking),
    ]
}

async fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let settings = Arc::new(SettingsEngine::new(store.clone()));
    settings.update(&json!({"lockOnTabSwitch": true})).await.unwrap();
    let tabs = Arc::new(TabDirectory::new());
    let (bridge, _commands) = ChannelBridge::new();
    let engine = LockEngine::new(
        store.clone(),
        settings,
        Arc::new(PolicyEngine::new()),
        EngineCollaborators {
            tabs: tabs.clone(),
            overlay: Arc::new(bridge.clone()),
            notifier: Arc::new(bridge),
        },
    );

    for op in ops {
        match op {
            Op::Mark(id) => {
                tabs.open_tab(
                    id,
                    TabInfo {
                        url: format!("https://site{}.com", id),
                        title: format!("Site {}", id),
                        is_incognito: false,
                    },
                );
                engine.mark_private(id, &format!("https://site{}.com", id), "Site").await.unwrap();
            }
            Op::Unmark(id) => engine.unmark_private(id).await.unwrap(),
            Op::Lock(id) => engine.lock(id).await.unwrap(),
            Op::Unlock(id) => engine.unlock(id).await.unwrap(),
            Op::Activate(id) => engine.handle_tab_activated(id).await.unwrap(),
            Op::Remove(id) => {
                let _ = tabs.close_tab(id);
                engine.handle_tab_removed(id).await.unwrap();
            }
            Op::Navigate(id) => engine
                .handle_tab_navigated(id, &format!("https://site{}.com/next", id), "Next")
                .await
                .unwrap(),
            Op::LockAll => {
                prop_assert!(engine.lock_all().await.is_empty());
            }
            Op::UnlockAll => {
                prop_assert!(engine.unlock_all().await.is_empty());
            }
            Op::PrivateMode(on) => {
                engine.toggle_private_mode(on).await.unwrap();
            }
            Op::Locking(on) => {
                engine.toggle_locking_feature(on).await.unwrap();
            }
        }

        let records = engine.get_all_private_tabs().await;
        for record in &records {
            // Locked exactly when there is no unlock timestamp.
            prop_assert_eq!(record.is_locked, record.last_unlocked.is_none(), "record {:?}", record);
            // Timers only run for unlocked tabs.
            if engine.has_session_timer(record.tab_id) {
                prop_assert!(!record.is_locked);
            }
        }
        prop_assert!(engine.active_timer_count() <= records.len());

        // The persisted snapshot mirrors memory after every operation.
        let persisted: Vec<PrivateTabRecord> = match store.get(PRIVATE_TABS_KEY).await.unwrap() {
            Some(value) => serde_json::from_value(value).unwrap(),
            None => Vec::new(),
        };
        let mut in_memory = records.clone();
        in_memory.sort_by_key(|r| r.tab_id);
        prop_assert_eq!(persisted, in_memory);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lock_invariants_hold(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(run(ops))?;
    }

    // Locking twice leaves the same record as locking once.
    #[test]
    fn lock_is_idempotent(unlock_first in any::<bool>()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
            let settings = Arc::new(SettingsEngine::new(store.clone()));
            let (bridge, _commands) = ChannelBridge::new();
            let engine = LockEngine::new(
                store,
                settings,
                Arc::new(PolicyEngine::new()),
                EngineCollaborators {
                    tabs: Arc::new(TabDirectory::new()),
                    overlay: Arc::new(bridge.clone()),
                    notifier: Arc::new(bridge),
                },
            );
            engine.mark_private(1, "https://a.com", "A").await.unwrap();
            if unlock_first {
                engine.unlock(1).await.unwrap();
            }
            engine.lock(1).await.unwrap();
            let once = engine.get_record(1).await;
            engine.lock(1).await.unwrap();
            let twice = engine.get_record(1).await;
            prop_assert_eq!(once, twice);
            Ok(())
        })?;
    }
}
