//! App Core for TabGuard.
//!
//! Composition root: builds the store, then the credential verifier, then
//! the policy and settings engines, then the lock engine, then the router.

use std::sync::Arc;

use tracing::info;

use crate::adapters::{ChannelBridge, NotificationSink, OverlayAdapter, TabSource};
use crate::config::AppConfig;
use crate::database::store::{KeyValueStore, MemoryStore, SqliteStore};
use crate::managers::lock_manager::{EngineCollaborators, LockEngine};
use crate::managers::tab_directory::TabDirectory;
use crate::rpc_handler::EventRouter;
use crate::services::crypto_service::{CryptoService, CryptoServiceTrait};
use crate::services::password_manager::PasswordManager;
use crate::services::policy_engine::{PolicyEngine, PolicyEngineTrait};
use crate::services::settings_engine::SettingsEngine;
use crate::types::errors::LockError;

/// Central application struct holding the wired components.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub settings: Arc<SettingsEngine>,
    pub passwords: Arc<PasswordManager>,
    pub tabs: Arc<TabDirectory>,
    pub engine: LockEngine,
    pub router: EventRouter,
}

impl App {
    /// Opens the on-disk store under `config.data_dir` and wires everything to `bridge`.
    pub fn new(config: AppConfig, bridge: ChannelBridge) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(config.database_path())?);
        Ok(Self::assemble(config, store, bridge))
    }

    /// Same wiring over a volatile in-memory store.
    pub fn in_memory(config: AppConfig, bridge: ChannelBridge) -> Self {
        Self::assemble(config, Arc::new(MemoryStore::new()), bridge)
    }

    fn assemble(config: AppConfig, store: Arc<dyn KeyValueStore>, bridge: ChannelBridge) -> Self {
        let crypto: Arc<dyn CryptoServiceTrait> = Arc::new(CryptoService::new());
        let policy: Arc<dyn PolicyEngineTrait> = Arc::new(PolicyEngine::new());
        let settings = Arc::new(SettingsEngine::with_cache_ttl(store.clone(), config.settings_cache_ttl));
        let passwords = Arc::new(PasswordManager::new(store.clone(), crypto));
        let tabs = Arc::new(TabDirectory::new());

        let overlay: Arc<dyn OverlayAdapter> = Arc::new(bridge.clone());
        let notifier: Arc<dyn NotificationSink> = Arc::new(bridge);
        let tab_source: Arc<dyn TabSource> = tabs.clone();

        let engine = LockEngine::new(
            store.clone(),
            settings.clone(),
            policy,
            EngineCollaborators {
                tabs: tab_source,
                overlay: overlay.clone(),
                notifier,
            },
        );
        let router = EventRouter::new(
            engine.clone(),
            passwords.clone(),
            overlay,
            tabs.clone(),
            &config.extension_id,
        );

        Self {
            config,
            store,
            settings,
            passwords,
            tabs,
            engine,
            router,
        }
    }

    /// Startup sequence: load settings, restore private tabs, start the cleanup sweep.
    ///
    /// Returns how many private tabs were restored.
    pub async fn startup(&self) -> Result<usize, LockError> {
        self.settings.load().await?;
        let restored = self.engine.restore().await?;
        self.engine.start_periodic_cleanup(self.config.cleanup_interval);
        info!(restored, "tabguard started");
        Ok(restored)
    }

    /// Shutdown sequence: stop background work. State is already persisted.
    pub fn shutdown(&self) {
        self.engine.stop_periodic_cleanup();
        self.engine.cancel_all_timers();
        info!("tabguard stopped");
    }
}
