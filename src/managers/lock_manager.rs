//! Lock-state engine.
//!
//! Owns the registry of private tabs, their lock state and their session
//! timers. Every mutation is followed by a whole-collection snapshot write
//! and a status broadcast. Overlay and notification delivery failures are
//! logged and never abort a state transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{NotificationSink, OverlayAdapter, TabSource};
use crate::database::store::{KeyValueStore, PRIVATE_TABS_KEY, SESSION_META_KEY};
use crate::services::policy_engine::PolicyEngineTrait;
use crate::services::settings_engine::SettingsEngine;
use crate::types::errors::{DeliveryError, LockError, StoreError, TabError};
use crate::types::message::SessionMeta;
use crate::types::settings::{IncognitoMode, LockSettings};
use crate::types::tab::{PrivateTabRecord, StatusEvent, TabId, TabInfo, TabStatus};

/// Title shown in place of the page title while a tab is locked.
pub const LOCKED_TITLE: &str = "Private Tab";

/// Default interval of the closed-tab sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Pending auto-lock for one tab.
struct SessionTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Browser-facing collaborators of the engine.
#[derive(Clone)]
pub struct EngineCollaborators {
    pub tabs: Arc<dyn TabSource>,
    pub overlay: Arc<dyn OverlayAdapter>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Single source of truth for private tabs and their lock state.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct LockEngine {
    store: Arc<dyn KeyValueStore>,
    settings: Arc<SettingsEngine>,
    policy: Arc<dyn PolicyEngineTrait>,
    tabs: Arc<dyn TabSource>,
    overlay: Arc<dyn OverlayAdapter>,
    notifier: Arc<dyn NotificationSink>,
    records: Arc<Mutex<HashMap<TabId, PrivateTabRecord>>>,
    timers: Arc<std::sync::Mutex<HashMap<TabId, SessionTimer>>>,
    timer_generation: Arc<AtomicU64>,
    persist_lock: Arc<Mutex<()>>,
    last_active: Arc<std::sync::Mutex<Option<TabId>>>,
    cleanup_task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    status_tx: broadcast::Sender<StatusEvent>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn log_delivery(tab_id: TabId, what: &str, result: Result<(), DeliveryError>) {
    if let Err(e) = result {
        debug!(tab_id, command = what, error = %e, "overlay command not delivered");
    }
}

impl LockEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        settings: Arc<SettingsEngine>,
        policy: Arc<dyn PolicyEngineTrait>,
        collaborators: EngineCollaborators,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            store,
            settings,
            policy,
            tabs: collaborators.tabs,
            overlay: collaborators.overlay,
            notifier: collaborators.notifier,
            records: Arc::new(Mutex::new(HashMap::new())),
            timers: Arc::new(std::sync::Mutex::new(HashMap::new())),
            timer_generation: Arc::new(AtomicU64::new(0)),
            persist_lock: Arc::new(Mutex::new(())),
            last_active: Arc::new(std::sync::Mutex::new(None)),
            cleanup_task: Arc::new(std::sync::Mutex::new(None)),
            status_tx,
        }
    }

    /// Receives a [`StatusEvent`] for every mark, unmark, lock and unlock.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn settings(&self) -> &Arc<SettingsEngine> {
        &self.settings
    }

    // ─── Queries ───

    pub async fn get_tab_status(&self, tab_id: TabId) -> TabStatus {
        self.records
            .lock()
            .await
            .get(&tab_id)
            .map(PrivateTabRecord::status)
            .unwrap_or(TabStatus::Normal)
    }

    pub async fn get_record(&self, tab_id: TabId) -> Option<PrivateTabRecord> {
        self.records.lock().await.get(&tab_id).cloned()
    }

    /// All private tabs, oldest first.
    pub async fn get_all_private_tabs(&self) -> Vec<PrivateTabRecord> {
        let mut all: Vec<PrivateTabRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by_key(|r| (r.marked_at, r.tab_id));
        all
    }

    pub fn has_session_timer(&self, tab_id: TabId) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&tab_id)
    }

    pub fn active_timer_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ─── Private status ───

    /// Starts tracking a tab as private and locks it.
    ///
    /// # Errors
    /// `LockError::IncognitoBlocked` for incognito tabs while incognito support is disabled,
    /// and `LockError::UnknownTab` in that mode when the tab's metadata is unavailable.
    pub async fn mark_private(&self, tab_id: TabId, url: &str, title: &str) -> Result<(), LockError> {
        let settings = self.settings.get().await?;
        let info = match self.tabs.get_tab(tab_id).await {
            Ok(info) => TabInfo {
                url: url.to_string(),
                title: title.to_string(),
                is_incognito: info.is_incognito,
            },
            Err(e) if settings.incognito_mode == IncognitoMode::Disabled => {
                warn!(tab_id, error = %e, "refusing to mark tab of unknown incognito state");
                return Err(LockError::UnknownTab(tab_id));
            }
            Err(e) => {
                debug!(tab_id, error = %e, "tab metadata unavailable while marking private");
                TabInfo {
                    url: url.to_string(),
                    title: title.to_string(),
                    is_incognito: false,
                }
            }
        };
        if !self.policy.is_incognito_allowed(&info, &settings) {
            return Err(LockError::IncognitoBlocked(tab_id));
        }

        self.records.lock().await.entry(tab_id).or_insert_with(|| {
            PrivateTabRecord::new(tab_id, url, title, info.is_incognito, now_ms())
        });
        self.lock_inner(tab_id).await?;
        self.persist().await?;
        self.broadcast(tab_id).await;
        info!(tab_id, "tab marked private");
        Ok(())
    }

    /// Stops tracking a tab. Performs no credential check of its own.
    pub async fn unmark_private(&self, tab_id: TabId) -> Result<(), LockError> {
        self.cancel_timer(tab_id);
        let removed = self.records.lock().await.remove(&tab_id);
        if let Some(record) = removed {
            if let Some(title) = record.original_title.as_deref() {
                log_delivery(tab_id, "set_title", self.overlay.set_displayed_title(tab_id, title).await);
            }
            log_delivery(tab_id, "hide_overlay", self.overlay.hide_lock_overlay(tab_id).await);
            info!(tab_id, "tab no longer private");
        }
        self.persist().await?;
        self.broadcast(tab_id).await;
        Ok(())
    }

    // ─── Lock / unlock ───

    /// Locks a private tab. No-op when locking is disabled or the tab is not private.
    pub async fn lock(&self, tab_id: TabId) -> Result<(), LockError> {
        if self.lock_inner(tab_id).await? {
            self.persist().await?;
            self.broadcast(tab_id).await;
        }
        Ok(())
    }

    /// Applies the locked state without persisting. Returns whether a record was locked.
    async fn lock_inner(&self, tab_id: TabId) -> Result<bool, LockError> {
        let settings = self.settings.get().await?;
        if !settings.locking_enabled {
            return Ok(false);
        }
        {
            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(&tab_id) else {
                return Ok(false);
            };
            record.is_locked = true;
            record.last_unlocked = None;
            if record.original_title.is_none() {
                record.original_title = Some(record.title.clone());
            }
        }
        self.cancel_timer(tab_id);
        log_delivery(tab_id, "set_title", self.overlay.set_displayed_title(tab_id, LOCKED_TITLE).await);
        log_delivery(tab_id, "show_overlay", self.overlay.show_lock_overlay(tab_id).await);
        debug!(tab_id, "tab locked");
        Ok(true)
    }

    /// Marks a private tab unlocked and starts its session timer.
    ///
    /// Hiding the overlay is left to the caller.
    pub async fn unlock(&self, tab_id: TabId) -> Result<(), LockError> {
        let restore_title = {
            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(&tab_id) else {
                return Ok(());
            };
            record.is_locked = false;
            record.last_unlocked = Some(now_ms());
            record.original_title.take().unwrap_or_else(|| record.title.clone())
        };
        log_delivery(tab_id, "set_title", self.overlay.set_displayed_title(tab_id, &restore_title).await);
        self.start_session_timer(tab_id).await?;
        self.persist().await?;
        self.broadcast(tab_id).await;
        debug!(tab_id, "tab unlocked");
        Ok(())
    }

    /// Locks every private tab concurrently. Returns the tabs that failed.
    pub async fn lock_all(&self) -> Vec<(TabId, LockError)> {
        let ids = self.private_tab_ids().await;
        let results = join_all(ids.iter().map(|&id| async move { (id, self.lock(id).await) })).await;
        Self::collect_failures("lock", results)
    }

    /// Unlocks every private tab concurrently. Returns the tabs that failed.
    pub async fn unlock_all(&self) -> Vec<(TabId, LockError)> {
        let ids = self.private_tab_ids().await;
        let results = join_all(ids.iter().map(|&id| async move { (id, self.unlock(id).await) })).await;
        Self::collect_failures("unlock", results)
    }

    fn collect_failures(
        what: &str,
        results: Vec<(TabId, Result<(), LockError>)>,
    ) -> Vec<(TabId, LockError)> {
        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(tab_id = id, error = %e, "{} failed for tab", what);
                    Some((id, e))
                }
            })
            .collect()
    }

    // ─── Tab lifecycle ───

    /// Handles a tab switch.
    ///
    /// With `lock_on_tab_switch` the tab being left is locked if it is private
    /// and currently unlocked. The newly activated tab is never locked here,
    /// so activating a tab right after unlocking it leaves it unlocked.
    pub async fn handle_tab_activated(&self, tab_id: TabId) -> Result<(), LockError> {
        let previous = {
            let mut last = self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
            last.replace(tab_id)
        };
        let Some(previous) = previous.filter(|&p| p != tab_id) else {
            return Ok(());
        };
        let settings = self.settings.get().await?;
        if !settings.lock_on_tab_switch {
            return Ok(());
        }
        if self.get_tab_status(previous).await == TabStatus::PrivateUnlocked {
            self.lock(previous).await?;
        }
        Ok(())
    }

    pub async fn handle_tab_removed(&self, tab_id: TabId) -> Result<(), LockError> {
        self.cancel_timer(tab_id);
        {
            let mut last = self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(tab_id) {
                *last = None;
            }
        }
        let removed = self.records.lock().await.remove(&tab_id);
        if removed.is_some() {
            self.persist().await?;
            debug!(tab_id, "private tab closed");
        }
        Ok(())
    }

    /// Records a navigation and re-asserts the lock on locked tabs.
    pub async fn handle_tab_navigated(&self, tab_id: TabId, url: &str, title: &str) -> Result<(), LockError> {
        let locked = {
            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(&tab_id) else {
                return Ok(());
            };
            record.url = url.to_string();
            // Our own title override echoes back as a navigation update.
            if title != LOCKED_TITLE {
                record.title = title.to_string();
                if record.is_locked {
                    record.original_title = Some(title.to_string());
                }
            }
            record.is_locked
        };
        self.persist().await?;
        if locked && self.settings.get().await?.locking_enabled {
            log_delivery(tab_id, "set_title", self.overlay.set_displayed_title(tab_id, LOCKED_TITLE).await);
            log_delivery(tab_id, "show_overlay", self.overlay.show_lock_overlay(tab_id).await);
        }
        Ok(())
    }

    // ─── Global switches ───

    /// Turns the whole feature on (lock everything) or off (unlock everything).
    pub async fn toggle_locking_feature(&self, enabled: bool) -> Result<Vec<(TabId, LockError)>, LockError> {
        self.settings.set_locking_enabled(enabled).await?;
        if enabled {
            info!("locking enabled");
            return Ok(self.lock_all().await);
        }
        info!("locking disabled");
        let failures = self.unlock_all().await;
        self.cancel_all_timers();
        for id in self.private_tab_ids().await {
            log_delivery(id, "hide_overlay", self.overlay.hide_lock_overlay(id).await);
        }
        Ok(failures)
    }

    /// Private mode locks everything and keeps session timers off.
    pub async fn toggle_private_mode(&self, enabled: bool) -> Result<Vec<(TabId, LockError)>, LockError> {
        self.settings.set_private_mode(enabled).await?;
        if enabled {
            info!("private mode on");
            let failures = self.lock_all().await;
            self.cancel_all_timers();
            return Ok(failures);
        }
        info!("private mode off");
        let mut failures = Vec::new();
        for record in self.get_all_private_tabs().await {
            if record.is_locked {
                continue;
            }
            if let Err(e) = self.start_session_timer(record.tab_id).await {
                warn!(tab_id = record.tab_id, error = %e, "failed to restart session timer");
                failures.push((record.tab_id, e));
            }
        }
        Ok(failures)
    }

    /// Stores the incognito mode; `Disabled` unmarks every incognito private tab.
    pub async fn set_incognito_mode(&self, mode: IncognitoMode) -> Result<(), LockError> {
        self.settings.set_incognito_mode(mode).await?;
        if mode != IncognitoMode::Disabled {
            return Ok(());
        }
        for record in self.get_all_private_tabs().await {
            let tab = self.tab_info_for(&record).await;
            if tab.is_incognito {
                info!(tab_id = record.tab_id, "incognito support disabled, unmarking tab");
                self.unmark_private(record.tab_id).await?;
            }
        }
        Ok(())
    }

    pub async fn add_whitelist_pattern(&self, pattern: &str) -> Result<LockSettings, LockError> {
        Ok(self.settings.add_whitelist_pattern(pattern).await?)
    }

    pub async fn remove_whitelist_pattern(&self, pattern: &str) -> Result<LockSettings, LockError> {
        Ok(self.settings.remove_whitelist_pattern(pattern).await?)
    }

    // ─── Session timers ───

    /// Schedules the inactivity auto-lock for an unlocked tab, replacing any earlier timer.
    async fn start_session_timer(&self, tab_id: TabId) -> Result<(), LockError> {
        self.cancel_timer(tab_id);
        let settings = self.settings.get().await?;
        let timeout_ms = settings.auto_lock_timeout_ms();
        if timeout_ms == 0 {
            return Ok(());
        }
        let Some(record) = self.get_record(tab_id).await else {
            return Ok(());
        };
        let tab = self.tab_info_for(&record).await;
        if self.policy.is_auto_lock_suppressed(&tab, &settings) {
            debug!(tab_id, "auto-lock suppressed by policy");
            return Ok(());
        }

        // A lock may have landed while settings and metadata were awaited.
        // Holding the registry orders this insert against lock_inner's cancel.
        let records = self.records.lock().await;
        if records.get(&tab_id).map_or(true, |r| r.is_locked) {
            debug!(tab_id, "tab locked before its session timer started");
            return Ok(());
        }
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            engine.fire_session_timer(tab_id, generation).await;
        });
        {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(old) = timers.insert(tab_id, SessionTimer { generation, handle }) {
                old.handle.abort();
            }
        }
        drop(records);
        debug!(tab_id, timeout_ms, "session timer started");
        Ok(())
    }

    async fn fire_session_timer(&self, tab_id: TabId, generation: u64) {
        {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            match timers.get(&tab_id) {
                Some(timer) if timer.generation == generation => {
                    timers.remove(&tab_id);
                }
                _ => return,
            }
        }
        let Some(record) = self.get_record(tab_id).await else {
            return;
        };
        if record.is_locked {
            return;
        }
        if let Err(e) = self.lock(tab_id).await {
            warn!(tab_id, error = %e, "auto-lock failed");
            return;
        }
        info!(tab_id, "tab auto-locked after inactivity");

        let settings = match self.settings.get().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "could not read settings for auto-lock notification");
                return;
            }
        };
        if settings.show_notifications {
            let body = format!(
                "\"{}\" was locked after {} minute(s) of inactivity",
                record.title, settings.auto_lock_timeout
            );
            if let Err(e) = self.notifier.notify("Private tab locked", &body).await {
                debug!(error = %e, "auto-lock notification not delivered");
            }
        }
    }

    /// Cancels the pending auto-lock for a tab. Returns whether one existed.
    pub fn cancel_timer(&self, tab_id: TabId) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tab_id);
        match removed {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all_timers(&self) {
        let drained: Vec<SessionTimer> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, timer)| timer)
            .collect();
        for timer in drained {
            timer.handle.abort();
        }
    }

    // ─── Persistence ───

    /// Writes the whole private tab collection. Snapshots are written in the order taken.
    async fn persist(&self) -> Result<(), LockError> {
        let _guard = self.persist_lock.lock().await;
        let mut snapshot: Vec<PrivateTabRecord> = self.records.lock().await.values().cloned().collect();
        snapshot.sort_by_key(|r| r.tab_id);
        let value = serde_json::to_value(&snapshot).map_err(StoreError::from)?;
        self.store.set(PRIVATE_TABS_KEY, value).await?;
        Ok(())
    }

    /// Reloads persisted private tabs after a restart.
    ///
    /// Tabs that no longer exist are dropped and every survivor comes back locked.
    pub async fn restore(&self) -> Result<usize, LockError> {
        let stored: Vec<PrivateTabRecord> = match self.store.get(PRIVATE_TABS_KEY).await? {
            Some(value) => serde_json::from_value(value).map_err(StoreError::from)?,
            None => Vec::new(),
        };
        let settings = self.settings.get().await?;

        let mut restored = Vec::with_capacity(stored.len());
        for mut record in stored {
            match self.tabs.get_tab(record.tab_id).await {
                Ok(tab) => {
                    record.url = tab.url;
                    record.incognito = tab.is_incognito;
                }
                Err(TabError::NotFound(_)) => {
                    debug!(tab_id = record.tab_id, "dropping private tab that no longer exists");
                    continue;
                }
                Err(e) => debug!(tab_id = record.tab_id, error = %e, "keeping tab with stale metadata"),
            }
            if record.incognito && settings.incognito_mode == IncognitoMode::Disabled {
                continue;
            }
            record.is_locked = true;
            record.last_unlocked = None;
            if record.original_title.is_none() {
                record.original_title = Some(record.title.clone());
            }
            restored.push(record);
        }

        {
            let mut records = self.records.lock().await;
            for record in &restored {
                records.insert(record.tab_id, record.clone());
            }
        }
        self.persist().await?;

        if settings.locking_enabled {
            for record in &restored {
                let id = record.tab_id;
                log_delivery(id, "set_title", self.overlay.set_displayed_title(id, LOCKED_TITLE).await);
                log_delivery(id, "show_overlay", self.overlay.show_lock_overlay(id).await);
            }
        }

        let meta = SessionMeta {
            session_id: Uuid::new_v4().to_string(),
            started_at: now_ms(),
            restored_tabs: restored.len(),
            last_cleanup_at: None,
        };
        let value = serde_json::to_value(&meta).map_err(StoreError::from)?;
        self.store.set(SESSION_META_KEY, value).await?;

        info!(count = restored.len(), "private tabs restored");
        Ok(restored.len())
    }

    // ─── Background cleanup ───

    /// Removes records whose tab no longer exists. Returns how many were removed.
    pub async fn sweep_closed_tabs(&self) -> usize {
        let mut removed = 0;
        for id in self.private_tab_ids().await {
            if let Err(TabError::NotFound(_)) = self.tabs.get_tab(id).await {
                match self.handle_tab_removed(id).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(tab_id = id, error = %e, "cleanup failed to remove tab"),
                }
            }
        }
        if let Err(e) = self.stamp_cleanup().await {
            debug!(error = %e, "could not record cleanup time");
        }
        if removed > 0 {
            info!(removed, "swept closed private tabs");
        }
        removed
    }

    async fn stamp_cleanup(&self) -> Result<(), StoreError> {
        let Some(value) = self.store.get(SESSION_META_KEY).await? else {
            return Ok(());
        };
        let mut meta: SessionMeta = serde_json::from_value(value)?;
        meta.last_cleanup_at = Some(now_ms());
        self.store.set(SESSION_META_KEY, serde_json::to_value(&meta)?).await
    }

    /// Starts the periodic closed-tab sweep, replacing a running one.
    pub fn start_periodic_cleanup(&self, interval: Duration) {
        self.stop_periodic_cleanup();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.sweep_closed_tabs().await;
            }
        });
        *self.cleanup_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn stop_periodic_cleanup(&self) {
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    // ─── Helpers ───

    async fn private_tab_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self.records.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Live metadata for a record, falling back to what the record remembers.
    async fn tab_info_for(&self, record: &PrivateTabRecord) -> TabInfo {
        match self.tabs.get_tab(record.tab_id).await {
            Ok(tab) => tab,
            Err(_) => TabInfo {
                url: record.url.clone(),
                title: record.title.clone(),
                is_incognito: record.incognito,
            },
        }
    }

    async fn broadcast(&self, tab_id: TabId) {
        let status = self.get_tab_status(tab_id).await;
        let _ = self.status_tx.send(StatusEvent { tab_id, status });
    }
}
