// Settings Engine
// Loads, caches and updates the global lock settings.
// Settings are stored as one JSON value under the `settings` key. Reads are
// served from a short-lived cache which every mutating call invalidates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::database::store::{KeyValueStore, SETTINGS_KEY};
use crate::types::errors::SettingsError;
use crate::types::settings::{IncognitoMode, LockSettings};

/// Default lifetime of a cached settings read.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

struct CachedSettings {
    settings: LockSettings,
    loaded_at: Instant,
}

/// Settings engine backed by the key/value store.
pub struct SettingsEngine {
    store: Arc<dyn KeyValueStore>,
    cache: Mutex<Option<CachedSettings>>,
    /// Bumped on every invalidation so reads that raced a write never refill the cache.
    generation: AtomicU64,
    ttl: Duration,
    write_lock: tokio::sync::Mutex<()>,
}

impl SettingsEngine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_cache_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
            generation: AtomicU64::new(0),
            ttl,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Loads settings at startup, writing defaults when none are stored yet.
    pub async fn load(&self) -> Result<LockSettings, SettingsError> {
        let _guard = self.write_lock.lock().await;
        let stored = self.store.get(SETTINGS_KEY).await?;
        let settings = match stored {
            Some(value) => Self::decode(value)?,
            None => {
                let defaults = LockSettings::default();
                self.write(&defaults).await?;
                defaults
            }
        };
        self.fill_cache(&settings, self.generation.load(Ordering::SeqCst));
        Ok(settings)
    }

    /// Returns the current settings, from cache when fresh.
    pub async fn get(&self) -> Result<LockSettings, SettingsError> {
        if let Some(settings) = self.cached() {
            return Ok(settings);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let settings = match self.store.get(SETTINGS_KEY).await? {
            Some(value) => Self::decode(value)?,
            None => LockSettings::default(),
        };
        self.fill_cache(&settings, generation);
        Ok(settings)
    }

    /// Drops the cached value so the next read goes to the store.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Replaces the stored settings wholesale.
    pub async fn save(&self, settings: &LockSettings) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;
        self.write(settings).await
    }

    /// Merges a partial JSON object over the current settings.
    ///
    /// Keys must name existing settings fields and values must have the
    /// field's type; nothing is written if any part of the patch is rejected.
    pub async fn update(&self, patch: &Value) -> Result<LockSettings, SettingsError> {
        let patch = patch
            .as_object()
            .ok_or_else(|| SettingsError::InvalidValue("settings patch must be an object".to_string()))?;

        self.modify(|current| {
            let mut json_value = serde_json::to_value(&*current).map_err(|e| {
                SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
            })?;
            let map = json_value.as_object_mut().ok_or_else(|| {
                SettingsError::SerializationError("settings are not an object".to_string())
            })?;
            for (key, value) in patch {
                if !map.contains_key(key) {
                    return Err(SettingsError::InvalidKey(key.clone()));
                }
                map.insert(key.clone(), value.clone());
            }
            *current = serde_json::from_value(json_value)
                .map_err(|e| SettingsError::InvalidValue(e.to_string()))?;
            Ok(())
        })
        .await
    }

    pub async fn set_locking_enabled(&self, enabled: bool) -> Result<LockSettings, SettingsError> {
        self.modify(|s| {
            s.locking_enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_private_mode(&self, enabled: bool) -> Result<LockSettings, SettingsError> {
        self.modify(|s| {
            s.private_mode = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_incognito_mode(&self, mode: IncognitoMode) -> Result<LockSettings, SettingsError> {
        self.modify(|s| {
            s.incognito_mode = mode;
            Ok(())
        })
        .await
    }

    /// Appends a whitelist pattern unless an identical one is present.
    pub async fn add_whitelist_pattern(&self, pattern: &str) -> Result<LockSettings, SettingsError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(SettingsError::InvalidValue("whitelist pattern cannot be empty".to_string()));
        }
        self.modify(|s| {
            if !s.whitelisted_urls.iter().any(|p| p == pattern) {
                s.whitelisted_urls.push(pattern.to_string());
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_whitelist_pattern(&self, pattern: &str) -> Result<LockSettings, SettingsError> {
        let pattern = pattern.trim();
        self.modify(|s| {
            s.whitelisted_urls.retain(|p| p != pattern);
            Ok(())
        })
        .await
    }

    /// Read-modify-write under the write lock, bypassing the cache for the read.
    async fn modify<F>(&self, apply: F) -> Result<LockSettings, SettingsError>
    where
        F: FnOnce(&mut LockSettings) -> Result<(), SettingsError>,
    {
        let _guard = self.write_lock.lock().await;
        self.invalidate();
        let mut settings = match self.store.get(SETTINGS_KEY).await? {
            Some(value) => Self::decode(value)?,
            None => LockSettings::default(),
        };
        apply(&mut settings)?;
        self.write(&settings).await?;
        Ok(settings)
    }

    async fn write(&self, settings: &LockSettings) -> Result<(), SettingsError> {
        self.invalidate();
        let value = serde_json::to_value(settings).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;
        self.store.set(SETTINGS_KEY, value).await?;
        self.invalidate();
        debug!("settings written");
        Ok(())
    }

    fn decode(value: Value) -> Result<LockSettings, SettingsError> {
        serde_json::from_value(value).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to parse stored settings: {}", e))
        })
    }

    fn cached(&self) -> Option<LockSettings> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.as_ref()?;
        if entry.loaded_at.elapsed() < self.ttl {
            Some(entry.settings.clone())
        } else {
            None
        }
    }

    fn fill_cache(&self, settings: &LockSettings, generation: u64) {
        if let Ok(mut cache) = self.cache.lock() {
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            *cache = Some(CachedSettings {
                settings: settings.clone(),
                loaded_at: Instant::now(),
            });
        }
    }
}
