//! Master password lifecycle.
//!
//! Stores a single salted PBKDF2 credential under the `credential` key and
//! answers verification requests against it. The record is only ever
//! replaced wholesale.

use std::sync::Arc;

use tracing::info;

use crate::database::store::{KeyValueStore, CREDENTIAL_KEY};
use crate::services::crypto_service::CryptoServiceTrait;
use crate::types::credential::CredentialRecord;
use crate::types::errors::{PasswordError, StoreError};

/// Master password manager backed by the key/value store + credential verifier.
pub struct PasswordManager {
    store: Arc<dyn KeyValueStore>,
    crypto: Arc<dyn CryptoServiceTrait>,
    write_lock: tokio::sync::Mutex<()>,
}

impl PasswordManager {
    pub fn new(store: Arc<dyn KeyValueStore>, crypto: Arc<dyn CryptoServiceTrait>) -> Self {
        Self {
            store,
            crypto,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the stored credential, if one has been set up.
    pub async fn credential(&self) -> Result<Option<CredentialRecord>, PasswordError> {
        match self.store.get(CREDENTIAL_KEY).await? {
            Some(value) => {
                let record = serde_json::from_value(value).map_err(StoreError::from)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub async fn is_set(&self) -> Result<bool, PasswordError> {
        Ok(self.credential().await?.is_some())
    }

    /// Checks `password` against the stored credential.
    ///
    /// # Errors
    /// `PasswordError::NotSet` when no master password exists.
    pub async fn verify(&self, password: &str) -> Result<bool, PasswordError> {
        let record = self.credential().await?.ok_or(PasswordError::NotSet)?;
        Ok(self
            .crypto
            .verify_password(password, &record.hash, &record.salt, record.iterations))
    }

    /// First-time setup of the master password.
    pub async fn set_master_password(&self, password: &str) -> Result<(), PasswordError> {
        let _guard = self.write_lock.lock().await;
        if self.credential().await?.is_some() {
            return Err(PasswordError::AlreadySet);
        }
        self.store_new(password).await?;
        info!("master password configured");
        Ok(())
    }

    /// Replaces the master password after checking the current one.
    pub async fn change_master_password(&self, current: &str, new: &str) -> Result<(), PasswordError> {
        let _guard = self.write_lock.lock().await;
        let Some(record) = self.credential().await? else {
            return Err(PasswordError::WrongPassword);
        };
        if !self
            .crypto
            .verify_password(current, &record.hash, &record.salt, record.iterations)
        {
            return Err(PasswordError::WrongPassword);
        }
        self.store_new(new).await?;
        info!("master password changed");
        Ok(())
    }

    async fn store_new(&self, password: &str) -> Result<(), PasswordError> {
        let check = self.crypto.validate_strength(password);
        if !check.valid {
            return Err(PasswordError::WeakPassword(
                check.error.unwrap_or_else(|| "Password rejected".to_string()),
            ));
        }
        let hashed = self.crypto.hash_password(password, None)?;
        let value = serde_json::to_value(&hashed).map_err(StoreError::from)?;
        self.store.set(CREDENTIAL_KEY, value).await?;
        Ok(())
    }
}
