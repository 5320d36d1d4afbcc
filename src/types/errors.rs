use std::fmt;

use super::tab::TabId;

// === TabError ===

/// Errors reported by a tab metadata source.
#[derive(Debug, Clone, PartialEq)]
pub enum TabError {
    /// The tab no longer exists in the browser.
    NotFound(TabId),
    /// The tab source could not be reached.
    Unavailable(String),
}

impl fmt::Display for TabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabError::NotFound(id) => write!(f, "Tab not found: {}", id),
            TabError::Unavailable(msg) => write!(f, "Tab source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for TabError {}

// === StoreError ===

/// Errors raised by the persistent key/value store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing database rejected the operation.
    Database(String),
    /// A stored value could not be encoded or decoded.
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(msg) => write!(f, "Store database error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Store serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// === CryptoError ===

/// Errors related to password hashing.
#[derive(Debug, Clone, PartialEq)]
pub enum CryptoError {
    /// Failed to derive a key from the password.
    KeyDerivation(String),
    /// Failed to generate random bytes.
    RandomGeneration(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::KeyDerivation(msg) => write!(f, "Key derivation failed: {}", msg),
            CryptoError::RandomGeneration(msg) => {
                write!(f, "Random generation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for CryptoError {}

// === SettingsError ===

/// Errors related to loading or updating lock settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// The update named a key that does not exist.
    InvalidKey(String),
    /// The update carried a value of the wrong shape.
    InvalidValue(String),
    /// Settings could not be serialized.
    SerializationError(String),
    /// The store failed while reading or writing settings.
    Store(StoreError),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => write!(f, "Invalid settings value: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::Store(e) => write!(f, "Settings store error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SettingsError {
    fn from(e: StoreError) -> Self {
        SettingsError::Store(e)
    }
}

// === LockError ===

/// Errors raised by the lock-state engine.
#[derive(Debug, Clone, PartialEq)]
pub enum LockError {
    /// Incognito tabs cannot be marked private while incognito support is disabled.
    IncognitoBlocked(TabId),
    /// No metadata for the tab, so it cannot be shown not to be incognito.
    UnknownTab(TabId),
    /// Persisting the private tab collection failed.
    Store(StoreError),
    /// Reading or writing settings failed.
    Settings(SettingsError),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::IncognitoBlocked(id) => {
                write!(f, "Incognito tabs cannot be made private (tab {})", id)
            }
            LockError::UnknownTab(id) => write!(f, "Unknown tab {}: cannot confirm it is not incognito", id),
            LockError::Store(e) => write!(f, "Lock state store error: {}", e),
            LockError::Settings(e) => write!(f, "Lock settings error: {}", e),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Store(e) => Some(e),
            LockError::Settings(e) => Some(e),
            LockError::IncognitoBlocked(_) | LockError::UnknownTab(_) => None,
        }
    }
}

impl From<StoreError> for LockError {
    fn from(e: StoreError) -> Self {
        LockError::Store(e)
    }
}

impl From<SettingsError> for LockError {
    fn from(e: SettingsError) -> Self {
        LockError::Settings(e)
    }
}

// === PasswordError ===

/// Errors related to the master password lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PasswordError {
    /// A master password has already been configured.
    AlreadySet,
    /// No master password has been configured yet.
    NotSet,
    /// The candidate password failed validation.
    WeakPassword(String),
    /// The supplied current password did not verify.
    WrongPassword,
    /// Hashing failed.
    Crypto(CryptoError),
    /// Reading or writing the credential record failed.
    Store(StoreError),
}

impl fmt::Display for PasswordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordError::AlreadySet => write!(f, "Master password already set"),
            PasswordError::NotSet => write!(f, "Master password not set"),
            PasswordError::WeakPassword(msg) => write!(f, "{}", msg),
            PasswordError::WrongPassword => write!(f, "Current password is incorrect"),
            PasswordError::Crypto(e) => write!(f, "Password hashing error: {}", e),
            PasswordError::Store(e) => write!(f, "Credential store error: {}", e),
        }
    }
}

impl std::error::Error for PasswordError {}

impl From<CryptoError> for PasswordError {
    fn from(e: CryptoError) -> Self {
        PasswordError::Crypto(e)
    }
}

impl From<StoreError> for PasswordError {
    fn from(e: StoreError) -> Self {
        PasswordError::Store(e)
    }
}

// === RouterError ===

/// Errors produced while routing an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterError {
    /// The sender is not this extension's own runtime or a top-level content script.
    InvalidSource,
    /// The request method is not recognised.
    UnknownMessageType(String),
    /// A required parameter was missing or had the wrong type.
    MissingParam(String),
    /// A parameter was present but invalid.
    InvalidParam(String),
    Lock(LockError),
    Password(PasswordError),
    Settings(SettingsError),
    /// The handler failed unexpectedly.
    Internal(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::InvalidSource => write!(f, "Invalid message source"),
            RouterError::UnknownMessageType(method) => {
                write!(f, "Unknown message type: {}", method)
            }
            RouterError::MissingParam(name) => write!(f, "Missing parameter: {}", name),
            RouterError::InvalidParam(msg) => write!(f, "Invalid parameter: {}", msg),
            RouterError::Lock(e) => write!(f, "{}", e),
            RouterError::Password(e) => write!(f, "{}", e),
            RouterError::Settings(e) => write!(f, "{}", e),
            RouterError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<LockError> for RouterError {
    fn from(e: LockError) -> Self {
        RouterError::Lock(e)
    }
}

impl From<PasswordError> for RouterError {
    fn from(e: PasswordError) -> Self {
        RouterError::Password(e)
    }
}

impl From<SettingsError> for RouterError {
    fn from(e: SettingsError) -> Self {
        RouterError::Settings(e)
    }
}

// === DeliveryError ===

/// A command could not be delivered to a surface adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryError(pub String);

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delivery failed: {}", self.0)
    }
}

impl std::error::Error for DeliveryError {}

// === ConfigError ===

/// Errors raised while reading runtime configuration from the environment.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    InvalidValue { name: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { name, value } => {
                write!(f, "Invalid value for {}: {:?}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
