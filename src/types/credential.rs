use serde::{Deserialize, Serialize};

/// Stored master password hash. Replaced wholesale on change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    /// Base64-encoded PBKDF2 output.
    pub hash: String,
    /// Base64-encoded salt.
    pub salt: String,
    pub iterations: u32,
}

/// Output of hashing a password.
pub type HashedPassword = CredentialRecord;

/// Result of a password strength check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrengthCheck {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrengthCheck {
    pub fn ok() -> Self {
        Self { valid: true, error: None }
    }

    pub fn rejected(msg: &str) -> Self {
        Self {
            valid: false,
            error: Some(msg.to_string()),
        }
    }
}

/// Consecutive failed unlock attempts for one tab. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptCounter {
    pub count: u32,
    pub last_attempt_at: tokio::time::Instant,
}

/// Outcome of an unlock attempt as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}
