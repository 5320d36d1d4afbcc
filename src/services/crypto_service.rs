use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use zeroize::Zeroize;

use crate::types::credential::{HashedPassword, StrengthCheck};
use crate::types::errors::CryptoError;

/// PBKDF2 iteration count for new hashes.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt length in bytes for PBKDF2.
pub const SALT_LENGTH: usize = 16;

/// Derived key length in bytes (256 bits).
const KEY_LENGTH: usize = 32;

/// Longest accepted master password, in characters.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Hashing and verification of the master password.
pub trait CryptoServiceTrait: Send + Sync {
    /// Derives a PBKDF2-HMAC-SHA256 hash. A random salt is generated when `salt` is `None`.
    fn hash_password(&self, password: &str, salt: Option<&[u8]>) -> Result<HashedPassword, CryptoError>;

    /// Re-derives with the stored salt and iteration count and compares.
    ///
    /// Never fails: malformed input is a verification failure.
    fn verify_password(&self, password: &str, stored_hash: &str, stored_salt: &str, iterations: u32) -> bool;

    /// Rejects empty passwords and passwords over 128 characters.
    fn validate_strength(&self, password: &str) -> StrengthCheck;

    /// Generates a cryptographically secure random salt.
    fn generate_salt(&self) -> Result<Vec<u8>, CryptoError>;
}

/// Implementation of the credential verifier using the `ring` crate.
pub struct CryptoService {
    rng: SystemRandom,
}

impl CryptoService {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn derive(password: &str, salt: &[u8], iterations: NonZeroU32) -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            password.as_bytes(),
            &mut key,
        );
        key
    }
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoServiceTrait for CryptoService {
    fn hash_password(&self, password: &str, salt: Option<&[u8]>) -> Result<HashedPassword, CryptoError> {
        let salt = match salt {
            Some(s) => s.to_vec(),
            None => self.generate_salt()?,
        };
        let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
            .ok_or_else(|| CryptoError::KeyDerivation("Invalid iteration count".to_string()))?;

        let mut key = Self::derive(password, &salt, iterations);
        let hash = BASE64.encode(&key);
        key.zeroize();

        Ok(HashedPassword {
            hash,
            salt: BASE64.encode(&salt),
            iterations: PBKDF2_ITERATIONS,
        })
    }

    fn verify_password(&self, password: &str, stored_hash: &str, stored_salt: &str, iterations: u32) -> bool {
        let Some(iterations) = NonZeroU32::new(iterations) else {
            return false;
        };
        let Ok(salt) = BASE64.decode(stored_salt) else {
            return false;
        };
        let Ok(expected) = BASE64.decode(stored_hash) else {
            return false;
        };
        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt,
            password.as_bytes(),
            &expected,
        )
        .is_ok()
    }

    fn validate_strength(&self, password: &str) -> StrengthCheck {
        if password.is_empty() {
            return StrengthCheck::rejected("Password cannot be empty");
        }
        if password.chars().count() > MAX_PASSWORD_LENGTH {
            return StrengthCheck::rejected("Password must be at most 128 characters");
        }
        StrengthCheck::ok()
    }

    fn generate_salt(&self) -> Result<Vec<u8>, CryptoError> {
        let mut salt = vec![0u8; SALT_LENGTH];
        self.rng
            .fill(&mut salt)
            .map_err(|_| CryptoError::RandomGeneration("Failed to generate salt".to_string()))?;
        Ok(salt)
    }
}
