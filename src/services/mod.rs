// TabGuard services
// Stateless or cache-only building blocks: credential hashing, policy, settings, master password.

pub mod crypto_service;
pub mod password_manager;
pub mod policy_engine;
pub mod settings_engine;
