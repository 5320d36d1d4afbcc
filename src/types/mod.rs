// Shared type definitions
// Each submodule defines types used across the engine, router and store.

pub mod credential;
pub mod errors;
pub mod message;
pub mod settings;
pub mod tab;
