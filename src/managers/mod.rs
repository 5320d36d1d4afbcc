// TabGuard state managers
// Managers own mutable runtime state: the private tab registry and the live tab directory.

pub mod lock_manager;
pub mod tab_directory;
