// Platform data directory lookup.
// The SQLite store lives here unless TABGUARD_DATA_DIR overrides it.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

/// Returns the platform-specific data directory for TabGuard.
///
/// - **Linux**: `~/.local/share/tabguard` (or `$XDG_DATA_HOME/tabguard`)
/// - **macOS**: `~/Library/Application Support/TabGuard`
/// - **Windows**: `%APPDATA%/TabGuard`
pub fn get_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        linux::get_data_dir()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_data_dir()
    }
    #[cfg(target_os = "windows")]
    {
        windows::get_data_dir()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        PathBuf::from(".").join("tabguard")
    }
}
