// Windows data directory: %APPDATA%\TabGuard

use std::env;
use std::path::PathBuf;

pub fn get_data_dir() -> PathBuf {
    let appdata = env::var("APPDATA").unwrap_or_else(|_| String::from("C:\\Temp"));
    PathBuf::from(appdata).join("TabGuard")
}
