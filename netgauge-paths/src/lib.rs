//! Filesystem locations used by netgauge.
//!
//! Configuration and stored results follow the XDG base directory layout on
//! every platform, the same way tools like gh and kubectl do.

use std::path::PathBuf;

const APP_DIR: &str = "netgauge";
const CONFIG_FILE: &str = "config.toml";

/// Overrides the directory searched for the project config file
pub const PROJECT_CONFIG_ENV: &str = "NETGAUGE_PROJECT_CONFIG_DIR";

/// `$<env>/netgauge`, falling back to `<home>/<home_rel>/netgauge`
fn xdg_dir(env: &str, home_rel: &str) -> PathBuf {
    match std::env::var_os(env) {
        Some(base) if !base.is_empty() => PathBuf::from(base).join(APP_DIR),
        _ => dirs::home_dir()
            .unwrap_or_default()
            .join(home_rel)
            .join(APP_DIR),
    }
}

/// Get the netgauge config directory.
///
/// Returns `$XDG_CONFIG_HOME/netgauge` if set, otherwise `~/.config/netgauge`.
///
/// # Examples
///
/// ```
/// use netgauge_paths::config_dir;
///
/// let file = config_dir().join("config.toml");
/// assert!(file.ends_with("netgauge/config.toml"));
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Returns `$XDG_DATA_HOME/netgauge` if set, otherwise `~/.local/share/netgauge`.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Where a `JsonFileStore` keeps one document per test run
pub fn results_dir() -> PathBuf {
    data_dir().join("results")
}

/// Per-user config file
pub fn user_config_file() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

/// Project config file, `.netgauge/config.toml` relative to the working
/// directory unless [`PROJECT_CONFIG_ENV`] names another directory.
pub fn project_config_file() -> PathBuf {
    match std::env::var_os(PROJECT_CONFIG_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(CONFIG_FILE),
        _ => PathBuf::from(".netgauge").join(CONFIG_FILE),
    }
}
