use crate::config::ConfigError;
use std::path::PathBuf;

pub const GLOBAL_STATE_DIR: &str = ".agentloop";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "config.yaml";

/// `$HOME/.agentloop/config.yaml`.
pub fn default_global_config_path() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .map(|home| {
            PathBuf::from(home)
                .join(GLOBAL_STATE_DIR)
                .join(GLOBAL_SETTINGS_FILE_NAME)
        })
        .ok_or(ConfigError::HomeDirectoryUnavailable)
}
