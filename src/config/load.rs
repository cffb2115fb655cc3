use super::{default_global_config_path, ConfigError, Settings};
use std::path::Path;

pub fn load_global_settings() -> Result<Settings, ConfigError> {
    let path = default_global_config_path()?;
    load_settings(&path)
}

/// Reads `path`, applies environment overrides and validates the result.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let mut settings = Settings::from_path(path)?;
    settings.apply_env_overrides(|name| std::env::var(name).ok())?;
    settings.validate()?;
    Ok(settings)
}
