pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_global_settings, load_settings};
pub use paths::{default_global_config_path, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR};
pub use settings::{
    ActivityRetention, CheckpointBackend, CheckpointSettings, OnboardingSettings,
    SchedulerSettings, Settings, ENV_BYPASS_DELEGATIONS, ENV_CHECKPOINT_BACKEND, ENV_STATE_ROOT,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn sparse_yaml_fills_defaults() {
        let settings: Settings = serde_yaml::from_str("state_root: /var/lib/agentloop\n")
            .expect("parse settings");
        assert_eq!(settings.checkpoints.backend, CheckpointBackend::File);
        assert_eq!(settings.activity, ActivityRetention::default());
        assert!(settings.scheduler.enabled);
        assert!(!settings.onboarding.bypass_delegation_signing);
        assert_eq!(
            settings.sqlite_path(),
            PathBuf::from("/var/lib/agentloop/checkpoints.db")
        );
        settings.validate().expect("valid");
    }

    #[test]
    fn env_overrides_reject_unknown_backend() {
        let mut settings = Settings::for_state_root("/tmp/agentloop");
        let err = settings
            .apply_env_overrides(|name| {
                (name == ENV_CHECKPOINT_BACKEND).then(|| "postgres".to_string())
            })
            .expect_err("unknown backend");
        assert!(err.to_string().contains(ENV_CHECKPOINT_BACKEND));
    }
}
