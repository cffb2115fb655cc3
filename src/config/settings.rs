use super::ConfigError;
use crate::shared::atomic_write_file;
use crate::state::RetentionLimits;
use crate::workflow::{
    WorkflowSettings, DEFAULT_CYCLE_INTERVAL_MS, DEFAULT_MAX_STEPS_PER_RUN,
    DEFAULT_MIN_CYCLE_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_STATE_ROOT: &str = "AGENTLOOP_STATE_ROOT";
pub const ENV_CHECKPOINT_BACKEND: &str = "AGENTLOOP_CHECKPOINT_BACKEND";
pub const ENV_BYPASS_DELEGATIONS: &str = "AGENTLOOP_BYPASS_DELEGATIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

impl CheckpointBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            _ => Err("checkpoint backend must be one of: file, sqlite, memory".to_string()),
        }
    }
}

impl std::fmt::Display for CheckpointBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct CheckpointSettings {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Defaults to `<state_root>/checkpoints.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActivityRetention {
    #[serde(default = "default_event_retention")]
    pub events: usize,
    #[serde(default = "default_telemetry_retention")]
    pub telemetry: usize,
}

impl Default for ActivityRetention {
    fn default() -> Self {
        let limits = RetentionLimits::default();
        Self {
            events: limits.events,
            telemetry: limits.telemetry,
        }
    }
}

fn default_event_retention() -> usize {
    RetentionLimits::default().events
}

fn default_telemetry_retention() -> usize {
    RetentionLimits::default().telemetry
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cycle_interval_ms")]
    pub default_cycle_interval_ms: u64,
    #[serde(default = "default_min_cycle_interval_ms")]
    pub min_cycle_interval_ms: u64,
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            min_cycle_interval_ms: DEFAULT_MIN_CYCLE_INTERVAL_MS,
            max_steps_per_run: DEFAULT_MAX_STEPS_PER_RUN,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cycle_interval_ms() -> u64 {
    DEFAULT_CYCLE_INTERVAL_MS
}

fn default_min_cycle_interval_ms() -> u64 {
    DEFAULT_MIN_CYCLE_INTERVAL_MS
}

fn default_max_steps_per_run() -> usize {
    DEFAULT_MAX_STEPS_PER_RUN
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct OnboardingSettings {
    #[serde(default)]
    pub bypass_delegation_signing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    pub state_root: PathBuf,
    #[serde(default)]
    pub checkpoints: CheckpointSettings,
    #[serde(default)]
    pub activity: ActivityRetention,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub onboarding: OnboardingSettings,
}

impl Settings {
    pub fn for_state_root(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            checkpoints: CheckpointSettings::default(),
            activity: ActivityRetention::default(),
            scheduler: SchedulerSettings::default(),
            onboarding: OnboardingSettings::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let body = serde_yaml::to_string(self).map_err(|source| ConfigError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write_file(path, body.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.state_root.is_absolute() {
            return Err(ConfigError::Settings(
                "`state_root` must be an absolute path".to_string(),
            ));
        }
        if let Some(path) = &self.checkpoints.sqlite_path {
            if !path.is_absolute() {
                return Err(ConfigError::Settings(
                    "`checkpoints.sqlite_path` must be an absolute path".to_string(),
                ));
            }
        }
        if self.activity.events == 0 || self.activity.telemetry == 0 {
            return Err(ConfigError::Settings(
                "`activity.events` and `activity.telemetry` must be greater than zero".to_string(),
            ));
        }
        let scheduler = &self.scheduler;
        if scheduler.min_cycle_interval_ms == 0 {
            return Err(ConfigError::Settings(
                "`scheduler.min_cycle_interval_ms` must be greater than zero".to_string(),
            ));
        }
        if scheduler.default_cycle_interval_ms < scheduler.min_cycle_interval_ms {
            return Err(ConfigError::Settings(format!(
                "`scheduler.default_cycle_interval_ms` ({}) is below `scheduler.min_cycle_interval_ms` ({})",
                scheduler.default_cycle_interval_ms, scheduler.min_cycle_interval_ms
            )));
        }
        if scheduler.max_steps_per_run == 0 {
            return Err(ConfigError::Settings(
                "`scheduler.max_steps_per_run` must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies `AGENTLOOP_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_STATE_ROOT).filter(|v| !v.trim().is_empty()) {
            self.state_root = PathBuf::from(root.trim());
        }
        if let Some(raw) = lookup(ENV_CHECKPOINT_BACKEND) {
            self.checkpoints.backend =
                CheckpointBackend::parse(&raw).map_err(|reason| ConfigError::EnvOverride {
                    name: ENV_CHECKPOINT_BACKEND.to_string(),
                    value: raw.clone(),
                    reason,
                })?;
        }
        if let Some(raw) = lookup(ENV_BYPASS_DELEGATIONS) {
            self.onboarding.bypass_delegation_signing =
                parse_flag(&raw).ok_or_else(|| ConfigError::EnvOverride {
                    name: ENV_BYPASS_DELEGATIONS.to_string(),
                    value: raw.clone(),
                    reason: "expected true/false, 1/0 or yes/no".to_string(),
                })?;
        }
        Ok(())
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.checkpoints
            .sqlite_path
            .clone()
            .unwrap_or_else(|| self.state_root.join("checkpoints.db"))
    }

    pub fn retention_limits(&self) -> RetentionLimits {
        RetentionLimits {
            events: self.activity.events,
            telemetry: self.activity.telemetry,
        }
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            bypass_delegation_signing: self.onboarding.bypass_delegation_signing,
            cycle_interval_ms: self.scheduler.default_cycle_interval_ms,
            min_cycle_interval_ms: self.scheduler.min_cycle_interval_ms,
            max_steps_per_run: self.scheduler.max_steps_per_run,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
