#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config {path} is not valid settings yaml: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error("environment override {name}=`{value}` rejected: {reason}")]
    EnvOverride {
        name: String,
        value: String,
        reason: String,
    },
    #[error("HOME is not set; pass an explicit config path")]
    HomeDirectoryUnavailable,
}
