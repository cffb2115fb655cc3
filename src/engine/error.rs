use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::shared::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("thread `{thread_id}` already has a run in flight; retry later")]
    ThreadBusy { thread_id: String },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl EngineError {
    /// Busy threads clear on their own; everything else needs a fix first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ThreadBusy { .. })
    }
}
