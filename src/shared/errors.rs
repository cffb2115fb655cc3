#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create runtime path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn cycle timer for thread `{thread_id}`: {source}")]
    SpawnTimer {
        thread_id: String,
        #[source]
        source: std::io::Error,
    },
}
