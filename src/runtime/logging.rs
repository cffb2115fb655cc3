use super::StatePaths;
use crate::shared::{now_millis, ThreadId};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// JSON-lines event log. Writes are best effort: a log that cannot be
/// opened never fails the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeLog {
    path: Option<PathBuf>,
}

impl RuntimeLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn for_paths(paths: &StatePaths) -> Self {
        Self {
            path: Some(paths.runtime_log_path()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, thread_id: Option<&ThreadId>, message: &str) {
        self.record("info", event, thread_id, message);
    }

    pub fn warn(&self, event: &str, thread_id: Option<&ThreadId>, message: &str) {
        self.record("warn", event, thread_id, message);
    }

    pub fn error(&self, event: &str, thread_id: Option<&ThreadId>, message: &str) {
        self.record("error", event, thread_id, message);
    }

    pub fn record(&self, level: &str, event: &str, thread_id: Option<&ThreadId>, message: &str) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let mut payload = serde_json::json!({
            "timestamp": now_millis(),
            "level": level,
            "event": event,
            "message": message,
        });
        if let Some(thread_id) = thread_id {
            payload["threadId"] = serde_json::Value::String(thread_id.to_string());
        }
        append_line(path, &payload);
    }
}

fn append_line(path: &Path, payload: &serde_json::Value) {
    let Ok(mut line) = serde_json::to_string(payload) else {
        return;
    };
    line.push('\n');

    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = file.write_all(line.as_bytes());
}
