use super::{check_sequence, io_error, json_error, Checkpoint, CheckpointError, CheckpointStore};
use crate::shared::fs_atomic::sync_dir;
use crate::shared::{atomic_write_file, remove_file_if_exists, ThreadId};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const SNAPSHOT_SUFFIX: &str = ".json";

/// One directory per thread holding `<run_seq>.json`. A put writes the new
/// snapshot first and prunes older ones afterwards, so a crash in between
/// leaves an extra file that the next read ignores and the next put removes.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread_id: &ThreadId) -> PathBuf {
        self.root.join(thread_id.as_str())
    }

    fn snapshot_path(&self, thread_id: &ThreadId, run_seq: u64) -> PathBuf {
        self.thread_dir(thread_id)
            .join(format!("{run_seq:020}{SNAPSHOT_SUFFIX}"))
    }

    fn sequences(&self, thread_id: &ThreadId) -> Result<Vec<u64>, CheckpointError> {
        let dir = self.thread_dir(thread_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };
        let mut sequences = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&dir, err))?;
            let name = entry.file_name();
            let Some(seq) = name
                .to_str()
                .and_then(|name| name.strip_suffix(SNAPSHOT_SUFFIX))
                .and_then(|stem| stem.parse::<u64>().ok())
            else {
                continue;
            };
            sequences.push(seq);
        }
        sequences.sort_unstable();
        Ok(sequences)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let thread_id = &checkpoint.thread_id;
        let dir = self.thread_dir(thread_id);
        fs::create_dir_all(&dir).map_err(|err| io_error(&dir, err))?;

        let existing = self.sequences(thread_id)?;
        check_sequence(thread_id, existing.last().copied(), checkpoint.run_seq)?;

        let path = self.snapshot_path(thread_id, checkpoint.run_seq);
        let body = serde_json::to_vec_pretty(checkpoint).map_err(|err| json_error(&path, err))?;
        atomic_write_file(&path, &body).map_err(|err| io_error(&path, err))?;

        for seq in existing {
            let stale = self.snapshot_path(thread_id, seq);
            remove_file_if_exists(&stale).map_err(|err| io_error(&stale, err))?;
        }
        sync_dir(&dir).map_err(|err| io_error(&dir, err))
    }

    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let Some(latest) = self.sequences(thread_id)?.last().copied() else {
            return Ok(None);
        };
        let path = self.snapshot_path(thread_id, latest);
        let raw = fs::read_to_string(&path).map_err(|err| io_error(&path, err))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&raw).map_err(|err| json_error(&path, err))?;
        if checkpoint.thread_id != *thread_id || checkpoint.run_seq != latest {
            return Err(CheckpointError::Corrupt {
                thread_id: thread_id.to_string(),
                reason: format!(
                    "{} holds thread `{}` seq {}",
                    path.display(),
                    checkpoint.thread_id,
                    checkpoint.run_seq
                ),
            });
        }
        Ok(Some(checkpoint))
    }

    fn retained(&self, thread_id: &ThreadId) -> Result<usize, CheckpointError> {
        Ok(self.sequences(thread_id)?.len())
    }

    fn threads(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.root, err)),
        };
        let mut threads = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&self.root, err))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(thread_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| ThreadId::parse(name).ok())
            {
                threads.push(thread_id);
            }
        }
        threads.sort();
        Ok(threads)
    }
}
