use super::{check_sequence, Checkpoint, CheckpointError, CheckpointStore};
use crate::shared::ThreadId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<HashMap<ThreadId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut snapshots = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = snapshots
            .get(&checkpoint.thread_id)
            .map(|existing| existing.run_seq);
        check_sequence(&checkpoint.thread_id, stored, checkpoint.run_seq)?;
        snapshots.insert(checkpoint.thread_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thread_id)
            .cloned())
    }

    fn retained(&self, thread_id: &ThreadId) -> Result<usize, CheckpointError> {
        Ok(usize::from(
            self.snapshots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(thread_id),
        ))
    }

    fn threads(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let mut threads = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        threads.sort();
        Ok(threads)
    }
}
